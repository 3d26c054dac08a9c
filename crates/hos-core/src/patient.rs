use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

const DEFAULT_STATUS: &str = "ATIVO";

// Identity and bookkeeping fields are owned by the server. Client
// payloads carrying them are ignored rather than rejected.
const RESERVED_FIELDS: [&str; 3] = ["id", "createdAt", "updatedAt"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: String,
    pub name: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientDraft {
    pub name: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

impl Patient {
    pub fn create(draft: PatientDraft) -> Self {
        let mut extra = draft.extra;
        strip_reserved(&mut extra);
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: draft.name,
            status: draft.status,
            created_at: now,
            updated_at: now,
            extra,
        }
    }

    pub fn apply(&mut self, update: PatientUpdate) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        let mut extra = update.extra;
        strip_reserved(&mut extra);
        self.extra.extend(extra);
        self.updated_at = Utc::now();
    }
}

fn default_status() -> String {
    DEFAULT_STATUS.to_string()
}

fn strip_reserved(extra: &mut HashMap<String, Value>) {
    for field in RESERVED_FIELDS {
        extra.remove(field);
    }
}
