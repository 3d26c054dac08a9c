use chrono::Utc;
use hos_core::patient::Patient;
use hos_core::telemetry::ClientErrorReport;
use hos_core::AgentJob;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use uuid::Uuid;

pub const HEALTHOS_SCHEMA_VERSION: i64 = 1;

const JOBS_CHECKPOINT: &str = "agent_jobs";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

// Connection is not Sync, so the store keeps it behind a mutex and can
// be shared across the coordinator, terminal sessions, and handlers.
pub struct HealthStore {
    conn: Mutex<Connection>,
}

impl HealthStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn()
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let current = self.schema_version()?;
        if current > HEALTHOS_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: HEALTHOS_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_healthos.sql");
            let conn = self.conn();
            conn.execute_batch(sql)?;
            conn.execute("PRAGMA user_version = 1", []).map(|_| ())?;
        }

        Ok(())
    }

    pub fn save_jobs(&self, jobs: &HashMap<Uuid, AgentJob>) -> Result<(), StorageError> {
        let value_json = serde_json::to_string(jobs)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        self.put_checkpoint(JOBS_CHECKPOINT, &value_json)
    }

    pub fn load_jobs(&self) -> Result<HashMap<Uuid, AgentJob>, StorageError> {
        let Some(value_json) = self.read_checkpoint(JOBS_CHECKPOINT)? else {
            return Ok(HashMap::new());
        };
        serde_json::from_str(&value_json)
            .map_err(|err| StorageError::Serialization(err.to_string()))
    }

    pub fn save_terminal_history(
        &self,
        session_id: &str,
        history: &[String],
    ) -> Result<(), StorageError> {
        let value_json = serde_json::to_string(history)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        self.put_checkpoint(&terminal_checkpoint(session_id), &value_json)
    }

    pub fn load_terminal_history(&self, session_id: &str) -> Result<Vec<String>, StorageError> {
        let Some(value_json) = self.read_checkpoint(&terminal_checkpoint(session_id))? else {
            return Ok(Vec::new());
        };
        serde_json::from_str(&value_json)
            .map_err(|err| StorageError::Serialization(err.to_string()))
    }

    pub fn clear_terminal_history(&self, session_id: &str) -> Result<(), StorageError> {
        self.conn().execute(
            "DELETE FROM checkpoints WHERE name = ?1",
            [terminal_checkpoint(session_id)],
        )?;
        Ok(())
    }

    fn put_checkpoint(&self, name: &str, value_json: &str) -> Result<(), StorageError> {
        self.conn().execute(
            "
            INSERT INTO checkpoints (name, value_json, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(name) DO UPDATE SET
                value_json=excluded.value_json,
                updated_at=excluded.updated_at
            ",
            params![name, value_json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn read_checkpoint(&self, name: &str) -> Result<Option<String>, StorageError> {
        let value_json = self
            .conn()
            .query_row(
                "SELECT value_json FROM checkpoints WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value_json)
    }

    pub fn upsert_patient(&self, patient: &Patient) -> Result<(), StorageError> {
        let record_json = serde_json::to_string(patient)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        self.conn().execute(
            "
            INSERT INTO patients (patient_id, name, status, record_json, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(patient_id) DO UPDATE SET
                name=excluded.name,
                status=excluded.status,
                record_json=excluded.record_json,
                updated_at=excluded.updated_at
            ",
            params![
                patient.id,
                patient.name,
                patient.status,
                record_json,
                patient.created_at.to_rfc3339(),
                patient.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn patient(&self, patient_id: &str) -> Result<Option<Patient>, StorageError> {
        let record_json: Option<String> = self
            .conn()
            .query_row(
                "SELECT record_json FROM patients WHERE patient_id = ?1",
                [patient_id],
                |row| row.get(0),
            )
            .optional()?;

        record_json
            .map(|raw| {
                serde_json::from_str(&raw)
                    .map_err(|err| StorageError::Serialization(err.to_string()))
            })
            .transpose()
    }

    pub fn patients(&self, limit: usize, offset: usize) -> Result<Vec<Patient>, StorageError> {
        let conn = self.conn();
        let mut statement = conn.prepare(
            "
            SELECT record_json
            FROM patients
            ORDER BY created_at DESC, patient_id ASC
            LIMIT ?1 OFFSET ?2
            ",
        )?;

        let rows = statement.query_map(params![limit as i64, offset as i64], |row| {
            row.get::<_, String>(0)
        })?;

        let mut patients = Vec::new();
        for row in rows {
            let record_json = row?;
            patients.push(
                serde_json::from_str(&record_json)
                    .map_err(|err| StorageError::Serialization(err.to_string()))?,
            );
        }
        Ok(patients)
    }

    pub fn patient_count(&self) -> Result<i64, StorageError> {
        let count = self
            .conn()
            .query_row("SELECT COUNT(*) FROM patients", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn delete_patient(&self, patient_id: &str) -> Result<bool, StorageError> {
        let changes = self.conn().execute(
            "DELETE FROM patients WHERE patient_id = ?1",
            [patient_id],
        )?;
        Ok(changes > 0)
    }

    pub fn search_patients(&self, term: &str) -> Result<Vec<Patient>, StorageError> {
        let needle = term.trim().to_lowercase();
        let conn = self.conn();
        let mut statement = conn.prepare(
            "
            SELECT record_json
            FROM patients
            WHERE LOWER(name) LIKE '%' || ?1 || '%'
               OR LOWER(patient_id) LIKE '%' || ?1 || '%'
            ORDER BY created_at DESC, patient_id ASC
            ",
        )?;

        let rows = statement.query_map([needle], |row| row.get::<_, String>(0))?;

        let mut patients = Vec::new();
        for row in rows {
            let record_json = row?;
            patients.push(
                serde_json::from_str(&record_json)
                    .map_err(|err| StorageError::Serialization(err.to_string()))?,
            );
        }
        Ok(patients)
    }

    pub fn insert_client_error(
        &self,
        report: &ClientErrorReport,
        retain_for: chrono::Duration,
    ) -> Result<String, StorageError> {
        self.purge_expired_client_errors()?;

        let report_json = serde_json::to_string(report)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        let error_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        self.conn().execute(
            "
            INSERT INTO client_errors (error_id, report_json, created_at, expires_at)
            VALUES (?1, ?2, ?3, ?4)
            ",
            params![
                error_id,
                report_json,
                now.to_rfc3339(),
                (now + retain_for).to_rfc3339(),
            ],
        )?;
        Ok(error_id)
    }

    pub fn purge_expired_client_errors(&self) -> Result<usize, StorageError> {
        let removed = self.conn().execute(
            "DELETE FROM client_errors WHERE expires_at <= ?1",
            [Utc::now().to_rfc3339()],
        )?;
        Ok(removed)
    }

    pub fn client_error_count(&self) -> Result<i64, StorageError> {
        let count = self
            .conn()
            .query_row("SELECT COUNT(*) FROM client_errors", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool, StorageError> {
        let exists = self
            .conn()
            .query_row(
                "
                SELECT 1
                FROM sqlite_master
                WHERE type='table' AND name = ?1
                LIMIT 1
                ",
                [table_name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(exists.is_some())
    }
}

fn terminal_checkpoint(session_id: &str) -> String {
    format!("terminal:{session_id}")
}
