use crate::AgentJob;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("invalid frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

// Frames pushed over the live job channel. The snapshot frame is sent
// once on connect, the rest mirror coordinator transitions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum JobFeedFrame {
    JobsList(Vec<AgentJob>),
    JobUpdate(AgentJob),
    JobCompleted(AgentJob),
    JobFailed(AgentJob),
}

impl JobFeedFrame {
    pub fn parse(raw: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TerminalFrameKind {
    Command,
    Output,
    Error,
    Welcome,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TerminalFrame {
    #[serde(rename = "type")]
    pub kind: TerminalFrameKind,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl TerminalFrame {
    pub fn command(data: impl Into<String>) -> Self {
        Self {
            kind: TerminalFrameKind::Command,
            data: data.into(),
            timestamp: None,
        }
    }

    pub fn output(data: impl Into<String>) -> Self {
        Self::stamped(TerminalFrameKind::Output, data)
    }

    pub fn error(data: impl Into<String>) -> Self {
        Self::stamped(TerminalFrameKind::Error, data)
    }

    pub fn welcome(data: impl Into<String>) -> Self {
        Self::stamped(TerminalFrameKind::Welcome, data)
    }

    pub fn parse(raw: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(raw)?)
    }

    fn stamped(kind: TerminalFrameKind, data: impl Into<String>) -> Self {
        Self {
            kind,
            data: data.into(),
            timestamp: Some(Utc::now().timestamp_millis()),
        }
    }
}
