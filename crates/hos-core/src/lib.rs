use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub mod patient;
pub mod telemetry;
pub mod wire;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Transcribe,
    Process,
    Asl,
    Dim,
    Gem,
    Anon,
}

impl JobKind {
    pub fn all() -> [JobKind; 6] {
        [
            JobKind::Transcribe,
            JobKind::Process,
            JobKind::Asl,
            JobKind::Dim,
            JobKind::Gem,
            JobKind::Anon,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Transcribe => "transcribe",
            JobKind::Process => "process",
            JobKind::Asl => "asl",
            JobKind::Dim => "dim",
            JobKind::Gem => "gem",
            JobKind::Anon => "anon",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            JobKind::Transcribe => "Audio Transcription",
            JobKind::Process => "Document Processing",
            JobKind::Asl => "ASL Analysis",
            JobKind::Dim => "Dimensional Analysis",
            JobKind::Gem => "GEM Profiling",
            JobKind::Anon => "Anonymization",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            JobKind::Transcribe => "Transcribe audio files using ElevenLabs STT",
            JobKind::Process => "Process patient dossiers and documents",
            JobKind::Asl => "Linguistic analysis using ASL framework",
            JobKind::Dim => "Multi-dimensional psychological analysis",
            JobKind::Gem => "Generate GEM psychological profiles",
            JobKind::Anon => "Anonymize patient data and documents",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "transcribe" => Ok(JobKind::Transcribe),
            "process" => Ok(JobKind::Process),
            "asl" => Ok(JobKind::Asl),
            "dim" => Ok(JobKind::Dim),
            "gem" => Ok(JobKind::Gem),
            "anon" => Ok(JobKind::Anon),
            other => Err(format!("Unknown agent type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    // Pending jobs may fail without ever running: a restart that
    // interrupts a queued job fails it directly.
    pub fn can_advance_to(&self, next: &JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("Unknown status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentJob {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub status: JobStatus,
    pub data: Value,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentJob {
    pub fn new(kind: JobKind, data: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            status: JobStatus::Pending,
            data,
            created_at: Utc::now(),
            completed_at: None,
            result: None,
            error: None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn complete(&mut self, result: Value) {
        self.status = JobStatus::Completed;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobStats {
    pub total_jobs: usize,
    pub pending_jobs: usize,
    pub running_jobs: usize,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
}

impl JobStats {
    pub fn tally<'a, I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = &'a JobStatus>,
    {
        let mut stats = JobStats::default();
        for status in statuses {
            stats.total_jobs += 1;
            match status {
                JobStatus::Pending => stats.pending_jobs += 1,
                JobStatus::Running => stats.running_jobs += 1,
                JobStatus::Completed => stats.completed_jobs += 1,
                JobStatus::Failed => stats.failed_jobs += 1,
            }
        }
        stats
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentTypeInfo {
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub name: String,
    pub description: String,
    pub enabled: bool,
}

pub fn agent_catalog(transcription_enabled: bool, analysis_enabled: bool) -> Vec<AgentTypeInfo> {
    JobKind::all()
        .iter()
        .map(|kind| {
            let enabled = match kind {
                JobKind::Transcribe => transcription_enabled,
                JobKind::Asl | JobKind::Dim | JobKind::Gem => analysis_enabled,
                JobKind::Process | JobKind::Anon => true,
            };
            AgentTypeInfo {
                kind: kind.clone(),
                name: kind.display_name().to_string(),
                description: kind.description().to_string(),
                enabled,
            }
        })
        .collect()
}
