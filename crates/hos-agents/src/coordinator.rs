use crate::feed::{JobFeed, SubscriberId};
use crate::provider::AgentProvider;
use chrono::Utc;
use hos_core::wire::JobFeedFrame;
use hos_core::{AgentJob, JobKind, JobStats, JobStatus};
use hos_storage::{HealthStore, StorageError};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

const DEFAULT_LIST_LIMIT: usize = 50;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub max_active_jobs: usize,
    pub execution_timeout: Duration,
    pub retention: chrono::Duration,
    pub sweep_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_active_jobs: 64,
            execution_timeout: Duration::from_secs(30),
            retention: chrono::Duration::days(7),
            sweep_interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("{0}")]
    InvalidKind(String),
    #[error("Job not found")]
    NotFound,
    #[error("job registry saturated: {active} active jobs at limit {limit}")]
    Saturated { active: usize, limit: usize },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobPage {
    pub jobs: Vec<AgentJob>,
    pub total: usize,
}

// Single coordinating owner of the job registry. Every mutation goes
// through here: submit, the detached execution task, restart recovery,
// and the retention sweep. Each mutation checkpoints the full registry
// to the store before observers hear about it.
pub struct AgentCoordinator {
    config: CoordinatorConfig,
    store: Arc<HealthStore>,
    provider: Arc<dyn AgentProvider>,
    feed: JobFeed,
    jobs: RwLock<HashMap<Uuid, AgentJob>>,
}

impl AgentCoordinator {
    pub fn new(
        store: Arc<HealthStore>,
        provider: Arc<dyn AgentProvider>,
        config: CoordinatorConfig,
    ) -> Result<Self, CoordinatorError> {
        let mut jobs = store.load_jobs()?;
        let interrupted = fail_interrupted_jobs(&mut jobs);
        if interrupted > 0 {
            store.save_jobs(&jobs)?;
            warn!(event = "jobs_recovered", interrupted);
        }
        info!(event = "jobs_loaded", count = jobs.len());

        Ok(Self {
            config,
            store,
            provider,
            feed: JobFeed::new(),
            jobs: RwLock::new(jobs),
        })
    }

    pub async fn submit(
        self: Arc<Self>,
        kind: &str,
        data: Value,
    ) -> Result<AgentJob, CoordinatorError> {
        let kind = JobKind::from_str(kind).map_err(CoordinatorError::InvalidKind)?;

        let job = {
            let mut jobs = self.jobs.write().await;
            let active = jobs.values().filter(|job| job.is_active()).count();
            if active >= self.config.max_active_jobs {
                warn!(
                    event = "job_rejected",
                    kind = %kind,
                    active,
                    limit = self.config.max_active_jobs
                );
                return Err(CoordinatorError::Saturated {
                    active,
                    limit: self.config.max_active_jobs,
                });
            }

            let job = AgentJob::new(kind, data);
            jobs.insert(job.id, job.clone());
            // No durable checkpoint, no job.
            if let Err(err) = self.store.save_jobs(&jobs) {
                jobs.remove(&job.id);
                return Err(err.into());
            }
            job
        };

        info!(event = "job_submitted", job_id = %job.id, kind = %job.kind);
        self.spawn_execution(job.id);
        Ok(job)
    }

    pub async fn get(&self, job_id: Uuid) -> Result<AgentJob, CoordinatorError> {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .cloned()
            .ok_or(CoordinatorError::NotFound)
    }

    pub async fn list(&self, status: Option<JobStatus>, limit: Option<usize>) -> JobPage {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT);
        let jobs = self.jobs.read().await;

        let mut listed: Vec<AgentJob> = jobs
            .values()
            .filter(|job| status.as_ref().map_or(true, |wanted| &job.status == wanted))
            .cloned()
            .collect();
        listed.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        let total = listed.len();
        listed.truncate(limit);
        JobPage {
            jobs: listed,
            total,
        }
    }

    pub async fn stats(&self) -> JobStats {
        let jobs = self.jobs.read().await;
        JobStats::tally(jobs.values().map(|job| &job.status))
    }

    // Live channel entry point: the returned receiver is primed with a
    // jobs_list snapshot in list order, then carries one frame per
    // transition. The jobs lock is held across registration, so no
    // transition can broadcast between the snapshot and the feed insert.
    pub async fn subscribe(&self) -> (SubscriberId, mpsc::Receiver<String>) {
        let jobs = self.jobs.read().await;
        let mut listed: Vec<AgentJob> = jobs.values().cloned().collect();
        listed.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        self.feed.register(&JobFeedFrame::JobsList(listed)).await
    }

    pub async fn unsubscribe(&self, id: SubscriberId) {
        self.feed.remove(id).await;
    }

    pub async fn observer_count(&self) -> usize {
        self.feed.observer_count().await
    }

    pub async fn sweep_expired(&self) -> usize {
        let cutoff = Utc::now() - self.config.retention;
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| match job.completed_at {
            Some(completed_at) => completed_at >= cutoff,
            None => true,
        });

        let removed = before - jobs.len();
        if removed > 0 {
            self.checkpoint(&jobs);
            info!(event = "jobs_swept", removed, kept = jobs.len());
        }
        removed
    }

    pub fn start_retention_sweep(self: Arc<Self>) {
        if self.config.sweep_interval.is_zero() {
            return;
        }
        let coordinator = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(coordinator.config.sweep_interval);
            loop {
                ticker.tick().await;
                coordinator.sweep_expired().await;
            }
        });
    }

    fn spawn_execution(self: Arc<Self>, job_id: Uuid) {
        tokio::spawn(async move {
            self.execute_job(job_id).await;
        });
    }

    async fn execute_job(&self, job_id: Uuid) {
        let Some((kind, payload)) = self.mark_running(job_id).await else {
            return;
        };

        let outcome = tokio::time::timeout(
            self.config.execution_timeout,
            self.provider.run(kind, payload),
        )
        .await;

        match outcome {
            Ok(Ok(result)) => self.finish_job(job_id, Ok(result)).await,
            Ok(Err(err)) => self.finish_job(job_id, Err(err.to_string())).await,
            Err(_) => {
                let message = format!(
                    "execution timed out after {}s",
                    self.config.execution_timeout.as_secs()
                );
                self.finish_job(job_id, Err(message)).await;
            }
        }
    }

    async fn mark_running(&self, job_id: Uuid) -> Option<(JobKind, Value)> {
        let snapshot = {
            let mut jobs = self.jobs.write().await;
            let Some(job) = jobs.get_mut(&job_id) else {
                return None;
            };
            if !job.status.can_advance_to(&JobStatus::Running) {
                warn!(
                    event = "transition_blocked",
                    job_id = %job_id,
                    from = %job.status,
                    to = %JobStatus::Running
                );
                return None;
            }
            job.status = JobStatus::Running;
            let snapshot = job.clone();
            self.checkpoint(&jobs);
            snapshot
        };

        let kind = snapshot.kind.clone();
        let payload = snapshot.data.clone();
        self.feed
            .broadcast(&JobFeedFrame::JobUpdate(snapshot))
            .await;
        Some((kind, payload))
    }

    async fn finish_job(&self, job_id: Uuid, outcome: Result<Value, String>) {
        let next = match &outcome {
            Ok(_) => JobStatus::Completed,
            Err(_) => JobStatus::Failed,
        };

        let snapshot = {
            let mut jobs = self.jobs.write().await;
            let Some(job) = jobs.get_mut(&job_id) else {
                // Reaped by the retention sweep while executing.
                return;
            };
            if !job.status.can_advance_to(&next) {
                warn!(
                    event = "transition_blocked",
                    job_id = %job_id,
                    from = %job.status,
                    to = %next
                );
                return;
            }
            match outcome {
                Ok(result) => job.complete(result),
                Err(error) => job.fail(error),
            }
            let snapshot = job.clone();
            self.checkpoint(&jobs);
            snapshot
        };

        let frame = if snapshot.status == JobStatus::Completed {
            info!(event = "job_completed", job_id = %snapshot.id, kind = %snapshot.kind);
            JobFeedFrame::JobCompleted(snapshot)
        } else {
            warn!(
                event = "job_failed",
                job_id = %snapshot.id,
                kind = %snapshot.kind,
                error = snapshot.error.as_deref().unwrap_or("")
            );
            JobFeedFrame::JobFailed(snapshot)
        };
        self.feed.broadcast(&frame).await;
    }

    // Transitions after submit keep going when a checkpoint write
    // fails: the registry stays authoritative in memory and the next
    // full-map write heals the file.
    fn checkpoint(&self, jobs: &HashMap<Uuid, AgentJob>) {
        if let Err(err) = self.store.save_jobs(jobs) {
            error!(event = "checkpoint_failed", error = %err);
        }
    }
}

fn fail_interrupted_jobs(jobs: &mut HashMap<Uuid, AgentJob>) -> usize {
    let mut interrupted = 0;
    for job in jobs.values_mut() {
        if job.is_active() {
            job.fail("interrupted by restart");
            interrupted += 1;
        }
    }
    interrupted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::SimulatedProvider;
    use serde_json::json;

    fn coordinator(config: CoordinatorConfig) -> Arc<AgentCoordinator> {
        let store = Arc::new(HealthStore::open_in_memory().expect("open store"));
        let provider: Arc<dyn AgentProvider> = Arc::new(SimulatedProvider::instant());
        Arc::new(AgentCoordinator::new(store, provider, config).expect("coordinator"))
    }

    fn terminal_job(kind: JobKind, status: JobStatus, age_days: i64) -> AgentJob {
        let mut job = AgentJob::new(kind, Value::Null);
        job.created_at = Utc::now() - chrono::Duration::days(age_days);
        match status {
            JobStatus::Completed => job.complete(json!({"ok": true})),
            JobStatus::Failed => job.fail("scripted failure"),
            other => job.status = other,
        }
        job
    }

    #[tokio::test]
    async fn unknown_kind_is_rejected_without_a_record() {
        let coordinator = coordinator(CoordinatorConfig::default());

        let err = coordinator
            .clone()
            .submit("summarize", Value::Null)
            .await
            .expect_err("unknown kind must fail");
        assert!(matches!(err, CoordinatorError::InvalidKind(_)));
        assert!(err.to_string().contains("summarize"));

        let stats = coordinator.stats().await;
        assert_eq!(stats.total_jobs, 0);
    }

    #[tokio::test]
    async fn list_filters_sorts_and_pages() {
        let coordinator = coordinator(CoordinatorConfig::default());
        {
            let mut jobs = coordinator.jobs.write().await;
            for (kind, status, age) in [
                (JobKind::Transcribe, JobStatus::Completed, 3),
                (JobKind::Process, JobStatus::Failed, 2),
                (JobKind::Gem, JobStatus::Completed, 1),
                (JobKind::Anon, JobStatus::Completed, 0),
            ] {
                let job = terminal_job(kind, status, age);
                jobs.insert(job.id, job);
            }
        }

        let page = coordinator.list(None, None).await;
        assert_eq!(page.total, 4);
        assert_eq!(page.jobs.len(), 4);
        assert_eq!(page.jobs[0].kind, JobKind::Anon);
        assert_eq!(page.jobs[3].kind, JobKind::Transcribe);

        let completed = coordinator.list(Some(JobStatus::Completed), Some(2)).await;
        assert_eq!(completed.total, 3);
        assert_eq!(completed.jobs.len(), 2);
        assert_eq!(completed.jobs[0].kind, JobKind::Anon);
        assert_eq!(completed.jobs[1].kind, JobKind::Gem);
    }

    #[tokio::test]
    async fn stats_tally_every_bucket() {
        let coordinator = coordinator(CoordinatorConfig::default());
        {
            let mut jobs = coordinator.jobs.write().await;
            for (status, age) in [
                (JobStatus::Completed, 1),
                (JobStatus::Completed, 2),
                (JobStatus::Failed, 1),
            ] {
                let job = terminal_job(JobKind::Process, status, age);
                jobs.insert(job.id, job);
            }
        }

        let stats = coordinator.stats().await;
        assert_eq!(stats.total_jobs, 3);
        assert_eq!(stats.completed_jobs, 2);
        assert_eq!(stats.failed_jobs, 1);
        assert_eq!(stats.pending_jobs, 0);
        assert_eq!(stats.running_jobs, 0);
    }

    #[tokio::test]
    async fn sweep_keeps_fresh_and_active_jobs() {
        let coordinator = coordinator(CoordinatorConfig::default());
        let (old_id, fresh_id, active_id) = {
            let mut jobs = coordinator.jobs.write().await;

            let mut old = terminal_job(JobKind::Process, JobStatus::Completed, 10);
            old.completed_at = Some(Utc::now() - chrono::Duration::days(8));
            let fresh = terminal_job(JobKind::Gem, JobStatus::Failed, 1);
            let mut active = AgentJob::new(JobKind::Anon, Value::Null);
            active.status = JobStatus::Running;

            let ids = (old.id, fresh.id, active.id);
            jobs.insert(old.id, old);
            jobs.insert(fresh.id, fresh);
            jobs.insert(active.id, active);
            ids
        };

        let removed = coordinator.sweep_expired().await;
        assert_eq!(removed, 1);
        assert!(matches!(
            coordinator.get(old_id).await,
            Err(CoordinatorError::NotFound)
        ));
        assert!(coordinator.get(fresh_id).await.is_ok());
        assert!(coordinator.get(active_id).await.is_ok());

        // The trimmed registry is what the checkpoint now holds.
        let persisted = coordinator.store.load_jobs().expect("load checkpoint");
        assert_eq!(persisted.len(), 2);
        assert!(!persisted.contains_key(&old_id));
    }
}
