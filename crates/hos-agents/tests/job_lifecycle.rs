use futures_util::future::BoxFuture;
use hos_agents::{
    AgentCoordinator, AgentProvider, CoordinatorConfig, CoordinatorError, ProviderError,
};
use hos_core::wire::JobFeedFrame;
use hos_core::{AgentJob, JobKind, JobStatus};
use hos_storage::HealthStore;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};
use uuid::Uuid;

enum Script {
    Succeed(Value),
    Fail(String),
    Hang,
    AwaitGate(watch::Receiver<bool>, Value),
}

// Provider that replays a fixed sequence of outcomes, one per job, so
// each test controls exactly how and when its jobs finish.
struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
}

impl ScriptedProvider {
    fn new(scripts: impl IntoIterator<Item = Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
        }
    }
}

impl AgentProvider for ScriptedProvider {
    fn run(&self, _kind: JobKind, _payload: Value) -> BoxFuture<'_, Result<Value, ProviderError>> {
        let script = self
            .scripts
            .lock()
            .expect("scripts lock")
            .pop_front()
            .unwrap_or(Script::Succeed(json!({"ok": true})));
        Box::pin(async move {
            match script {
                Script::Succeed(value) => Ok(value),
                Script::Fail(message) => Err(ProviderError::Failed(message)),
                Script::Hang => std::future::pending().await,
                Script::AwaitGate(mut gate, value) => {
                    gate.wait_for(|open| *open).await.expect("gate sender alive");
                    Ok(value)
                }
            }
        })
    }
}

fn coordinator_with(
    store: Arc<HealthStore>,
    provider: ScriptedProvider,
    config: CoordinatorConfig,
) -> Arc<AgentCoordinator> {
    let provider: Arc<dyn AgentProvider> = Arc::new(provider);
    Arc::new(AgentCoordinator::new(store, provider, config).expect("coordinator"))
}

fn in_memory_store() -> Arc<HealthStore> {
    Arc::new(HealthStore::open_in_memory().expect("open store"))
}

async fn wait_for_status(
    coordinator: &AgentCoordinator,
    job_id: Uuid,
    wanted: JobStatus,
) -> AgentJob {
    for _ in 0..200 {
        let job = coordinator.get(job_id).await.expect("job exists");
        if job.status == wanted {
            return job;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} never reached {wanted}");
}

async fn next_frame(rx: &mut mpsc::Receiver<String>) -> JobFeedFrame {
    let raw = timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("frame within deadline")
        .expect("channel open");
    JobFeedFrame::parse(&raw).expect("frame parses")
}

#[tokio::test]
async fn submitted_job_runs_to_completion_and_is_checkpointed() {
    let store = in_memory_store();
    let provider = ScriptedProvider::new([Script::Succeed(json!({
        "text": "Sample transcription output...",
        "duration": "2m 34s",
    }))]);
    let coordinator = coordinator_with(store.clone(), provider, CoordinatorConfig::default());

    let job = coordinator
        .clone()
        .submit("transcribe", json!({"file": "visit-001.wav"}))
        .await
        .expect("submit succeeds");
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.kind, JobKind::Transcribe);
    assert!(job.completed_at.is_none());

    let done = wait_for_status(&coordinator, job.id, JobStatus::Completed).await;
    assert_eq!(done.result, Some(json!({
        "text": "Sample transcription output...",
        "duration": "2m 34s",
    })));
    assert!(done.completed_at.is_some());
    assert!(done.error.is_none());

    let persisted = store.load_jobs().expect("load checkpoint");
    assert_eq!(
        persisted.get(&job.id).map(|job| job.status.clone()),
        Some(JobStatus::Completed)
    );
}

#[tokio::test]
async fn provider_failure_marks_the_job_failed() {
    let coordinator = coordinator_with(
        in_memory_store(),
        ScriptedProvider::new([Script::Fail("transcription model unavailable".into())]),
        CoordinatorConfig::default(),
    );

    let job = coordinator
        .clone()
        .submit("asl", Value::Null)
        .await
        .expect("submit succeeds");

    let failed = wait_for_status(&coordinator, job.id, JobStatus::Failed).await;
    let error = failed.error.expect("failure reason recorded");
    assert!(error.contains("transcription model unavailable"));
    assert!(failed.result.is_none());
    assert!(failed.completed_at.is_some());
}

#[tokio::test]
async fn stuck_execution_times_out_as_failure() {
    let config = CoordinatorConfig {
        execution_timeout: Duration::from_millis(50),
        ..CoordinatorConfig::default()
    };
    let coordinator = coordinator_with(
        in_memory_store(),
        ScriptedProvider::new([Script::Hang]),
        config,
    );

    let job = coordinator
        .clone()
        .submit("process", Value::Null)
        .await
        .expect("submit succeeds");

    let failed = wait_for_status(&coordinator, job.id, JobStatus::Failed).await;
    let error = failed.error.expect("timeout recorded as error");
    assert!(error.contains("timed out"));
}

#[tokio::test]
async fn feed_streams_snapshot_then_each_transition() {
    let (gate_tx, gate_rx) = watch::channel(false);
    let coordinator = coordinator_with(
        in_memory_store(),
        ScriptedProvider::new([Script::AwaitGate(gate_rx, json!({"dimensions": 12}))]),
        CoordinatorConfig::default(),
    );

    let (observer_id, mut rx) = coordinator.subscribe().await;
    match next_frame(&mut rx).await {
        JobFeedFrame::JobsList(jobs) => assert!(jobs.is_empty()),
        other => panic!("expected jobs_list first, got {other:?}"),
    }

    let job = coordinator
        .clone()
        .submit("dim", Value::Null)
        .await
        .expect("submit succeeds");

    match next_frame(&mut rx).await {
        JobFeedFrame::JobUpdate(update) => {
            assert_eq!(update.id, job.id);
            assert_eq!(update.status, JobStatus::Running);
        }
        other => panic!("expected job_update, got {other:?}"),
    }

    gate_tx.send(true).expect("open the gate");
    match next_frame(&mut rx).await {
        JobFeedFrame::JobCompleted(done) => {
            assert_eq!(done.id, job.id);
            assert_eq!(done.result, Some(json!({"dimensions": 12})));
        }
        other => panic!("expected job_completed, got {other:?}"),
    }

    coordinator.unsubscribe(observer_id).await;
    assert_eq!(coordinator.observer_count().await, 0);
}

#[tokio::test]
async fn subscriber_joining_mid_run_misses_no_transition() {
    let (gate_tx, gate_rx) = watch::channel(false);
    let coordinator = coordinator_with(
        in_memory_store(),
        ScriptedProvider::new([Script::AwaitGate(
            gate_rx,
            json!({"profile": "Profile generated"}),
        )]),
        CoordinatorConfig::default(),
    );

    let job = coordinator
        .clone()
        .submit("gem", Value::Null)
        .await
        .expect("submit succeeds");
    wait_for_status(&coordinator, job.id, JobStatus::Running).await;

    let (_, mut rx) = coordinator.subscribe().await;
    match next_frame(&mut rx).await {
        JobFeedFrame::JobsList(jobs) => {
            assert_eq!(jobs.len(), 1);
            assert_eq!(jobs[0].id, job.id);
            assert_eq!(jobs[0].status, JobStatus::Running);
        }
        other => panic!("expected jobs_list first, got {other:?}"),
    }

    gate_tx.send(true).expect("open the gate");
    match next_frame(&mut rx).await {
        JobFeedFrame::JobCompleted(done) => {
            assert_eq!(done.id, job.id);
            assert_eq!(done.result, Some(json!({"profile": "Profile generated"})));
        }
        other => panic!("expected job_completed, got {other:?}"),
    }
}

#[tokio::test]
async fn late_subscriber_snapshot_carries_existing_jobs() {
    let coordinator = coordinator_with(
        in_memory_store(),
        ScriptedProvider::new([Script::Succeed(json!({"anonymized": true}))]),
        CoordinatorConfig::default(),
    );

    let job = coordinator
        .clone()
        .submit("anon", Value::Null)
        .await
        .expect("submit succeeds");
    wait_for_status(&coordinator, job.id, JobStatus::Completed).await;

    let (_, mut rx) = coordinator.subscribe().await;
    match next_frame(&mut rx).await {
        JobFeedFrame::JobsList(jobs) => {
            assert_eq!(jobs.len(), 1);
            assert_eq!(jobs[0].id, job.id);
            assert_eq!(jobs[0].status, JobStatus::Completed);
        }
        other => panic!("expected jobs_list first, got {other:?}"),
    }
}

#[tokio::test]
async fn saturated_registry_rejects_new_submissions() {
    let config = CoordinatorConfig {
        max_active_jobs: 2,
        ..CoordinatorConfig::default()
    };
    let coordinator = coordinator_with(
        in_memory_store(),
        ScriptedProvider::new([Script::Hang, Script::Hang]),
        config,
    );

    for _ in 0..2 {
        coordinator
            .clone()
            .submit("gem", Value::Null)
            .await
            .expect("submit under the limit succeeds");
    }

    let err = coordinator
        .clone()
        .submit("gem", Value::Null)
        .await
        .expect_err("third submission is over the limit");
    assert!(matches!(
        err,
        CoordinatorError::Saturated { active: 2, limit: 2 }
    ));

    let stats = coordinator.stats().await;
    assert_eq!(stats.total_jobs, 2);
}

#[tokio::test]
async fn restart_fails_jobs_interrupted_mid_flight() {
    let file = NamedTempFile::new().expect("temp db file");
    let path = file.path().to_path_buf();

    let store = Arc::new(HealthStore::open(&path).expect("open store"));
    let coordinator = coordinator_with(
        store,
        ScriptedProvider::new([Script::Hang]),
        CoordinatorConfig::default(),
    );
    let job = coordinator
        .clone()
        .submit("transcribe", Value::Null)
        .await
        .expect("submit succeeds");
    wait_for_status(&coordinator, job.id, JobStatus::Running).await;

    // A second coordinator over the same file plays the restart.
    let store = Arc::new(HealthStore::open(&path).expect("reopen store"));
    let recovered = coordinator_with(
        store,
        ScriptedProvider::new([]),
        CoordinatorConfig::default(),
    );

    let failed = recovered.get(job.id).await.expect("job survived restart");
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("interrupted by restart"));
    assert!(failed.completed_at.is_some());

    let stats = recovered.stats().await;
    assert_eq!(stats.failed_jobs, 1);
    assert_eq!(stats.running_jobs, 0);
}

#[tokio::test]
async fn retention_sweep_drops_expired_jobs_from_a_loaded_registry() {
    let store = in_memory_store();

    let mut seeded = HashMap::new();
    let mut expired = AgentJob::new(JobKind::Process, Value::Null);
    expired.status = JobStatus::Running;
    expired.complete(json!({"documents": 5}));
    expired.completed_at = Some(chrono::Utc::now() - chrono::Duration::days(8));
    let mut fresh = AgentJob::new(JobKind::Gem, Value::Null);
    fresh.status = JobStatus::Running;
    fresh.fail("scripted failure");
    seeded.insert(expired.id, expired.clone());
    seeded.insert(fresh.id, fresh.clone());
    store.save_jobs(&seeded).expect("seed checkpoint");

    let coordinator = coordinator_with(
        store.clone(),
        ScriptedProvider::new([]),
        CoordinatorConfig::default(),
    );
    assert_eq!(coordinator.stats().await.total_jobs, 2);

    let removed = coordinator.sweep_expired().await;
    assert_eq!(removed, 1);
    assert!(matches!(
        coordinator.get(expired.id).await,
        Err(CoordinatorError::NotFound)
    ));
    assert!(coordinator.get(fresh.id).await.is_ok());

    let persisted = store.load_jobs().expect("load checkpoint");
    assert!(!persisted.contains_key(&expired.id));
    assert!(persisted.contains_key(&fresh.id));
}
