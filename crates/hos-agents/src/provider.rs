use futures_util::future::BoxFuture;
use hos_core::JobKind;
use rand::Rng;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider rejected job: {0}")]
    Rejected(String),
    #[error("provider failed: {0}")]
    Failed(String),
}

// Execution backend for agent jobs. The coordinator owns timeouts and
// status bookkeeping; implementations only turn a payload into a result.
pub trait AgentProvider: Send + Sync {
    fn run(&self, kind: JobKind, payload: Value) -> BoxFuture<'_, Result<Value, ProviderError>>;
}

// Stand-in for the transcription and analysis backends. Sleeps for a
// jittered interval, then fabricates a plausible result per kind.
pub struct SimulatedProvider {
    base_delay: Duration,
    jitter: Duration,
}

impl SimulatedProvider {
    pub fn new(base_delay: Duration, jitter: Duration) -> Self {
        Self { base_delay, jitter }
    }

    pub fn instant() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    fn sample_delay(&self) -> Duration {
        // Jitter is sampled at millisecond granularity; anything finer
        // rounds down to none.
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.base_delay;
        }
        let extra = rand::thread_rng().gen_range(0..jitter_ms);
        self.base_delay + Duration::from_millis(extra)
    }
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(3))
    }
}

impl AgentProvider for SimulatedProvider {
    fn run(&self, kind: JobKind, _payload: Value) -> BoxFuture<'_, Result<Value, ProviderError>> {
        let delay = self.sample_delay();
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            Ok(simulated_result(&kind))
        })
    }
}

pub fn simulated_result(kind: &JobKind) -> Value {
    match kind {
        JobKind::Transcribe => json!({
            "text": "Sample transcription output...",
            "duration": "2m 34s",
            "speakers": 2,
        }),
        JobKind::Process => json!({
            "documents": 5,
            "processed": 5,
            "errors": 0,
        }),
        JobKind::Asl => json!({
            "analysis": "Linguistic analysis complete",
            "features": ["feature1", "feature2"],
        }),
        JobKind::Dim => json!({
            "dimensions": 12,
            "scores": [0.8, 0.6, 0.9],
        }),
        JobKind::Gem => json!({
            "profile": "Profile generated",
            "traits": ["trait1", "trait2"],
        }),
        JobKind::Anon => json!({
            "anonymized": true,
            "redacted": 23,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_a_fabricated_result() {
        for kind in JobKind::all() {
            let result = simulated_result(&kind);
            assert!(result.is_object(), "{kind} result should be an object");
        }
        assert_eq!(simulated_result(&JobKind::Anon)["redacted"], 23);
        assert_eq!(simulated_result(&JobKind::Dim)["dimensions"], 12);
    }

    #[test]
    fn sampled_delay_stays_within_the_jitter_window() {
        let provider =
            SimulatedProvider::new(Duration::from_millis(100), Duration::from_millis(50));
        for _ in 0..32 {
            let delay = provider.sample_delay();
            assert!(delay >= Duration::from_millis(100));
            assert!(delay < Duration::from_millis(150));
        }

        assert_eq!(
            SimulatedProvider::instant().sample_delay(),
            Duration::ZERO
        );
    }

    #[test]
    fn sub_millisecond_jitter_rounds_down_to_none() {
        let provider =
            SimulatedProvider::new(Duration::from_millis(5), Duration::from_micros(400));
        for _ in 0..8 {
            assert_eq!(provider.sample_delay(), Duration::from_millis(5));
        }
    }

    #[tokio::test]
    async fn instant_provider_resolves_immediately() {
        let provider = SimulatedProvider::instant();
        let result = provider
            .run(JobKind::Transcribe, Value::Null)
            .await
            .expect("simulated run succeeds");
        assert_eq!(result["speakers"], 2);
    }
}
