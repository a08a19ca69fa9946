//! Waiting for asynchronous generation jobs.
//!
//! The provider only offers a status endpoint, so [`Poller`] asks it once
//! per interval until the job is terminal or the attempt budget runs out.
//! Status fetching sits behind [`StatusSource`]; a push-based delivery
//! would replace this module without touching callers.

use async_trait::async_trait;
use backon::{ConstantBuilder, Retryable};
use restyle_core::model::{JobStatus, Prediction};
use tokio::time::sleep;

use crate::config::PollConfig;
use crate::error::{GenError, GenResult};

/// Something that can report the current state of a job.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self, id: &str) -> GenResult<Prediction>;
}

/// Outcome of a single poll that did not finish the wait.
#[derive(Debug)]
enum PollError {
    Pending(JobStatus),
    /// The fetch itself failed in a way worth asking again.
    Transient(GenError),
    Fatal(GenError),
}

impl PollError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Pending(_) | Self::Transient(_))
    }
}

/// Polls a [`StatusSource`] at a fixed cadence until a job is terminal.
#[derive(Debug, Clone)]
pub struct Poller<S> {
    source: S,
    config: PollConfig,
}

impl<S: StatusSource> Poller<S> {
    pub fn new(source: S, config: PollConfig) -> Self {
        Self { source, config }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Wait for job `id` to finish.
    ///
    /// Every status fetch is preceded by one poll interval, so a job that
    /// never finishes fails after exactly `max_attempts` intervals.
    ///
    /// # Errors
    /// - [`GenError::JobFailed`] as soon as the job reports `failed`.
    /// - [`GenError::PollTimeout`] when the budget runs out first.
    /// - Any other error from the status fetch, unchanged. Rate-limited and
    ///   5xx fetches only use up an attempt.
    pub async fn await_completion(&self, id: &str) -> GenResult<Prediction> {
        let attempts = self.config.max_attempts;
        if attempts == 0 {
            return Err(GenError::PollTimeout {
                id: id.to_string(),
                attempts: 0,
            });
        }

        let interval = self.config.interval();
        let backoff = ConstantBuilder::default()
            .with_delay(interval)
            .with_max_times(attempts as usize - 1);

        sleep(interval).await;
        let outcome = (|| self.poll_once(id))
            .retry(backoff)
            .sleep(sleep)
            .when(PollError::is_retryable)
            .notify(|e, _| match e {
                PollError::Pending(status) => log::debug!("prediction {} is {}", id, status),
                PollError::Transient(err) => {
                    log::warn!("status fetch for prediction {} failed: {}", id, err);
                }
                PollError::Fatal(_) => {}
            })
            .await;

        match outcome {
            Ok(prediction) => {
                log::info!("prediction {} succeeded", id);
                Ok(prediction)
            }
            Err(PollError::Pending(status)) => {
                log::warn!(
                    "gave up on prediction {} after {} polls (last status: {})",
                    id,
                    attempts,
                    status
                );
                Err(GenError::PollTimeout {
                    id: id.to_string(),
                    attempts,
                })
            }
            Err(PollError::Transient(err)) => {
                log::warn!(
                    "gave up on prediction {} after {} polls (last error: {})",
                    id,
                    attempts,
                    err
                );
                Err(GenError::PollTimeout {
                    id: id.to_string(),
                    attempts,
                })
            }
            Err(PollError::Fatal(err)) => Err(err),
        }
    }

    async fn poll_once(&self, id: &str) -> Result<Prediction, PollError> {
        // A rate limit must never leave the poller, or the throttler re-runs
        // job creation.
        let prediction = self.source.fetch_status(id).await.map_err(|err| {
            let server_side = matches!(err, GenError::Api { status, .. } if status >= 500);
            if err.is_rate_limited() || server_side {
                PollError::Transient(err)
            } else {
                PollError::Fatal(err)
            }
        })?;

        match prediction.status {
            JobStatus::Succeeded => Ok(prediction),
            JobStatus::Failed => Err(PollError::Fatal(GenError::JobFailed {
                id: id.to_string(),
                message: prediction
                    .error_message()
                    .unwrap_or_else(|| "Prediction failed".to_string()),
            })),
            JobStatus::Pending(_) => Err(PollError::Pending(prediction.status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    /// Replays a fixed list of statuses, then keeps answering `processing`.
    /// `"429"` and `"503"` stand for failed fetches with that status.
    #[derive(Debug, Default)]
    struct ScriptedSource {
        statuses: Mutex<VecDeque<&'static str>>,
        fetched_at: Mutex<Vec<Instant>>,
        fail_fetch: bool,
    }

    impl ScriptedSource {
        fn new(statuses: &[&'static str]) -> Self {
            Self {
                statuses: Mutex::new(statuses.iter().copied().collect()),
                ..Self::default()
            }
        }

        fn fetches(&self) -> Vec<Instant> {
            self.fetched_at.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StatusSource for ScriptedSource {
        async fn fetch_status(&self, id: &str) -> GenResult<Prediction> {
            self.fetched_at.lock().unwrap().push(Instant::now());
            if self.fail_fetch {
                return Err(GenError::Api {
                    status: 404,
                    message: "not found".into(),
                });
            }
            let status = self
                .statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or("processing");
            match status {
                "429" => {
                    return Err(GenError::RateLimited {
                        retry_after: Some(Duration::from_secs(1)),
                        message: "Request was throttled".into(),
                    })
                }
                "503" => {
                    return Err(GenError::Api {
                        status: 503,
                        message: "Service Unavailable".into(),
                    })
                }
                _ => {}
            }
            let prediction = Prediction::new(id, status);
            Ok(match status {
                "succeeded" => prediction.with_output(serde_json::json!(["https://out/1.jpg"])),
                "failed" => prediction.with_error("CUDA out of memory"),
                _ => prediction,
            })
        }
    }

    fn config(max_attempts: u32) -> PollConfig {
        PollConfig {
            interval_ms: 1_000,
            max_attempts,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_three_polls() {
        let poller = Poller::new(
            ScriptedSource::new(&["starting", "processing", "succeeded"]),
            config(60),
        );
        let start = Instant::now();

        let prediction = poller.await_completion("p1").await.unwrap();

        assert_eq!(prediction.status, JobStatus::Succeeded);
        assert_eq!(prediction.output_url(), Some("https://out/1.jpg"));
        let fetches = poller.source().fetches();
        assert_eq!(fetches.len(), 3);
        assert!(fetches[0] - start >= Duration::from_secs(1));
        for pair in fetches.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_budget() {
        let poller = Poller::new(ScriptedSource::new(&[]), config(60));
        let start = Instant::now();

        let err = poller.await_completion("p1").await.unwrap_err();

        assert!(matches!(
            err,
            GenError::PollTimeout { ref id, attempts: 60 } if id == "p1"
        ));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(60));
        assert!(elapsed < Duration::from_secs(61));
        assert_eq!(poller.source().fetches().len(), 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_status_stops_immediately() {
        let poller = Poller::new(ScriptedSource::new(&["failed"]), config(60));

        let err = poller.await_completion("p1").await.unwrap_err();

        assert!(matches!(
            err,
            GenError::JobFailed { ref message, .. } if message == "CUDA out of memory"
        ));
        assert_eq!(poller.source().fetches().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_canceled_is_not_terminal() {
        let poller = Poller::new(ScriptedSource::new(&["canceled", "succeeded"]), config(5));
        let prediction = poller.await_completion("p1").await.unwrap();
        assert_eq!(prediction.status, JobStatus::Succeeded);
        assert_eq!(poller.source().fetches().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_error_is_propagated() {
        let source = ScriptedSource {
            fail_fetch: true,
            ..ScriptedSource::default()
        };
        let poller = Poller::new(source, config(60));

        let err = poller.await_completion("p1").await.unwrap_err();

        assert!(matches!(err, GenError::Api { status: 404, .. }));
        assert_eq!(poller.source().fetches().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_fetch_keeps_polling() {
        let poller = Poller::new(ScriptedSource::new(&["429", "503", "succeeded"]), config(60));

        let prediction = poller.await_completion("p1").await.unwrap();

        assert_eq!(prediction.id, "p1");
        assert_eq!(prediction.status, JobStatus::Succeeded);
        assert_eq!(poller.source().fetches().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_fetches_count_against_budget() {
        let poller = Poller::new(ScriptedSource::new(&["429", "429", "429"]), config(3));

        let err = poller.await_completion("p1").await.unwrap_err();

        assert!(matches!(err, GenError::PollTimeout { attempts: 3, .. }));
        assert!(!err.is_rate_limited());
        assert_eq!(poller.source().fetches().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_budget_times_out_without_polling() {
        let poller = Poller::new(ScriptedSource::new(&["succeeded"]), config(0));
        let err = poller.await_completion("p1").await.unwrap_err();
        assert!(matches!(err, GenError::PollTimeout { attempts: 0, .. }));
        assert!(poller.source().fetches().is_empty());
    }
}
