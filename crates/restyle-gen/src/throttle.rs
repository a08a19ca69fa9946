//! Serialized, paced dispatch of outbound calls.
//!
//! A [`Throttler`] owns a queue of pending calls and a single drain task
//! that runs them one at a time, keeping at least
//! [`ThrottleConfig::min_interval`] between the start of two consecutive
//! dispatches. A call whose error carries a rate-limit signal is put back
//! at the head of the queue after the suggested backoff, so calls that
//! arrived later never overtake it. Any other error goes straight back to
//! the caller.
//!
//! The drain task exists only while there is work. It goes back to idle
//! while holding the queue lock, and only after seeing the queue empty, so
//! a submission can never land in a queue that nobody is draining.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::time::{sleep, Instant};

use crate::config::ThrottleConfig;

/// A "slow down" answer from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// How long the provider asked us to wait, if it said.
    pub retry_after: Option<Duration>,
}

/// Error types that can flow through a [`Throttler`].
pub trait Throttled: Sized {
    /// `Some` when this error is a rate-limit signal and the call should be
    /// retried.
    fn rate_limit(&self) -> Option<RateLimit>;

    /// Wrap the last rate-limit error of a call that hit the retry cap.
    fn exhausted(self, retries: u32) -> Self;

    /// The error a caller sees when its call was dropped unanswered.
    fn abandoned() -> Self;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainState {
    Idle,
    Draining,
}

enum Dispatched {
    Settled,
    RateLimited { signal: RateLimit, retries: u32 },
}

#[async_trait]
trait Dispatch: Send {
    fn id(&self) -> u64;

    /// Run the operation once. Settles the caller unless the result is a
    /// rate limit that should be retried.
    async fn dispatch(&mut self) -> Dispatched;
}

struct QueuedCall<F, T, E> {
    id: u64,
    operation: F,
    retries: u32,
    max_retries: Option<u32>,
    reply: Option<oneshot::Sender<Result<T, E>>>,
}

#[async_trait]
impl<F, Fut, T, E> Dispatch for QueuedCall<F, T, E>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Throttled + Send + 'static,
{
    fn id(&self) -> u64 {
        self.id
    }

    async fn dispatch(&mut self) -> Dispatched {
        let result = match (self.operation)().await {
            Err(err) => match err.rate_limit() {
                Some(signal) if self.max_retries.is_none_or(|max| self.retries < max) => {
                    self.retries += 1;
                    return Dispatched::RateLimited {
                        signal,
                        retries: self.retries,
                    };
                }
                Some(_) => Err(err.exhausted(self.retries)),
                None => Err(err),
            },
            ok => ok,
        };

        if let Some(reply) = self.reply.take() {
            if reply.send(result).is_err() {
                log::debug!("caller of throttled call {} stopped waiting", self.id);
            }
        }
        Dispatched::Settled
    }
}

struct Queue {
    calls: VecDeque<Box<dyn Dispatch>>,
    state: DrainState,
    last_dispatch: Option<Instant>,
}

struct Shared {
    queue: Mutex<Queue>,
    config: ThrottleConfig,
    next_id: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        // Nothing panics while holding the lock, but a poisoned queue is
        // still structurally sound.
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Serializes and paces calls to a rate-limited service.
///
/// Create one per provider at startup and share it; clones refer to the
/// same queue.
#[derive(Clone)]
pub struct Throttler {
    shared: Arc<Shared>,
}

impl Throttler {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(Queue {
                    calls: VecDeque::new(),
                    state: DrainState::Idle,
                    last_dispatch: None,
                }),
                config,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.shared.config
    }

    /// Number of calls waiting for their turn, excluding one in flight or
    /// backing off.
    pub fn pending(&self) -> usize {
        self.shared.lock().calls.len()
    }

    pub fn is_draining(&self) -> bool {
        self.shared.lock().state == DrainState::Draining
    }

    /// Queue `operation` and wait for its result.
    ///
    /// The operation may run more than once: every attempt that fails with
    /// a rate-limit signal is retried after the backoff, ahead of anything
    /// queued since. The first non-rate-limit outcome is returned. Dropping
    /// the returned future does not remove the call from the queue.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn submit<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Throttled + Send + 'static,
    {
        let (reply, answer) = oneshot::channel();
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let call = QueuedCall {
            id,
            operation,
            retries: 0,
            max_retries: self.shared.config.max_rate_limit_retries,
            reply: Some(reply),
        };

        let start_drain = {
            let mut queue = self.shared.lock();
            queue.calls.push_back(Box::new(call));
            log::debug!("queued call {} ({} waiting)", id, queue.calls.len());
            if queue.state == DrainState::Idle {
                queue.state = DrainState::Draining;
                true
            } else {
                false
            }
        };

        if start_drain {
            tokio::spawn(drain(Arc::clone(&self.shared)));
        }

        answer.await.unwrap_or_else(|_| Err(E::abandoned()))
    }
}

impl fmt::Debug for Throttler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.shared.lock();
        f.debug_struct("Throttler")
            .field("config", &self.shared.config)
            .field("pending", &queue.calls.len())
            .field("state", &queue.state)
            .finish()
    }
}

/// Restarts draining if the drain task dies mid-call.
struct DrainGuard {
    shared: Arc<Shared>,
    finished: bool,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut queue = self.shared.lock();
        if queue.calls.is_empty() {
            queue.state = DrainState::Idle;
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                drop(queue);
                log::warn!("throttle drain task stopped early; restarting");
                handle.spawn(drain(Arc::clone(&self.shared)));
            }
            Err(_) => queue.state = DrainState::Idle,
        }
    }
}

async fn drain(shared: Arc<Shared>) {
    let mut guard = DrainGuard {
        shared: Arc::clone(&shared),
        finished: false,
    };

    loop {
        let wait = {
            let mut queue = shared.lock();
            if queue.calls.is_empty() {
                queue.state = DrainState::Idle;
                guard.finished = true;
                log::debug!("throttle queue drained");
                return;
            }
            queue.last_dispatch.map_or(Duration::ZERO, |last| {
                shared.config.min_interval().saturating_sub(last.elapsed())
            })
        };

        if !wait.is_zero() {
            log::info!(
                "Rate limit: waiting {}ms before next request",
                wait.as_millis()
            );
            sleep(wait).await;
        }

        // Only this task pops or pushes to the front, so the head is the
        // call we waited for.
        let mut call = {
            let mut queue = shared.lock();
            match queue.calls.pop_front() {
                Some(call) => {
                    queue.last_dispatch = Some(Instant::now());
                    call
                }
                None => continue,
            }
        };

        let id = call.id();
        log::debug!("dispatching call {}", id);

        match call.dispatch().await {
            Dispatched::Settled => {}
            Dispatched::RateLimited { signal, retries } => {
                let backoff = signal
                    .retry_after
                    .unwrap_or_else(|| shared.config.default_retry_after());
                log::warn!(
                    "Rate limited on call {} (retry {}); retrying after {}ms",
                    id,
                    retries,
                    backoff.as_millis()
                );
                sleep(backoff).await;
                shared.lock().calls.push_front(call);
            }
        }
    }
}
