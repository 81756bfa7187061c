//! Queue consumer that fans deliveries out to independent tasks.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use geocore_queue::{DEFAULT_QUEUE_NAME, WorkQueue};
use strum_macros::Display;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::{DeliveryError, DeliveryOutcome, RetryPolicy, WebhookSink};

/// Default pause after a dequeue error that was not a cancellation.
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Lifecycle of a [`DeliveryWorker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum WorkerState {
    /// Created but [`DeliveryWorker::run`] has not been called.
    Idle,
    /// Consuming the queue.
    Running,
    /// Shutdown requested; waiting for in-flight deliveries.
    Draining,
    /// The run loop has exited.
    Stopped,
}

/// Tunables for a [`DeliveryWorker`].
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Queue to consume.
    pub queue_name: String,
    /// Attempt count, backoff, and per-attempt timeout.
    pub retry: RetryPolicy,
    /// Pause after a non-cancellation dequeue error.
    pub error_backoff: Duration,
    /// Where payloads go after exhausting their attempts. `None` drops them.
    pub dead_letter_queue: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            retry: RetryPolicy::default(),
            error_backoff: DEFAULT_ERROR_BACKOFF,
            dead_letter_queue: None,
        }
    }
}

/// Drains a queue and delivers each payload to a [`WebhookSink`].
///
/// Cloning is cheap; clones share state and the in-flight task set.
#[derive(Clone)]
pub struct DeliveryWorker {
    queue: Arc<dyn WorkQueue>,
    sink: Arc<dyn WebhookSink>,
    config: Arc<WorkerConfig>,
    state: Arc<Mutex<WorkerState>>,
    in_flight: TaskTracker,
}

impl DeliveryWorker {
    /// Creates a worker in [`WorkerState::Idle`]. Nothing is consumed until
    /// [`Self::run`] is called.
    #[must_use]
    pub fn new(queue: Arc<dyn WorkQueue>, sink: Arc<dyn WebhookSink>, config: WorkerConfig) -> Self {
        Self {
            queue,
            sink,
            config: Arc::new(config),
            state: Arc::new(Mutex::new(WorkerState::Idle)),
            in_flight: TaskTracker::new(),
        }
    }

    /// Current lifecycle state, shared by all clones.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: WorkerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
        log::debug!("Delivery worker on '{}' is {state}", self.config.queue_name);
    }

    /// Consumes the queue until `cancel` fires, then waits for in-flight
    /// deliveries to finish.
    pub async fn run(&self, cancel: CancellationToken) {
        let queue_name = self.config.queue_name.as_str();
        self.set_state(WorkerState::Running);
        log::info!("Delivery worker consuming '{queue_name}'");

        loop {
            match self.queue.dequeue(queue_name, &cancel).await {
                Ok(payload) => {
                    let worker = self.clone();
                    self.in_flight.spawn(async move {
                        worker.deliver(&payload).await;
                    });
                }
                Err(e) if e.is_cancelled() => break,
                Err(e) => {
                    log::error!(
                        "Failed to dequeue from '{queue_name}', retrying in {:?}: {e}",
                        self.config.error_backoff
                    );
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(self.config.error_backoff) => {}
                    }
                }
            }
        }

        self.set_state(WorkerState::Draining);
        self.in_flight.close();
        if !self.in_flight.is_empty() {
            log::info!(
                "Waiting for {} in-flight deliveries before stopping",
                self.in_flight.len()
            );
        }
        self.in_flight.wait().await;
        self.set_state(WorkerState::Stopped);
        log::info!("Delivery worker on '{queue_name}' stopped");
    }

    /// Delivers one payload under the configured [`RetryPolicy`].
    ///
    /// A pause of `delay_for(attempt)` follows every failed attempt,
    /// including the last.
    pub async fn deliver(&self, payload: &str) -> DeliveryOutcome {
        let policy = self.config.retry;
        let max_attempts = policy.attempts();
        let mut last_error = None;

        for attempt in 0..max_attempts {
            let result = tokio::time::timeout(policy.attempt_timeout, self.sink.send(payload))
                .await
                .unwrap_or(Err(DeliveryError::Timeout {
                    timeout: policy.attempt_timeout,
                }));

            match result {
                Ok(()) => {
                    log::info!("Webhook delivered on attempt {}/{max_attempts}", attempt + 1);
                    return DeliveryOutcome::Delivered {
                        attempts: attempt + 1,
                    };
                }
                Err(e) => {
                    let delay = policy.delay_for(attempt);
                    log::warn!(
                        "Webhook attempt {}/{max_attempts} failed, backing off {delay:?}: {e}",
                        attempt + 1
                    );
                    last_error = Some(e);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        let last_error = last_error.map_or_else(String::new, |e| e.to_string());
        log::error!("Given up on webhook after {max_attempts} attempts: {last_error}");

        if let Some(dead_letter) = &self.config.dead_letter_queue {
            match self.queue.enqueue(dead_letter, payload).await {
                Ok(()) => {
                    log::warn!("Moved undeliverable webhook to '{dead_letter}'");
                    return DeliveryOutcome::DeadLettered {
                        attempts: max_attempts,
                        queue: dead_letter.clone(),
                    };
                }
                Err(e) => {
                    log::error!("Failed to dead-letter webhook to '{dead_letter}': {e}");
                }
            }
        }

        DeliveryOutcome::Abandoned {
            attempts: max_attempts,
            last_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use async_trait::async_trait;
    use geocore_queue::{MemoryQueue, QueueError};

    use super::*;

    /// Replays scripted HTTP statuses (200 once exhausted) and records when
    /// each attempt happened.
    #[derive(Default)]
    struct ScriptedSink {
        statuses: Mutex<VecDeque<u16>>,
        attempts: Mutex<Vec<(Instant, String)>>,
        stall: Option<Duration>,
    }

    impl ScriptedSink {
        fn new(statuses: &[u16]) -> Self {
            Self {
                statuses: Mutex::new(statuses.iter().copied().collect()),
                ..Self::default()
            }
        }

        fn attempts(&self) -> Vec<(Instant, String)> {
            self.attempts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WebhookSink for ScriptedSink {
        async fn send(&self, payload: &str) -> Result<(), DeliveryError> {
            self.attempts
                .lock()
                .unwrap()
                .push((Instant::now(), payload.to_string()));
            if let Some(stall) = self.stall {
                tokio::time::sleep(stall).await;
            }
            let status = self.statuses.lock().unwrap().pop_front().unwrap_or(200);
            if status >= 400 {
                return Err(DeliveryError::Status { status });
            }
            Ok(())
        }
    }

    /// Fails the first `failures` dequeues, then delegates.
    struct FlakyQueue {
        inner: MemoryQueue,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl WorkQueue for FlakyQueue {
        async fn enqueue(&self, queue: &str, payload: &str) -> Result<(), QueueError> {
            self.inner.enqueue(queue, payload).await
        }

        async fn dequeue(
            &self,
            queue: &str,
            cancel: &CancellationToken,
        ) -> Result<String, QueueError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(QueueError::Backend {
                    message: "connection reset".to_string(),
                });
            }
            self.inner.dequeue(queue, cancel).await
        }
    }

    const UNIT: Duration = Duration::from_millis(20);

    fn config() -> WorkerConfig {
        WorkerConfig {
            queue_name: "tasks".to_string(),
            retry: RetryPolicy {
                max_attempts: 3,
                backoff_unit: UNIT,
                attempt_timeout: Duration::from_millis(200),
            },
            error_backoff: Duration::from_millis(10),
            dead_letter_queue: None,
        }
    }

    fn worker(sink: Arc<ScriptedSink>, config: WorkerConfig) -> (DeliveryWorker, Arc<MemoryQueue>) {
        let queue = Arc::new(MemoryQueue::new());
        (DeliveryWorker::new(queue.clone(), sink, config), queue)
    }

    async fn wait_for_attempts(sink: &ScriptedSink, count: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while sink.attempts().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn delivered_on_third_attempt_after_two_server_errors() {
        let sink = Arc::new(ScriptedSink::new(&[500, 500, 200]));
        let (worker, _queue) = worker(sink.clone(), config());

        let outcome = worker.deliver("{}").await;

        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 3 });
        let attempts = sink.attempts();
        assert_eq!(attempts.len(), 3);
        assert!(attempts[1].0 - attempts[0].0 >= UNIT);
        assert!(attempts[2].0 - attempts[1].0 >= UNIT * 3);
        assert!(attempts[2].0 - attempts[0].0 >= UNIT * 4);
    }

    #[tokio::test]
    async fn abandoned_after_three_attempts_with_linear_backoff() {
        let sink = Arc::new(ScriptedSink::new(&[503, 503, 503, 503]));
        let (worker, queue) = worker(sink.clone(), config());

        let started = Instant::now();
        let outcome = worker.deliver("payload").await;

        assert!(matches!(
            outcome,
            DeliveryOutcome::Abandoned { attempts: 3, ref last_error } if last_error.contains("503")
        ));
        assert_eq!(sink.attempts().len(), 3);
        assert!(started.elapsed() >= UNIT * 9);
        assert!(queue.is_empty("tasks"));
    }

    #[tokio::test]
    async fn slow_attempts_time_out() {
        let sink = Arc::new(ScriptedSink {
            stall: Some(Duration::from_secs(5)),
            ..ScriptedSink::default()
        });
        let mut config = config();
        config.retry.max_attempts = 2;
        config.retry.attempt_timeout = Duration::from_millis(20);
        let (worker, _queue) = worker(sink.clone(), config);

        let outcome = worker.deliver("{}").await;

        assert!(matches!(
            outcome,
            DeliveryOutcome::Abandoned { attempts: 2, .. }
        ));
        assert_eq!(sink.attempts().len(), 2);
    }

    #[tokio::test]
    async fn exhausted_payload_goes_to_dead_letter_queue() {
        let sink = Arc::new(ScriptedSink::new(&[500, 500, 500]));
        let mut config = config();
        config.dead_letter_queue = Some("tasks_dead".to_string());
        let (worker, queue) = worker(sink, config);

        let outcome = worker.deliver(r#"{"incident_id":3}"#).await;

        assert_eq!(
            outcome,
            DeliveryOutcome::DeadLettered {
                attempts: 3,
                queue: "tasks_dead".to_string(),
            }
        );
        let dead = queue
            .dequeue("tasks_dead", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(dead, r#"{"incident_id":3}"#);
    }

    #[tokio::test]
    async fn run_delivers_queued_payloads_until_cancelled() {
        let sink = Arc::new(ScriptedSink::new(&[]));
        let (worker, queue) = worker(sink.clone(), config());
        queue.enqueue("tasks", "one").await.unwrap();
        queue.enqueue("tasks", "two").await.unwrap();
        assert_eq!(worker.state(), WorkerState::Idle);

        let cancel = CancellationToken::new();
        let running = {
            let worker = worker.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.run(cancel).await })
        };

        wait_for_attempts(&sink, 2).await;
        queue.enqueue("tasks", "three").await.unwrap();
        wait_for_attempts(&sink, 3).await;
        assert_eq!(worker.state(), WorkerState::Running);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), running)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(worker.state(), WorkerState::Stopped);
        let mut payloads: Vec<String> = sink.attempts().into_iter().map(|(_, p)| p).collect();
        payloads.sort();
        assert_eq!(payloads, vec!["one", "three", "two"]);
    }

    #[tokio::test]
    async fn slow_delivery_does_not_block_consumption() {
        let sink = Arc::new(ScriptedSink {
            stall: Some(Duration::from_millis(150)),
            ..ScriptedSink::default()
        });
        let (worker, queue) = worker(sink.clone(), config());
        for payload in ["a", "b", "c"] {
            queue.enqueue("tasks", payload).await.unwrap();
        }

        let cancel = CancellationToken::new();
        let running = {
            let worker = worker.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.run(cancel).await })
        };

        // All three start before the first one finishes.
        tokio::time::timeout(Duration::from_millis(100), async {
            while sink.attempts().len() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), running)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn dequeue_errors_back_off_and_recover() {
        let sink = Arc::new(ScriptedSink::new(&[]));
        let queue = Arc::new(FlakyQueue {
            inner: MemoryQueue::new(),
            failures: AtomicUsize::new(2),
        });
        queue.enqueue("tasks", "after-errors").await.unwrap();
        let worker = DeliveryWorker::new(queue, sink.clone(), config());

        let cancel = CancellationToken::new();
        let running = {
            let worker = worker.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.run(cancel).await })
        };

        wait_for_attempts(&sink, 1).await;
        assert_eq!(sink.attempts()[0].1, "after-errors");

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), running)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn worker_is_idle_until_run() {
        let sink = Arc::new(ScriptedSink::new(&[]));
        let (worker, queue) = worker(sink.clone(), config());
        queue.enqueue("tasks", "waiting").await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(worker.state(), WorkerState::Idle);
        assert!(sink.attempts().is_empty());
        assert_eq!(
            queue
                .dequeue("tasks", &CancellationToken::new())
                .await
                .unwrap(),
            "waiting"
        );
    }

    #[test]
    fn state_display() {
        assert_eq!(WorkerState::Idle.to_string(), "idle");
        assert_eq!(WorkerState::Draining.to_string(), "draining");
    }
}
