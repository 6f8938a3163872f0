//! Polling resolvers driven by advisory queues.
//!
//! A [`PollingResolver`] runs `parallelism` independent loops. Each loop
//! receives a batch, handles every message concurrently, and sleeps for the
//! polling delay when the batch was empty. Loops stop cooperatively: the stop
//! flag is checked between batches and in-flight handling is allowed to finish.

pub mod claim;
pub mod deadline;
pub mod dependency;
pub mod report;

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, error, info};

use crate::config::ResolverConfig;
use crate::core::delay_queue::Delivery;
use crate::core::{QueueError, ResolverError};

pub use claim::ClaimResolver;
pub use deadline::DeadlineResolver;
pub use dependency::DependencyResolver;

/// Abstraction for spawning background futures on a runtime.
pub trait Spawn {
    /// Spawn a detached future.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// What handling one message amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The message caused a state change (or was forwarded successfully).
    Resolved,
    /// The message was stale or redundant and was acknowledged without effect.
    Dropped,
}

/// Message handling logic plugged into a [`PollingResolver`].
#[async_trait]
pub trait AdvisoryHandler: Send + Sync + 'static {
    /// Decoded message type.
    type Message: Send + 'static;

    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Receive the next batch.
    async fn poll(&self) -> Result<Vec<Delivery<Self::Message>>, QueueError>;

    /// Handle one delivery, acknowledging it on success.
    ///
    /// On error the message must be left unacknowledged for redelivery.
    async fn handle(&self, delivery: Delivery<Self::Message>) -> Result<HandleOutcome, ResolverError>;
}

/// Counters shared by every loop of one resolver.
#[derive(Default)]
pub struct ResolverCounters {
    received: AtomicU64,
    resolved: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
    poll_errors: AtomicU64,
    empty_polls: AtomicU64,
}

/// Snapshot of [`ResolverCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStats {
    /// Messages received.
    pub received: u64,
    /// Messages that caused a transition.
    pub resolved: u64,
    /// Messages acknowledged without effect.
    pub dropped: u64,
    /// Messages whose handling failed (left unacknowledged).
    pub failed: u64,
    /// Failed poll calls.
    pub poll_errors: u64,
    /// Polls that returned nothing.
    pub empty_polls: u64,
}

impl ResolverCounters {
    /// Get a snapshot of current statistics.
    pub fn snapshot(&self) -> ResolverStats {
        ResolverStats {
            received: self.received.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            poll_errors: self.poll_errors.load(Ordering::Relaxed),
            empty_polls: self.empty_polls.load(Ordering::Relaxed),
        }
    }
}

/// Result of one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Messages received.
    pub received: usize,
    /// Messages that caused a transition.
    pub resolved: usize,
    /// Messages acknowledged without effect.
    pub dropped: usize,
    /// Messages whose handling failed.
    pub failed: usize,
}

struct LoopState {
    stopping: AtomicBool,
    wake: Notify,
    counters: ResolverCounters,
}

/// Runs an [`AdvisoryHandler`] in `parallelism` polling loops.
pub struct PollingResolver<H> {
    handler: Arc<H>,
    config: ResolverConfig,
    state: Arc<LoopState>,
    running: Mutex<Option<Vec<oneshot::Receiver<()>>>>,
}

impl<H: AdvisoryHandler> PollingResolver<H> {
    /// Wrap `handler` with loop settings.
    pub fn new(handler: H, config: ResolverConfig) -> Self {
        Self {
            handler: Arc::new(handler),
            config,
            state: Arc::new(LoopState {
                stopping: AtomicBool::new(false),
                wake: Notify::new(),
                counters: ResolverCounters::default(),
            }),
            running: Mutex::new(None),
        }
    }

    /// The wrapped handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Counter snapshot.
    pub fn stats(&self) -> ResolverStats {
        self.state.counters.snapshot()
    }

    /// Whether loops are currently running.
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Spawn the polling loops. Does nothing if already running.
    pub fn start<S: Spawn>(&self, spawner: &S) {
        let mut running = self.running.lock();
        if running.is_some() {
            return;
        }
        self.state.stopping.store(false, Ordering::SeqCst);
        let mut done = Vec::with_capacity(self.config.parallelism);
        for loop_id in 0..self.config.parallelism {
            let (tx, rx) = oneshot::channel();
            spawner.spawn(poll_loop(
                Arc::clone(&self.handler),
                Arc::clone(&self.state),
                self.config.polling_delay(),
                loop_id,
                tx,
            ));
            done.push(rx);
        }
        info!(
            resolver = self.handler.name(),
            loops = self.config.parallelism,
            "resolver started"
        );
        *running = Some(done);
    }

    /// Signal every loop to stop and wait until all have finished.
    pub async fn terminate(&self) {
        let done = self.running.lock().take();
        let Some(done) = done else {
            return;
        };
        self.state.stopping.store(true, Ordering::SeqCst);
        self.state.wake.notify_waiters();
        for finished in done {
            // A dropped sender means the loop's task was aborted; either way it is gone.
            let _ = finished.await;
        }
        info!(resolver = self.handler.name(), "resolver terminated");
    }

    /// Receive and handle a single batch on the caller's task.
    pub async fn poll_once(&self) -> Result<BatchReport, QueueError> {
        let batch = self.handler.poll().await?;
        Ok(process_batch(self.handler.as_ref(), &self.state.counters, batch).await)
    }
}

async fn process_batch<H: AdvisoryHandler>(
    handler: &H,
    counters: &ResolverCounters,
    batch: Vec<Delivery<H::Message>>,
) -> BatchReport {
    let mut report = BatchReport {
        received: batch.len(),
        ..BatchReport::default()
    };
    counters
        .received
        .fetch_add(batch.len() as u64, Ordering::Relaxed);
    let results = join_all(batch.into_iter().map(|delivery| handler.handle(delivery))).await;
    for result in results {
        match result {
            Ok(HandleOutcome::Resolved) => {
                report.resolved += 1;
                counters.resolved.fetch_add(1, Ordering::Relaxed);
            }
            Ok(HandleOutcome::Dropped) => {
                report.dropped += 1;
                counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                report.failed += 1;
                counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    resolver = handler.name(),
                    error = %err,
                    "[alert-operator] failed to handle message, leaving it for redelivery"
                );
            }
        }
    }
    report
}

async fn idle(state: &LoopState, delay: Duration) {
    let notified = state.wake.notified();
    tokio::pin!(notified);
    // Register before checking the flag so a terminate in between still wakes us.
    notified.as_mut().enable();
    if state.stopping.load(Ordering::SeqCst) {
        return;
    }
    tokio::select! {
        () = tokio::time::sleep(delay) => {}
        () = &mut notified => {}
    }
}

async fn poll_loop<H: AdvisoryHandler>(
    handler: Arc<H>,
    state: Arc<LoopState>,
    delay: Duration,
    loop_id: usize,
    done: oneshot::Sender<()>,
) {
    debug!(resolver = handler.name(), loop_id, "polling loop started");
    while !state.stopping.load(Ordering::SeqCst) {
        match handler.poll().await {
            Ok(batch) if batch.is_empty() => {
                state.counters.empty_polls.fetch_add(1, Ordering::Relaxed);
                idle(&state, delay).await;
            }
            Ok(batch) => {
                process_batch(handler.as_ref(), &state.counters, batch).await;
            }
            Err(err) => {
                state.counters.poll_errors.fetch_add(1, Ordering::Relaxed);
                error!(
                    resolver = handler.name(),
                    loop_id,
                    error = %err,
                    "[alert-operator] poll failed"
                );
                idle(&state, delay).await;
            }
        }
    }
    debug!(resolver = handler.name(), loop_id, "polling loop stopped");
    let _ = done.send(());
}
