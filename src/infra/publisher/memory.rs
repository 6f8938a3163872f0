//! In-memory publisher for testing and dev.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::publisher::{
    Publisher, TaskExceptionEvent, TaskPendingEvent, TASK_EXCEPTION_EXCHANGE,
    TASK_PENDING_EXCHANGE,
};
use crate::core::PublishError;

/// Event recorded by [`InMemoryPublisher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishedEvent {
    /// A "task pending" event.
    Pending {
        /// Event body.
        event: TaskPendingEvent,
        /// Routing keys.
        routes: Vec<String>,
    },
    /// A "task exception" event.
    Exception {
        /// Event body.
        event: TaskExceptionEvent,
        /// Routing keys.
        routes: Vec<String>,
    },
}

/// Publisher that keeps the most recent events in a bounded buffer.
pub struct InMemoryPublisher {
    events: Mutex<VecDeque<PublishedEvent>>,
    max_events: usize,
    failing: AtomicBool,
}

impl InMemoryPublisher {
    /// Create a publisher retaining at most `max_events`.
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(max_events.min(1024))),
            max_events,
            failing: AtomicBool::new(false),
        }
    }

    /// Make every publish fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Snapshot of recorded events, oldest first.
    pub fn events(&self) -> Vec<PublishedEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Recorded pending events.
    pub fn pending_events(&self) -> Vec<TaskPendingEvent> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                PublishedEvent::Pending { event, .. } => Some(event.clone()),
                PublishedEvent::Exception { .. } => None,
            })
            .collect()
    }

    /// Recorded exception events.
    pub fn exception_events(&self) -> Vec<TaskExceptionEvent> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                PublishedEvent::Exception { event, .. } => Some(event.clone()),
                PublishedEvent::Pending { .. } => None,
            })
            .collect()
    }

    fn record(&self, exchange: &str, event: PublishedEvent) -> Result<(), PublishError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError {
                exchange: exchange.to_owned(),
                reason: "publisher unavailable".into(),
            });
        }
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
        Ok(())
    }
}

impl Default for InMemoryPublisher {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl Publisher for InMemoryPublisher {
    async fn task_pending(&self, event: TaskPendingEvent, routes: &[String]) -> Result<(), PublishError> {
        self.record(
            TASK_PENDING_EXCHANGE,
            PublishedEvent::Pending {
                event,
                routes: routes.to_vec(),
            },
        )
    }

    async fn task_exception(&self, event: TaskExceptionEvent, routes: &[String]) -> Result<(), PublishError> {
        self.record(
            TASK_EXCEPTION_EXCHANGE,
            PublishedEvent::Exception {
                event,
                routes: routes.to_vec(),
            },
        )
    }
}
