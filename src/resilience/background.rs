//! Fire-and-forget background execution.
//!
//! # Responsibilities
//! - Run side effects (notifications, cleanup) off the request path
//! - Contain panics: log one Error entry, never crash, never reach the caller
//! - Track in-flight tasks so shutdown can wait for them
//!
//! # Design Decisions
//! - No queue, no retry. Without `max_concurrency` every call spawns
//!   immediately and concurrency is unbounded
//! - With `max_concurrency` tasks still spawn immediately but wait for a
//!   permit before doing any work
//! - Started tasks are never cancelled

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, Semaphore};

use crate::config::BackgroundConfig;
use crate::observability::logging::Logger;
use crate::observability::metrics;
use crate::resilience::fault::{self, Contained, Fault};

/// Runs background work with panic containment and lifecycle tracking.
#[derive(Clone)]
pub struct BackgroundRunner {
    logger: Arc<Logger>,
    tracker: Arc<TaskTracker>,
    limit: Option<Arc<Semaphore>>,
}

#[derive(Default)]
struct TaskTracker {
    in_flight: AtomicUsize,
    next_id: AtomicU64,
    idle: Notify,
}

/// Decrements the in-flight count when the task finishes, however it ends.
struct InFlight {
    tracker: Arc<TaskTracker>,
}

impl InFlight {
    fn start(tracker: &Arc<TaskTracker>) -> Self {
        let count = tracker.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::record_background("started");
        metrics::record_background_in_flight(count);
        Self {
            tracker: tracker.clone(),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let remaining = self.tracker.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::record_background_in_flight(remaining);
        if remaining == 0 {
            self.tracker.idle.notify_waiters();
        }
    }
}

impl BackgroundRunner {
    pub fn new(logger: Arc<Logger>, config: &BackgroundConfig) -> Self {
        Self {
            logger,
            tracker: Arc::new(TaskTracker::default()),
            limit: config
                .max_concurrency
                .map(|permits| Arc::new(Semaphore::new(permits))),
        }
    }

    /// Launch `task` on its own tokio task and return immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn run<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = InFlight::start(&self.tracker);
        let task_id = self.tracker.next_id.fetch_add(1, Ordering::Relaxed);
        let logger = self.logger.clone();
        let limit = self.limit.clone();

        tokio::spawn(async move {
            let _guard = guard;
            let _permit = match limit {
                Some(semaphore) => semaphore.acquire_owned().await.ok(),
                None => None,
            };

            if let Contained::Fault(fault) = fault::contain(task).await {
                report_fault(&logger, task_id, fault);
            }
        });
    }

    /// Launch a blocking closure on tokio's blocking pool.
    pub fn run_blocking<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = InFlight::start(&self.tracker);
        let task_id = self.tracker.next_id.fetch_add(1, Ordering::Relaxed);
        let logger = self.logger.clone();
        let limit = self.limit.clone();

        tokio::spawn(async move {
            let _guard = guard;
            let _permit = match limit {
                Some(semaphore) => semaphore.acquire_owned().await.ok(),
                None => None,
            };

            let outcome = tokio::task::spawn_blocking(move || fault::contain_blocking(task)).await;
            match outcome {
                Ok(Contained::Ok(())) => {}
                Ok(Contained::Fault(fault)) => report_fault(&logger, task_id, fault),
                Err(e) => logger.print_error(
                    &e,
                    crate::props! {"task_id" => task_id, "source" => "background"},
                ),
            }
        });
    }

    /// Tasks started and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.tracker.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until no task is in flight, or `timeout` elapses.
    ///
    /// Returns `true` if the runner became idle.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.tracker.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.in_flight() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

fn report_fault(logger: &Logger, task_id: u64, fault: Fault) {
    metrics::record_background("faulted");
    let message = format!("background task panicked: {}", fault.message());
    logger.print_error_with_trace(
        &message,
        crate::props! {"task_id" => task_id, "source" => "background"},
        fault.into_trace(),
    );
}
