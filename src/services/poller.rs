//! Cancellable periodic poll tasks.
//!
//! DESIGN
//! ======
//! A poll task wakes on a `tokio::time::interval` and runs one tick future.
//! Missed ticks are skipped rather than bunched, so a slow API never causes a
//! burst of catch-up requests. Each task watches a `CancellationToken`,
//! normally a child of its session's root token: cancelling either stops the
//! loop, and an in-flight tick is dropped at its next await point so its
//! response is never applied. Dropping the [`PollTask`] cancels it too.

#[cfg(test)]
#[path = "poller_test.rs"]
mod poller_test;

use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub struct PollTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl PollTask {
    /// Spawn a task whose first tick runs immediately.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, cancel: CancellationToken, tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        Self::start(name, Duration::ZERO, period, cancel, tick)
    }

    /// Spawn a task whose first tick runs one `period` from now.
    pub fn spawn_delayed<F, Fut>(name: &'static str, period: Duration, cancel: CancellationToken, tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        Self::start(name, period, period, cancel, tick)
    }

    fn start<F, Fut>(
        name: &'static str,
        delay: Duration,
        period: Duration,
        cancel: CancellationToken,
        mut tick: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + delay, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let flow = tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    flow = tick() => flow,
                };
                if flow.is_break() {
                    token.cancel();
                    break;
                }
            }
            tracing::debug!(task = name, "poll task stopped");
        });
        tracing::debug!(task = name, period_ms = period.as_millis(), "poll task started");
        Self { name, cancel, handle: Some(handle) }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Request cancellation without waiting for the task to exit.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// True once the task was cancelled or its loop ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.cancel.is_cancelled() || self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Cancel and wait for the loop to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(task = self.name, error = %e, "poll task panicked");
            }
        }
    }
}

impl Drop for PollTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
