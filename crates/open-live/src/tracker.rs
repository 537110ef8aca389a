//! Tracking of in-flight consumer callbacks.
//!
//! Callbacks are spawned fire-and-forget so a slow consumer never blocks the
//! read loop. The tracker keeps them accounted for so shutdown can wait for
//! them, and cancels the stragglers once the wait times out.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Pause after cancelling stragglers so cancellation can propagate.
const CANCEL_GRACE: Duration = Duration::from_millis(100);

/// Set of in-flight callback invocations.
#[derive(Clone, Default)]
pub struct CallbackTracker {
    tasks: TaskTracker,
    /// Cancelled (and replaced) when a drain times out.
    cancel: Arc<Mutex<CancellationToken>>,
}

impl CallbackTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of callbacks that have not finished yet.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Spawn a callback invocation and keep track of it until it finishes.
    ///
    /// Errors and panics are logged; they never reach the caller or sibling tasks.
    pub fn track<F>(&self, invocation: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let token = self.cancel.lock().clone();

        self.tasks.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Callback cancelled during shutdown");
                }
                result = AssertUnwindSafe(invocation).catch_unwind() => match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(error = ?e, "Danmu callback failed"),
                    Err(panic) => error!("Danmu callback panicked: {}", panic_message(&*panic)),
                },
            }
        });
    }

    /// Wait for all tracked callbacks, cancelling whatever is left after `timeout`.
    pub async fn drain(&self, timeout: Duration) {
        if self.tasks.is_empty() {
            debug!("No pending danmu callbacks");
            return;
        }

        let count = self.tasks.len();
        info!(count, "Waiting for pending danmu callbacks");

        self.tasks.close();
        match tokio::time::timeout(timeout, self.tasks.wait()).await {
            Ok(()) => info!(count, "All pending danmu callbacks completed"),
            Err(_) => {
                warn!(
                    remaining = self.tasks.len(),
                    "Timed out waiting for danmu callbacks, cancelling the rest"
                );
                let token = std::mem::take(&mut *self.cancel.lock());
                token.cancel();
                tokio::time::sleep(CANCEL_GRACE).await;
            }
        }
        self.tasks.reopen();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
