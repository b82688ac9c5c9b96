//! Cancellable deferred tasks.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A closure scheduled to run once after a delay.
///
/// Cancelling (or dropping) the task before the delay elapses guarantees the
/// closure never runs. Scheduling outside a tokio runtime yields an inert task.
#[derive(Debug)]
pub struct DeferredTask {
    token: CancellationToken,
}

impl DeferredTask {
    pub fn schedule<F>(delay: Duration, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let token = CancellationToken::new();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let child = token.clone();
                handle.spawn(async move {
                    tokio::select! {
                        _ = child.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {
                            if !child.is_cancelled() {
                                f();
                            }
                        }
                    }
                });
            }
            Err(_) => {
                debug!(?delay, "no async runtime, deferred task will not run");
                token.cancel();
            }
        }

        Self { token }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for DeferredTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
