//! Cooperative cancellation for in-flight operations.
//!
//! Observed only between sub-steps and during backoff sleeps: a sub-step
//! already submitted to the platform always runs to its own response or timeout.

use std::time::Duration;
pub use tokio_util::sync::CancellationToken;

/// Sleep for `delay` unless `token` is cancelled first. Returns true when cancelled.
pub async fn cancellable_sleep(token: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => token.is_cancelled(),
        _ = token.cancelled() => true,
    }
}
