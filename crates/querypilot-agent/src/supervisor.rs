//! Wall-clock and cancellation supervision for a run.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub enum Supervised<T> {
    Completed(T),
    /// The budget elapsed; `run_token` has been cancelled.
    TimedOut,
    /// `run_token` was cancelled from outside.
    Cancelled,
}

/// Drive `fut` until it finishes, `run_token` fires, or `budget` elapses.
///
/// On timeout the token is cancelled before returning so every collaborator
/// holding it (engine calls, model calls) unwinds promptly.
pub async fn supervise<F, T>(budget: Duration, run_token: &CancellationToken, fut: F) -> Supervised<T>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = run_token.cancelled() => Supervised::Cancelled,
        _ = tokio::time::sleep(budget) => {
            run_token.cancel();
            Supervised::TimedOut
        }
        out = fut => Supervised::Completed(out),
    }
}
