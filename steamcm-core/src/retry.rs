//! Retry policies governing a failed [`crate::session::Session::connect`].

use std::num::NonZeroU32;
use std::ops::ControlFlow;
use std::time::Duration;

use crate::error::Error;

/// Controls whether and how long to wait before another connect attempt.
pub trait RetryPolicy: Send + Sync + 'static {
    /// Decide what to do after a failed connect attempt.
    fn should_retry(&self, ctx: &RetryContext) -> ControlFlow<(), Duration>;
}

/// Context passed to [`RetryPolicy::should_retry`] after each failed attempt.
pub struct RetryContext {
    /// Number of attempts made so far, including the one that just failed.
    pub fail_count: NonZeroU32,
    /// Total time already spent sleeping between attempts.
    pub slept_so_far: Duration,
    /// The error the most recent attempt failed with.
    pub error: Error,
}

/// Never retry; the first failure is reported to the caller.
pub struct NoRetries;
impl RetryPolicy for NoRetries {
    fn should_retry(&self, _: &RetryContext) -> ControlFlow<(), Duration> {
        ControlFlow::Break(())
    }
}

/// Retry on transient, connection-level failures with a fixed backoff; give
/// up immediately on a handshake rejection, which will not succeed on retry
/// without new credentials.
pub struct AutoSleep {
    /// Delay inserted before each retried attempt.
    pub backoff: Duration,
    /// Stop retrying after this many total attempts.
    pub max_attempts: u32,
}

impl Default for AutoSleep {
    fn default() -> Self {
        Self { backoff: Duration::from_secs(1), max_attempts: 5 }
    }
}

impl RetryPolicy for AutoSleep {
    fn should_retry(&self, ctx: &RetryContext) -> ControlFlow<(), Duration> {
        if matches!(ctx.error, Error::HandshakeRejected(_)) {
            return ControlFlow::Break(());
        }
        if ctx.fail_count.get() >= self.max_attempts {
            return ControlFlow::Break(());
        }
        tracing::info!(attempt = ctx.fail_count.get(), "connect failed, retrying after backoff");
        ControlFlow::Continue(self.backoff)
    }
}
