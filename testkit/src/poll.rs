/*!

Bounded, cancellable polling. The stability window of a freshly started container and every
workload readiness check are driven from here so that their retry semantics cannot drift apart.

!*/

use crate::error::{self, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use snafu::ensure;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How many times to try something and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// The maximum number of attempts.
    pub attempts: u32,
    /// The delay between two failed attempts.
    pub interval: Duration,
    /// If set, diagnostics are dumped after every `n`th failed attempt.
    pub diagnostics_every: Option<u32>,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self {
            attempts,
            interval,
            diagnostics_every: None,
        }
    }

    pub const fn with_diagnostics_every(mut self, failed_attempts: u32) -> Self {
        self.diagnostics_every = Some(failed_attempts);
        self
    }

    /// The stability window checked after a container is started: 6 checks, 500ms apart.
    pub const fn stability() -> Self {
        Self::new(6, Duration::from_millis(500))
    }

    /// The total time spent sleeping if every attempt fails.
    pub fn budget(&self) -> Duration {
        self.interval * self.attempts.saturating_sub(1)
    }

    fn wants_diagnostics(&self, failed_attempts: u32) -> bool {
        match self.diagnostics_every {
            Some(every) if every > 0 => failed_attempts % every == 0,
            _ => false,
        }
    }
}

/// Returns an error if `cancel` has been triggered.
pub fn check_cancelled(cancel: &CancellationToken, operation: &str) -> Result<()> {
    ensure!(
        !cancel.is_cancelled(),
        error::CancelledSnafu { operation }
    );
    Ok(())
}

/// Sleep for `duration`, returning early with an error if `cancel` is triggered first.
pub async fn sleep_or_cancel(
    duration: Duration,
    cancel: &CancellationToken,
    operation: &str,
) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => error::CancelledSnafu { operation }.fail(),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// A predicate that tells whether a service is ready to accept requests.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn test_connection(&self) -> bool;
}

/// Something that can describe its own state when things go wrong. Implementations must not fail;
/// problems encountered while collecting diagnostics are logged.
#[async_trait]
pub trait Diagnostics: Send + Sync {
    async fn log_diagnostics(&self, reason: &str);
}

/// Poll `probe` until it reports ready or the `policy` is exhausted.
///
/// Periodic diagnostics are skipped for the last attempt since callers log their own when the
/// error is returned. Cancellation is checked before every attempt and while sleeping. The interval is slept between
/// failed attempts, never after the last one. Returns the number of attempts that were made.
pub async fn wait_until_ready<P>(
    what: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    probe: &P,
    diagnostics: Option<&dyn Diagnostics>,
) -> Result<u32>
where
    P: ReadinessProbe + ?Sized,
{
    let operation = format!("{} readiness check", what);
    info!(
        "Waiting for {} to become ready (max {} attempts, {:?} between attempts)",
        what, policy.attempts, policy.interval
    );
    for attempt in 1..=policy.attempts {
        check_cancelled(cancel, &operation)?;
        debug!("Readiness check attempt {}/{}", attempt, policy.attempts);
        if probe.test_connection().await {
            info!("{} is ready after {} attempts", what, attempt);
            return Ok(attempt);
        }
        if attempt < policy.attempts && policy.wants_diagnostics(attempt) {
            if let Some(diagnostics) = diagnostics {
                diagnostics
                    .log_diagnostics(&format!(
                        "{} readiness check failing after {} attempts",
                        what, attempt
                    ))
                    .await;
            }
        }
        if attempt < policy.attempts {
            sleep_or_cancel(policy.interval, cancel, &operation).await?;
        }
    }
    warn!(
        "{} readiness check failed after {} attempts",
        what, policy.attempts
    );
    error::NotReadySnafu {
        what,
        attempts: policy.attempts,
    }
    .fail()
}
