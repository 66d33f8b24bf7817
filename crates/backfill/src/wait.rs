//! Bounded polling until a remote resource converges.
//!
//! The provider offers no change notifications, so every state transition is
//! observed by re-reading the resource on a fixed step until either the
//! expected state shows up or the attempt budget is spent.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, info};

use crate::providers::{DriveStatus, ManagedDrive, ManagedServer, ProviderError, ServerStatus};

/// Default time budget for a status wait.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(40);

/// Default delay between two polls.
pub const DEFAULT_WAIT_STEP: Duration = Duration::from_secs(1);

/// How long and how often to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Total time budget.
    pub timeout: Duration,
    /// Delay between polls.
    pub step: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_WAIT_TIMEOUT,
            step: DEFAULT_WAIT_STEP,
        }
    }
}

impl WaitPolicy {
    /// Policy with the given timeout and the default step.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    /// Number of steps that fit in the timeout, rounded up.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        let step = self.step.as_millis().max(1);
        u32::try_from(self.timeout.as_millis().div_ceil(step)).unwrap_or(u32::MAX)
    }

    /// Wall time covered by `attempts` steps.
    #[must_use]
    pub fn elapsed(&self, attempts: u32) -> Duration {
        self.step.saturating_mul(attempts)
    }
}

/// A resource whose status can be polled.
pub trait Tracked {
    /// Status type of the resource.
    type Status: PartialEq + Display;

    /// Current status.
    fn status(&self) -> &Self::Status;
}

impl Tracked for ManagedServer {
    type Status = ServerStatus;

    fn status(&self) -> &ServerStatus {
        &self.status
    }
}

impl Tracked for ManagedDrive {
    type Status = DriveStatus;

    fn status(&self) -> &DriveStatus {
        &self.status
    }
}

/// Result of waiting for a status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusWait<T> {
    /// Last observed state of the resource.
    pub resource: T,
    /// Poll steps elapsed before returning.
    pub attempts: u32,
    /// Whether the target status was observed.
    pub reached: bool,
}

/// Poll `fetch` until the resource reports `target` or the budget runs out.
///
/// A resource that never converges is fetched `max_attempts + 1` times and
/// reported with `attempts == max_attempts`.
///
/// # Errors
/// Returns the first error raised by `fetch`.
pub async fn wait_for_status<T, F, Fut>(
    uuid: &str,
    target: &T::Status,
    policy: WaitPolicy,
    mut fetch: F,
) -> Result<StatusWait<T>, ProviderError>
where
    T: Tracked,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = policy.max_attempts();
    let mut attempts = 0;

    loop {
        let resource = fetch().await?;
        if resource.status() == target {
            return Ok(StatusWait {
                resource,
                attempts,
                reached: true,
            });
        }

        if attempts >= max_attempts {
            info!(
                uuid = %uuid,
                target = %target,
                status = %resource.status(),
                timeout_secs = policy.timeout.as_secs(),
                "Resource didn't reach target state in time"
            );
            return Ok(StatusWait {
                resource,
                attempts,
                reached: false,
            });
        }

        debug!(uuid = %uuid, status = %resource.status(), attempts, "Polling resource status");
        tokio::time::sleep(policy.step).await;
        attempts += 1;
    }
}

/// Poll `fetch` until the provider no longer knows the resource.
///
/// Returns the number of poll steps elapsed.
///
/// # Errors
/// Returns [`ProviderError::Timeout`] once the budget is spent, and any
/// error from `fetch` other than [`ProviderError::NotFound`].
pub async fn wait_for_deleted<T, F, Fut>(
    uuid: &str,
    policy: WaitPolicy,
    mut fetch: F,
) -> Result<u32, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = policy.max_attempts();
    let mut attempts = 0;

    loop {
        match fetch().await {
            Err(e) if e.is_not_found() => return Ok(attempts),
            Err(e) => return Err(e),
            Ok(_) => {}
        }

        if attempts >= max_attempts {
            info!(
                uuid = %uuid,
                timeout_secs = policy.timeout.as_secs(),
                "Resource did not delete in time"
            );
            return Err(ProviderError::Timeout(policy.timeout.as_secs()));
        }

        tokio::time::sleep(policy.step).await;
        attempts += 1;
    }
}
