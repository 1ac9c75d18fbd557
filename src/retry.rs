//! Retrying mutating calls that race the platform's eventual consistency.
//!
//! A call that fails with `conflict`, `locked` or `service_error` is re-issued
//! from scratch after a backoff. Depending on the call site, a `not_found` or
//! an "already attached" answer means the desired state already holds and is
//! reported as [`Completion::AlreadySatisfied`]. Everything else propagates
//! unchanged.
//!
//! ```ignore
//! let policy = RetryPolicy::unbounded().not_found_is_done();
//! match retry_on_transient(&policy, ResourceRef::volume(id), || api.detach_volume(id)).await? {
//!     Completion::Done(action) => wait_for_action(client, &action, owner).await?,
//!     Completion::AlreadySatisfied => {},
//! }
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::client::ResourceRef;
use crate::error::{ApiError, ErrorClass, ErrorCode};

/// Outcome of a retried call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion<T> {
    /// The call succeeded and returned a value.
    Done(T),
    /// The call failed in a way that means the goal was already reached.
    AlreadySatisfied,
}

impl<T> Completion<T> {
    /// The returned value, if the call went through.
    pub fn done(self) -> Option<T> {
        match self {
            Self::Done(value) => Some(value),
            Self::AlreadySatisfied => None,
        }
    }
}

/// Delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// The same delay before every retry.
    Fixed(Duration),
    /// `base + step * retry` where `retry` counts from zero.
    Linear {
        /// Delay before the first retry.
        base: Duration,
        /// Added per further retry.
        step: Duration,
    },
}

impl Backoff {
    /// Delay before the retry with the given zero-based index.
    pub fn delay(&self, retry: u32) -> Duration {
        match self {
            Self::Fixed(delay) => *delay,
            Self::Linear { base, step } => *base + *step * retry,
        }
    }
}

/// Classification and pacing rules for one call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: Option<u32>,
    backoff: Backoff,
    not_found_is_done: bool,
    already_attached_is_done: bool,
    retry_failed_actions: bool,
}

impl RetryPolicy {
    /// Retry transient errors forever, one second apart.
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            backoff: Backoff::Fixed(Duration::from_secs(1)),
            not_found_is_done: false,
            already_attached_is_done: false,
            retry_failed_actions: false,
        }
    }

    /// Invoke the call at most `max_attempts` times, waiting `1 + retry`
    /// seconds between attempts.
    pub fn capped(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
            backoff: Backoff::Linear {
                base: Duration::from_secs(1),
                step: Duration::from_secs(1),
            },
            ..Self::unbounded()
        }
    }

    /// Treat `not_found` as success (delete and detach sites).
    pub fn not_found_is_done(mut self) -> Self {
        self.not_found_is_done = true;
        self
    }

    /// Treat "load balancer already attached" as success.
    pub fn already_attached_is_done(mut self) -> Self {
        self.already_attached_is_done = true;
        self
    }

    /// Also retry when the call's remote action failed.
    pub fn retry_failed_actions(mut self) -> Self {
        self.retry_failed_actions = true;
        self
    }

    /// Replace the backoff.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Cap the number of invocations.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }

    /// The invocation cap, if any.
    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Decide how this call site handles an error.
    pub fn classify(&self, err: &ApiError) -> ErrorClass {
        match &err.code {
            ErrorCode::NotFound if self.not_found_is_done => ErrorClass::AlreadySatisfied,
            ErrorCode::LoadBalancerAlreadyAttached if self.already_attached_is_done => {
                ErrorClass::AlreadySatisfied
            },
            _ if err.action.is_some() => {
                if self.retry_failed_actions {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Fatal
                }
            },
            ErrorCode::Conflict | ErrorCode::Locked | ErrorCode::ServiceError => {
                ErrorClass::Transient
            },
            _ => ErrorClass::Fatal,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Run `op`, re-issuing it while it fails transiently.
///
/// `target` names the resource in log lines. When a capped policy runs out
/// of attempts the last error is returned.
pub async fn retry_on_transient<T, F, Fut>(
    policy: &RetryPolicy,
    target: ResourceRef,
    mut op: F,
) -> Result<Completion<T>, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let err = match op().await {
            Ok(value) => return Ok(Completion::Done(value)),
            Err(err) => err,
        };

        match policy.classify(&err) {
            ErrorClass::AlreadySatisfied => {
                info!(resource = %target, code = %err.code, "{} already in desired state ({})", target, err.code);
                return Ok(Completion::AlreadySatisfied);
            },
            ErrorClass::Transient => {
                if policy.max_attempts.is_some_and(|max| attempt >= max) {
                    warn!(resource = %target, code = %err.code, attempts = attempt, "Giving up after {} attempts", attempt);
                    return Err(err);
                }
                let delay = policy.backoff.delay(attempt - 1);
                info!(
                    resource = %target,
                    code = %err.code,
                    attempt,
                    "{} {}, retrying in {:?}", target, err.code, delay
                );
                sleep(delay).await;
            },
            ErrorClass::InvalidLocalId | ErrorClass::Fatal => return Err(err),
        }
    }
}
