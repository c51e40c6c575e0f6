// Bounded retry with a fixed, injectable pause between failed attempts

use std::fmt::Display;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts, delay }
    }

    /// Five attempts, twenty seconds apart.
    pub const fn bucket_bootstrap() -> Self {
        Self::fixed(5, Duration::from_secs(20))
    }

    /// Same attempt budget without pausing.
    pub const fn immediate(max_attempts: u32) -> Self {
        Self::fixed(max_attempts, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::bucket_bootstrap()
    }
}

/// Runs `operation` until it confirms success or the attempt budget is spent.
///
/// `Ok(Some(_))` ends the loop. `Ok(None)` means the attempt went through but
/// could not be confirmed; the next attempt starts right away. `Err(_)` is
/// logged and followed by the policy's pause. Returns `None` once every
/// attempt has been used.
pub async fn with_retry<'a, F, T, E>(policy: &RetryPolicy, mut operation: F) -> Option<T>
where
    F: FnMut(u32) -> BoxFuture<'a, Result<Option<T>, E>>,
    E: Display,
{
    let mut attempt = 0;

    while attempt < policy.max_attempts {
        attempt += 1;

        match operation(attempt).await {
            Ok(Some(result)) => return Some(result),
            Ok(None) => {
                debug!("Attempt {}/{} not confirmed", attempt, policy.max_attempts);
            }
            Err(error) => {
                warn!("Attempt {}/{} failed: {}", attempt, policy.max_attempts, error);
                sleep(policy.delay).await;
            }
        }
    }

    None
}
