use crate::error::DumperError;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, delay_ms: u64) -> Self {
        Self {
            retries,
            delay: Duration::from_millis(delay_ms),
        }
    }
}

#[cfg(test)]
impl RetryPolicy {
    pub fn none() -> Self {
        Self::new(0, 0)
    }
}

/// Run `op`, retrying transient upstream failures with linear backoff.
///
/// Session, not-found, persistence and permanent upstream errors return
/// immediately.
pub fn with_retry<T>(
    policy: RetryPolicy,
    label: &str,
    mut op: impl FnMut() -> Result<T, DumperError>,
) -> Result<T, DumperError> {
    let mut attempt = 0u32;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.retries => {
                attempt += 1;
                tracing::debug!(attempt, error = %err, "retrying {label}");
                thread::sleep(policy.delay * attempt);
            }
            Err(err) => return Err(err),
        }
    }
}
