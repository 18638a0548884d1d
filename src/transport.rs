//! Bounded, fixed-delay retry for messages crossing between the scheduler,
//! the workers and the page relay.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use crate::error::TransportError;

pub const DEFAULT_ATTEMPTS: usize = 3;
pub const DEFAULT_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            delay: DEFAULT_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: usize, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    /// Runs `op` until it succeeds or the attempts are used up. The last
    /// failure becomes the [`TransportError`].
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, TransportError>
    where
        E: std::fmt::Display,
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < attempts => {
                    warn!(
                        "{} delivery failed: {}; retrying in {:.1}s (attempt {}/{})",
                        label,
                        err,
                        self.delay.as_secs_f32(),
                        attempt,
                        attempts
                    );
                    sleep(self.delay).await;
                }
                Err(err) => {
                    return Err(TransportError {
                        label: label.to_string(),
                        attempts,
                        last: err.to_string(),
                    });
                }
            }
        }
    }
}
