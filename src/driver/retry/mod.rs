//! Configuration for connection retries.

mod strategy;

pub use self::strategy::*;

use std::time::Duration;

/// Configuration to be used for retrying driver connection attempts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Retry {
    /// Strategy used to determine how long to wait between retry attempts.
    ///
    /// *Defaults to an [`ExponentialBackoff`] from 0.25s
    /// to 10s, with a jitter of `0.1`.*
    ///
    /// [`ExponentialBackoff`]: Strategy::Backoff
    pub strategy: Strategy,
    /// The maximum number of retries to attempt.
    ///
    /// `None` will attempt an infinite number of retries,
    /// while `Some(0)` will attempt to connect *once* (no retries).
    ///
    /// *Defaults to `Some(5)`.*
    pub retry_limit: Option<usize>,
}

impl Retry {
    /// Delay before retry number `retries + 1`, or `None` once the limit is spent.
    pub(crate) fn next_delay(&self, retries: usize, last_wait: Option<Duration>) -> Option<Duration> {
        if self.retry_limit.map_or(true, |limit| retries < limit) {
            Some(self.strategy.retry_in(last_wait))
        } else {
            None
        }
    }
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            strategy: Strategy::Backoff(ExponentialBackoff::default()),
            retry_limit: Some(5),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn limit_is_respected() {
        let retry = Retry {
            strategy: Strategy::Every(Duration::from_millis(10)),
            retry_limit: Some(2),
        };

        assert_eq!(retry.next_delay(0, None), Some(Duration::from_millis(10)));
        assert_eq!(retry.next_delay(1, None), Some(Duration::from_millis(10)));
        assert_eq!(retry.next_delay(2, None), None);

        let once = Retry {
            retry_limit: Some(0),
            ..retry
        };
        assert_eq!(once.next_delay(0, None), None);
    }

    #[test]
    fn unlimited_retries() {
        let retry = Retry {
            retry_limit: None,
            ..Default::default()
        };
        assert!(retry.next_delay(1_000, None).is_some());
    }
}
