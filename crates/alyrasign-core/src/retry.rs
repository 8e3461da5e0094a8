//! Bounded exponential backoff around ledger calls.
//!
//! Only [`LedgerError::Transient`] is retried. Everything else, in particular
//! signature and authority rejections, is returned after the first attempt.

use std::{future::Future, time::Duration};

use serde::Deserialize;

use crate::{Error, Result, ledger::LedgerError};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
  /// Total attempts, including the first. Zero is treated as one.
  pub max_attempts:       u32,
  pub initial_backoff_ms: u64,
  pub max_backoff_ms:     u64,
  pub multiplier:         u32,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts:       5,
      initial_backoff_ms: 200,
      max_backoff_ms:     5_000,
      multiplier:         2,
    }
  }
}

impl RetryPolicy {
  /// A policy that never retries.
  pub fn none() -> Self { Self { max_attempts: 1, ..Self::default() } }

  pub fn attempts(&self) -> u32 { self.max_attempts.max(1) }

  /// Delay before retry number `attempt` (0-indexed), capped at
  /// `max_backoff_ms`.
  pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
    let factor = u64::from(self.multiplier).saturating_pow(attempt);
    let ms = self
      .initial_backoff_ms
      .saturating_mul(factor)
      .min(self.max_backoff_ms);
    Duration::from_millis(ms)
  }

  /// Run `op` until it succeeds, fails permanently, or the attempt budget
  /// runs out. An exhausted budget surfaces as [`Error::Transient`].
  pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LedgerError>>,
  {
    let attempts = self.attempts();
    let mut attempt = 0;
    loop {
      match op().await {
        Ok(value) => return Ok(value),
        Err(err) if err.is_transient() && attempt + 1 < attempts => {
          let backoff = self.backoff_for_attempt(attempt);
          tracing::warn!(
            operation,
            attempt = attempt + 1,
            ?backoff,
            error = %err,
            "transient ledger failure, retrying"
          );
          tokio::time::sleep(backoff).await;
          attempt += 1;
        }
        Err(LedgerError::Transient(reason)) => {
          return Err(Error::Transient { attempts, reason });
        }
        Err(err) => return Err(err.into()),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicU32, Ordering};

  use super::*;
  use crate::identity::Identity;

  fn fast() -> RetryPolicy {
    RetryPolicy {
      max_attempts:       3,
      initial_backoff_ms: 1,
      max_backoff_ms:     4,
      multiplier:         2,
    }
  }

  #[test]
  fn backoff_grows_and_caps() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.backoff_for_attempt(0), Duration::from_millis(200));
    assert_eq!(policy.backoff_for_attempt(1), Duration::from_millis(400));
    assert_eq!(policy.backoff_for_attempt(2), Duration::from_millis(800));
    assert_eq!(policy.backoff_for_attempt(10), Duration::from_millis(5_000));
    assert_eq!(policy.backoff_for_attempt(u32::MAX), Duration::from_millis(5_000));
  }

  #[tokio::test]
  async fn recovers_after_transient_failures() {
    let calls = AtomicU32::new(0);
    let result = fast()
      .run("test", || {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        async move {
          if n < 2 {
            Err(LedgerError::Transient("busy".into()))
          } else {
            Ok(42)
          }
        }
      })
      .await;
    assert_eq!(result.unwrap(), 42);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn exhaustion_is_a_terminal_transient_error() {
    let calls = AtomicU32::new(0);
    let err = fast()
      .run("test", || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err::<(), _>(LedgerError::Transient("rate limited".into())) }
      })
      .await
      .unwrap_err();
    assert!(matches!(err, Error::Transient { attempts: 3, .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn signer_errors_are_not_retried() {
    let calls = AtomicU32::new(0);
    let who = Identity::from_bytes([3; 32]);
    let err = fast()
      .run("test", || {
        calls.fetch_add(1, Ordering::SeqCst);
        async move { Err::<(), _>(LedgerError::MissingSignature(who)) }
      })
      .await
      .unwrap_err();
    assert!(matches!(err, Error::MissingSignature(id) if id == who));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }
}
