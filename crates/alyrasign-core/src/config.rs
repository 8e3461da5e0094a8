//! Immutable configuration handed to [`crate::store::RecordStore::new`].

use std::time::Duration;

use serde::Deserialize;

use crate::{codec::Limits, retry::RetryPolicy};

/// One lamport-denominated SOL.
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Everything the store needs besides the ledger itself.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  /// Salt mixed into every derived address. Two deployments with different
  /// salts never share group addresses.
  pub address_salt:       String,
  /// Balance a payer must hold before the store will submit on its behalf.
  pub min_balance:        u64,
  /// How long to wait for a confirmation before declaring the outcome
  /// ambiguous.
  pub confirm_timeout_ms: u64,
  /// Accounts fetched per ledger round-trip when listing.
  pub page_size:          usize,
  pub retry:              RetryPolicy,
  pub limits:             Limits,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      address_salt:       "alyrasign".into(),
      min_balance:        LAMPORTS_PER_SOL,
      confirm_timeout_ms: 30_000,
      page_size:          100,
      retry:              RetryPolicy::default(),
      limits:             Limits::default(),
    }
  }
}

impl StoreConfig {
  pub fn confirm_timeout(&self) -> Duration {
    Duration::from_millis(self.confirm_timeout_ms)
  }
}
