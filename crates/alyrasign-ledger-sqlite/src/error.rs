//! Error type for `alyrasign-ledger-sqlite`.

use alyrasign_core::ledger::LedgerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] alyrasign_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("unknown record kind discriminant {0} in accounts table")]
  UnknownKind(u8),

  #[error("negative value {0} in an unsigned column")]
  NegativeValue(i64),

  /// The ledger refused a write on its own rules.
  #[error("write rejected: {0}")]
  Rejected(LedgerError),
}

impl Error {
  /// SQLite reports contention as BUSY or LOCKED; both clear up on retry.
  fn is_busy(&self) -> bool {
    match self {
      Self::Database(tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(
        e,
        _,
      ))) => matches!(
        e.code,
        rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
      ),
      _ => false,
    }
  }
}

impl From<Error> for LedgerError {
  fn from(err: Error) -> Self {
    if err.is_busy() {
      return LedgerError::Transient(err.to_string());
    }
    match err {
      Error::Rejected(inner) => inner,
      other => LedgerError::Backend(other.to_string()),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
