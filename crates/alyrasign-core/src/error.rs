//! Error types for `alyrasign-core`.

use thiserror::Error;

use crate::{address::Address, identity::Identity, ledger::LedgerError};

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid key: {0}")]
  InvalidKey(String),

  #[error("invalid identity: {0}")]
  InvalidIdentity(String),

  #[error("malformed record: {0}")]
  MalformedRecord(String),

  #[error("unknown record kind (layout version {version}, discriminant {discriminant})")]
  UnknownRecordKind { version: u8, discriminant: u8 },

  #[error("a record already exists at {0}")]
  AlreadyExists(Address),

  #[error("no record at {0}")]
  NotFound(Address),

  #[error("referenced record {0} does not exist")]
  ReferenceNotFound(Address),

  #[error("request signed by {signer} but claims authority {claimed}")]
  SignerMismatch { signer: Identity, claimed: Identity },

  #[error("write is missing a signature from {0}")]
  MissingSignature(Identity),

  #[error("record belongs to {stored}, not {claimed}")]
  AuthorityMismatch { stored: Identity, claimed: Identity },

  #[error("{0} is not the session authority")]
  UnauthorizedValidation(Identity),

  #[error("presence {0} is already validated")]
  AlreadyValidated(Address),

  #[error("{field} would exceed its ceiling of {limit}")]
  LimitExceeded { field: &'static str, limit: usize },

  #[error("{identity} holds {available} lamports, {required} required")]
  InsufficientResources { identity: Identity, required: u64, available: u64 },

  #[error("concurrent write to {0}")]
  Conflict(Address),

  #[error("ledger unavailable after {attempts} attempts: {reason}")]
  Transient { attempts: u32, reason: String },

  /// The write may or may not have landed; re-fetch before acting.
  #[error("outcome of write to {0} is unknown")]
  AmbiguousOutcome(Address),

  #[error("ledger error: {0}")]
  Ledger(LedgerError),
}

impl Error {
  /// Whether repeating the same request could ever succeed without the
  /// caller changing something first.
  pub fn is_permanent(&self) -> bool {
    !matches!(
      self,
      Self::Transient { .. } | Self::AmbiguousOutcome(_) | Self::Conflict(_)
    )
  }
}

impl From<LedgerError> for Error {
  fn from(err: LedgerError) -> Self {
    match err {
      LedgerError::AlreadyExists(address) => Self::AlreadyExists(address),
      LedgerError::NotFound(address) => Self::NotFound(address),
      LedgerError::VersionConflict { address, .. } => Self::Conflict(address),
      LedgerError::MissingSignature(id) | LedgerError::InvalidSignature(id) => {
        Self::MissingSignature(id)
      }
      LedgerError::WriterMismatch { writer, payer, .. } => {
        Self::AuthorityMismatch { stored: writer, claimed: payer }
      }
      LedgerError::InsufficientFunds { payer, required, available } => {
        Self::InsufficientResources { identity: payer, required, available }
      }
      LedgerError::InvalidPayload { reason, .. } => Self::MalformedRecord(reason),
      LedgerError::DanglingReference { reference, .. } => Self::ReferenceNotFound(reference),
      LedgerError::UnauthorizedWriter { writer, authority, .. } => {
        Self::AuthorityMismatch { stored: authority, claimed: writer }
      }
      LedgerError::Transient(reason) => Self::Transient { attempts: 1, reason },
      LedgerError::Unconfirmed { address, .. } => Self::AmbiguousOutcome(address),
      other @ (LedgerError::ForbiddenTransition { .. } | LedgerError::Backend(_)) => {
        Self::Ledger(other)
      }
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
