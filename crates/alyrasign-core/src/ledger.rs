//! The `Ledger` trait and the write/account types exchanged with it.
//!
//! The trait is implemented by ledger backends (e.g.
//! `alyrasign-ledger-sqlite`). [`crate::store::RecordStore`] depends on this
//! abstraction only.

use std::future::Future;

use bytes::Bytes;
use thiserror::Error;

use crate::{
  address::Address,
  identity::{Identity, Keypair, Signature},
  record::RecordKind,
};

/// Domain separation tag for write signatures.
const SIGNING_TAG: &[u8] = b"alyrasign/write/v1";

// ─── Writes ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
  /// Fails if anything already lives at the address.
  Create,
  /// Compare-and-swap against the account's current version.
  Update { expected_version: u64 },
}

/// An unsigned write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Write {
  pub address: Address,
  pub kind:    RecordKind,
  pub payload: Bytes,
  pub mode:    WriteMode,
  /// Pays rent and must sign.
  pub payer:   Identity,
  /// The identity that must sign later updates to this account. Ignored on
  /// updates; the stored writer is authoritative.
  pub writer:  Identity,
}

impl Write {
  pub fn create(
    address: Address,
    kind: RecordKind,
    payload: Bytes,
    payer: Identity,
    writer: Identity,
  ) -> Self {
    Self { address, kind, payload, mode: WriteMode::Create, payer, writer }
  }

  pub fn update(
    address: Address,
    kind: RecordKind,
    payload: Bytes,
    expected_version: u64,
    payer: Identity,
    writer: Identity,
  ) -> Self {
    Self {
      address,
      kind,
      payload,
      mode: WriteMode::Update { expected_version },
      payer,
      writer,
    }
  }

  /// The canonical bytes every signer signs.
  pub fn signing_message(&self) -> Vec<u8> {
    let mut msg = Vec::with_capacity(SIGNING_TAG.len() + 120 + self.payload.len());
    msg.extend_from_slice(SIGNING_TAG);
    msg.extend_from_slice(self.address.as_bytes());
    msg.push(self.kind.discriminant());
    match self.mode {
      WriteMode::Create => {
        msg.push(0);
        msg.extend_from_slice(&0u64.to_le_bytes());
      }
      WriteMode::Update { expected_version } => {
        msg.push(1);
        msg.extend_from_slice(&expected_version.to_le_bytes());
      }
    }
    msg.extend_from_slice(self.payer.as_bytes());
    msg.extend_from_slice(self.writer.as_bytes());
    msg.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
    msg.extend_from_slice(&self.payload);
    msg
  }

  pub fn sign(self, signers: &[&Keypair]) -> SignedWrite {
    let message = self.signing_message();
    let signatures = signers
      .iter()
      .map(|kp| (kp.identity(), kp.sign(&message)))
      .collect();
    SignedWrite { write: self, signatures }
  }
}

/// A write plus the signatures of its required signers.
#[derive(Debug, Clone)]
pub struct SignedWrite {
  pub write:      Write,
  pub signatures: Vec<(Identity, Signature)>,
}

impl SignedWrite {
  /// Identities that attached a signature, valid or not.
  pub fn signers(&self) -> impl Iterator<Item = Identity> + '_ {
    self.signatures.iter().map(|(id, _)| *id)
  }

  /// Verify every attached signature. Returns the first identity whose
  /// signature does not check out.
  pub fn verify(&self) -> Result<(), Identity> {
    let message = self.write.signing_message();
    for (identity, signature) in &self.signatures {
      if !identity.verify(&message, signature) {
        return Err(*identity);
      }
    }
    Ok(())
  }

  pub fn is_signed_by(&self, identity: Identity) -> bool {
    self.signers().any(|id| id == identity)
  }
}

// ─── Ledger state ────────────────────────────────────────────────────────────

/// A stored account as the ledger returns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
  pub address: Address,
  pub kind:    RecordKind,
  pub payload: Bytes,
  pub writer:  Identity,
  pub version: u64,
}

/// Proof that a write was committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
  pub address: Address,
  /// Account version after the write.
  pub version: u64,
  /// Position of the write in the ledger's journal.
  pub slot:    u64,
}

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
  #[error("account {0} already exists")]
  AlreadyExists(Address),

  #[error("account {0} not found")]
  NotFound(Address),

  #[error("account {address} is at version {actual}, expected {expected}")]
  VersionConflict { address: Address, expected: u64, actual: u64 },

  #[error("write is missing a signature from {0}")]
  MissingSignature(Identity),

  #[error("signature from {0} does not verify")]
  InvalidSignature(Identity),

  #[error("account {address} can only be written by {writer}")]
  WriterMismatch { address: Address, writer: Identity, payer: Identity },

  #[error("{payer} needs {required} lamports, has {available}")]
  InsufficientFunds { payer: Identity, required: u64, available: u64 },

  /// The payload does not decode as a record of the write's kind.
  #[error("payload for {address} is not a valid record: {reason}")]
  InvalidPayload { address: Address, reason: String },

  /// A created record names a parent that is not on the ledger.
  #[error("{address} references {reference}, which does not exist")]
  DanglingReference { address: Address, reference: Address },

  /// The writer bound at creation is not the authority the record names.
  #[error("{address} must be written by {authority}, not {writer}")]
  UnauthorizedWriter { address: Address, writer: Identity, authority: Identity },

  /// The new payload changes something that is fixed once written.
  #[error("forbidden change to {address}: {reason}")]
  ForbiddenTransition { address: Address, reason: String },

  /// Rate limiting, a busy backend, a stale reference: worth retrying.
  #[error("transient ledger failure: {0}")]
  Transient(String),

  /// The write was sent but its fate is unknown.
  #[error("write to {address} unconfirmed: {reason}")]
  Unconfirmed { address: Address, reason: String },

  #[error("ledger backend error: {0}")]
  Backend(String),
}

impl LedgerError {
  pub fn is_transient(&self) -> bool { matches!(self, Self::Transient(_)) }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// An authenticated, durable key-value ledger.
///
/// `submit` resolves only once the write is committed (or rejected).
/// Implementations must re-verify signatures and enforce create-once and
/// compare-and-swap semantics themselves; nothing the client checked is
/// trusted. That includes authority: a created account's writer must be the
/// authority its payload (or, for a presence, its session) names, and fields
/// fixed at creation stay fixed.
pub trait Ledger: Send + Sync {
  /// Commit a signed write.
  fn submit(
    &self,
    write: SignedWrite,
  ) -> impl Future<Output = Result<Confirmation, LedgerError>> + Send + '_;

  /// Fetch the account at `address`. Returns `None` if nothing is stored.
  fn fetch(
    &self,
    address: Address,
  ) -> impl Future<Output = Result<Option<Account>, LedgerError>> + Send + '_;

  /// Up to `limit` accounts of `kind` with addresses strictly greater than
  /// `after`, in address order.
  fn fetch_page(
    &self,
    kind: RecordKind,
    after: Option<Address>,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<Account>, LedgerError>> + Send + '_;

  /// Spendable balance of `identity`, in lamports.
  fn balance(
    &self,
    identity: Identity,
  ) -> impl Future<Output = Result<u64, LedgerError>> + Send + '_;
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample(payer: Identity) -> Write {
    Write::create(
      Address::from_bytes([1; 32]),
      RecordKind::Formation,
      Bytes::from_static(b"payload"),
      payer,
      payer,
    )
  }

  #[test]
  fn signatures_verify_over_the_write() {
    let kp = Keypair::generate();
    let signed = sample(kp.identity()).sign(&[&kp]);
    assert!(signed.verify().is_ok());
    assert!(signed.is_signed_by(kp.identity()));
  }

  #[test]
  fn tampering_breaks_signatures() {
    let kp = Keypair::generate();
    let mut signed = sample(kp.identity()).sign(&[&kp]);
    signed.write.payload = Bytes::from_static(b"other");
    assert_eq!(signed.verify(), Err(kp.identity()));
  }

  #[test]
  fn mode_is_part_of_the_message() {
    let payer = Identity::from_bytes([2; 32]);
    let create = sample(payer);
    let mut update = create.clone();
    update.mode = WriteMode::Update { expected_version: 0 };
    assert_ne!(create.signing_message(), update.signing_message());
  }
}
