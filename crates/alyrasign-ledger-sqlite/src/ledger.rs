//! [`SqliteLedger`]: the SQLite implementation of [`Ledger`].

use std::path::Path;

use alyrasign_core::{
  address::Address,
  codec::{Limits, RecordCodec},
  identity::Identity,
  ledger::{Account, Confirmation, Ledger, LedgerError, SignedWrite, WriteMode},
  record::{Record, RecordKind},
};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension as _, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::{
  encode::{
    RawAccount, decode_address, decode_dt, decode_identity, decode_u64, encode_address,
    encode_dt, encode_identity, encode_u64,
  },
  rules::{self, Violation},
  schema::SCHEMA,
  Error, Result,
};

// ─── Rent ────────────────────────────────────────────────────────────────────

/// What an account costs to store, charged to the payer of the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RentSchedule {
  pub lamports_per_byte: u64,
  /// Fixed per-account bytes counted on top of the payload.
  pub overhead_bytes:    u64,
}

impl Default for RentSchedule {
  fn default() -> Self {
    Self { lamports_per_byte: 6_960, overhead_bytes: 128 }
  }
}

impl RentSchedule {
  /// Free storage; handy in tests that do not care about balances.
  pub fn free() -> Self { Self { lamports_per_byte: 0, overhead_bytes: 0 } }

  /// Rent for a new account holding `payload_len` bytes.
  pub fn rent_for(&self, payload_len: usize) -> u64 {
    self
      .overhead_bytes
      .saturating_add(payload_len as u64)
      .saturating_mul(self.lamports_per_byte)
  }

  /// Rent for growing an existing account by `extra` bytes.
  pub fn rent_for_growth(&self, extra: u64) -> u64 {
    extra.saturating_mul(self.lamports_per_byte)
  }
}

// ─── Journal ─────────────────────────────────────────────────────────────────

/// One committed write, as recorded in the append-only journal.
#[derive(Debug, Clone, Serialize)]
pub struct JournalEntry {
  pub slot:         u64,
  pub address:      Address,
  pub mode:         String,
  pub version:      u64,
  pub payer:        Identity,
  pub rent_paid:    u64,
  pub confirmed_at: DateTime<Utc>,
}

// ─── Ledger ──────────────────────────────────────────────────────────────────

/// A local ledger backed by a single SQLite file.
///
/// Cloning is cheap: the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteLedger {
  conn:  tokio_rusqlite::Connection,
  rent:  RentSchedule,
  codec: RecordCodec,
}

/// Result of a write transaction. Rejections roll the transaction back.
enum Outcome {
  Committed { version: i64, slot: i64 },
  Rejected(Rejection),
}

enum Rejection {
  AlreadyExists,
  NotFound,
  KindMismatch { stored: u8 },
  VersionConflict { expected: u64, actual: i64 },
  WriterMismatch { writer: String },
  InsufficientFunds { required: u64, available: u64 },
  Violation(Violation),
}

impl From<Violation> for Rejection {
  fn from(violation: Violation) -> Self { Self::Violation(violation) }
}

/// A verified write, decoded and ready for the transaction thread.
struct Staged {
  address: String,
  kind:    u8,
  payload: Vec<u8>,
  record:  Record,
  payer:   Identity,
  writer:  Identity,
  now:     String,
}

impl SqliteLedger {
  /// Open (or create) a ledger at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let ledger = Self::from_conn(conn);
    ledger.init_schema().await?;
    Ok(ledger)
  }

  /// Open an in-memory ledger: useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let ledger = Self::from_conn(conn);
    ledger.init_schema().await?;
    Ok(ledger)
  }

  fn from_conn(conn: tokio_rusqlite::Connection) -> Self {
    Self { conn, rent: RentSchedule::default(), codec: RecordCodec::default() }
  }

  pub fn with_rent(mut self, rent: RentSchedule) -> Self {
    self.rent = rent;
    self
  }

  /// Field ceilings payloads are decoded against. Must match the ceilings
  /// clients encode with.
  pub fn with_limits(mut self, limits: Limits) -> Self {
    self.codec = RecordCodec::new(limits);
    self
  }

  pub fn rent(&self) -> &RentSchedule { &self.rent }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Credit `lamports` to `identity` and return the new balance. This is the
  /// local ledger's faucet; there is no other way to mint funds.
  pub async fn airdrop(&self, identity: Identity, lamports: u64) -> Result<u64> {
    let id_str = encode_identity(identity);
    let amount = encode_u64(lamports);

    let balance: i64 = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO balances (identity, lamports) VALUES (?1, ?2)
           ON CONFLICT(identity) DO UPDATE SET lamports = lamports + excluded.lamports",
          rusqlite::params![id_str, amount],
        )?;
        Ok(conn.query_row(
          "SELECT lamports FROM balances WHERE identity = ?1",
          rusqlite::params![id_str],
          |r| r.get(0),
        )?)
      })
      .await?;

    tracing::debug!(%identity, lamports, balance, "airdrop");
    decode_u64(balance)
  }

  /// Every committed write to `address`, oldest first.
  pub async fn history(&self, address: Address) -> Result<Vec<JournalEntry>> {
    let addr_str = encode_address(address);

    type Row = (i64, String, String, i64, String, i64, String);
    let rows: Vec<Row> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT slot, address, mode, version, payer, rent_paid, confirmed_at
           FROM writes WHERE address = ?1 ORDER BY slot",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![addr_str], |r| {
            Ok((
              r.get(0)?,
              r.get(1)?,
              r.get(2)?,
              r.get(3)?,
              r.get(4)?,
              r.get(5)?,
              r.get(6)?,
            ))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows
      .into_iter()
      .map(|(slot, address, mode, version, payer, rent_paid, confirmed_at)| {
        Ok(JournalEntry {
          slot: decode_u64(slot)?,
          address: decode_address(&address)?,
          mode,
          version: decode_u64(version)?,
          payer: decode_identity(&payer)?,
          rent_paid: decode_u64(rent_paid)?,
          confirmed_at: decode_dt(&confirmed_at)?,
        })
      })
      .collect()
  }

  /// Verify, then apply a write inside a single IMMEDIATE transaction so the
  /// existence / version / authority checks and the write itself are atomic.
  async fn commit(&self, signed: SignedWrite) -> Result<Confirmation> {
    if let Err(identity) = signed.verify() {
      return Err(Error::Rejected(LedgerError::InvalidSignature(identity)));
    }
    let signers: Vec<String> = signed.signers().map(encode_identity).collect();
    let write = signed.write;
    if !signed_by(&signers, write.payer) {
      return Err(Error::Rejected(LedgerError::MissingSignature(write.payer)));
    }

    let address = write.address;
    let payer = write.payer;
    let mode = write.mode;
    let record = self.codec.decode(&write.payload, write.kind).map_err(|err| {
      Error::Rejected(LedgerError::InvalidPayload { address, reason: err.to_string() })
    })?;
    let staged = Staged {
      address: encode_address(address),
      kind: write.kind.discriminant(),
      payload: write.payload.to_vec(),
      record,
      payer,
      writer: write.writer,
      now: encode_dt(Utc::now()),
    };
    let kind = staged.kind;
    let rent = self.rent;
    let codec = self.codec.clone();

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let outcome = match mode {
          WriteMode::Create => insert_account(&tx, &staged, &codec, &rent)?,
          WriteMode::Update { expected_version } => {
            update_account(&tx, &staged, expected_version, &signers, &codec, &rent)?
          }
        };
        if matches!(outcome, Outcome::Committed { .. }) {
          tx.commit()?;
        }
        Ok(outcome)
      })
      .await?;

    match outcome {
      Outcome::Committed { version, slot } => {
        let confirmation = Confirmation {
          address,
          version: decode_u64(version)?,
          slot:    decode_u64(slot)?,
        };
        tracing::debug!(
          %address,
          version = confirmation.version,
          slot = confirmation.slot,
          "write committed"
        );
        Ok(confirmation)
      }
      Outcome::Rejected(rejection) => {
        let err = match rejection {
          Rejection::AlreadyExists => LedgerError::AlreadyExists(address),
          Rejection::NotFound => LedgerError::NotFound(address),
          Rejection::KindMismatch { stored } => LedgerError::Backend(format!(
            "account {address} holds kind {stored}, write is kind {kind}"
          )),
          Rejection::VersionConflict { expected, actual } => LedgerError::VersionConflict {
            address,
            expected,
            actual: decode_u64(actual)?,
          },
          Rejection::WriterMismatch { writer } => LedgerError::WriterMismatch {
            address,
            writer: decode_identity(&writer)?,
            payer,
          },
          Rejection::InsufficientFunds { required, available } => {
            LedgerError::InsufficientFunds { payer, required, available }
          }
          Rejection::Violation(Violation::Dangling { reference }) => {
            LedgerError::DanglingReference { address, reference }
          }
          Rejection::Violation(Violation::Writer { writer, authority }) => {
            LedgerError::UnauthorizedWriter { address, writer, authority }
          }
          Rejection::Violation(Violation::Transition(reason)) => {
            LedgerError::ForbiddenTransition { address, reason: reason.to_owned() }
          }
        };
        tracing::debug!(%address, error = %err, "write rejected");
        Err(Error::Rejected(err))
      }
    }
  }

  async fn get_account(&self, address: Address) -> Result<Option<Account>> {
    let addr_str = encode_address(address);

    let raw: Option<RawAccount> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {} FROM accounts WHERE address = ?1", RawAccount::COLUMNS),
              rusqlite::params![addr_str],
              RawAccount::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawAccount::into_account).transpose()
  }

  async fn list_accounts(
    &self,
    kind: RecordKind,
    after: Option<Address>,
    limit: usize,
  ) -> Result<Vec<Account>> {
    let kind = kind.discriminant();
    let after_str = after.map(encode_address);
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    let raws: Vec<RawAccount> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM accounts
           WHERE kind = ?1 AND (?2 IS NULL OR address > ?2)
           ORDER BY address
           LIMIT ?3",
          RawAccount::COLUMNS
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![kind, after_str, limit], RawAccount::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAccount::into_account).collect()
  }

  async fn lamports(&self, identity: Identity) -> Result<u64> {
    let id_str = encode_identity(identity);

    let lamports: Option<i64> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT lamports FROM balances WHERE identity = ?1",
              rusqlite::params![id_str],
              |r| r.get(0),
            )
            .optional()?,
        )
      })
      .await?;

    decode_u64(lamports.unwrap_or(0))
  }
}

fn signed_by(signers: &[String], identity: Identity) -> bool {
  let id = encode_identity(identity);
  signers.iter().any(|s| *s == id)
}

// ─── Transaction bodies ──────────────────────────────────────────────────────

fn insert_account(
  tx: &Transaction<'_>,
  write: &Staged,
  codec: &RecordCodec,
  rent: &RentSchedule,
) -> rusqlite::Result<Outcome> {
  let exists = tx
    .query_row(
      "SELECT 1 FROM accounts WHERE address = ?1",
      rusqlite::params![write.address],
      |_| Ok(()),
    )
    .optional()?
    .is_some();
  if exists {
    return Ok(Outcome::Rejected(Rejection::AlreadyExists));
  }

  let parent = match rules::parent_of(&write.record) {
    Some((address, kind)) => load_record(tx, address, kind, codec)?,
    None => None,
  };
  if let Err(violation) =
    rules::check_create(&write.record, write.writer, write.payer, parent.as_ref())
  {
    return Ok(Outcome::Rejected(violation.into()));
  }

  let payer = encode_identity(write.payer);
  let cost = rent.rent_for(write.payload.len());
  if let Some(rejection) = charge(tx, &payer, cost)? {
    return Ok(Outcome::Rejected(rejection));
  }

  tx.execute(
    "INSERT INTO accounts (address, kind, payload, writer, version, created_at, updated_at)
     VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)",
    rusqlite::params![
      write.address,
      write.kind,
      write.payload,
      encode_identity(write.writer),
      write.now
    ],
  )?;
  let slot = journal(tx, &write.address, "create", 1, &payer, cost, &write.now)?;
  Ok(Outcome::Committed { version: 1, slot })
}

fn update_account(
  tx: &Transaction<'_>,
  write: &Staged,
  expected_version: u64,
  signers: &[String],
  codec: &RecordCodec,
  rent: &RentSchedule,
) -> rusqlite::Result<Outcome> {
  let current: Option<(u8, i64, String, Vec<u8>)> = tx
    .query_row(
      "SELECT kind, version, writer, payload FROM accounts WHERE address = ?1",
      rusqlite::params![write.address],
      |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
    )
    .optional()?;

  let Some((stored_kind, version, writer, old_payload)) = current else {
    return Ok(Outcome::Rejected(Rejection::NotFound));
  };
  if stored_kind != write.kind {
    return Ok(Outcome::Rejected(Rejection::KindMismatch { stored: stored_kind }));
  }
  if !signers.contains(&writer) {
    return Ok(Outcome::Rejected(Rejection::WriterMismatch { writer }));
  }
  if u64::try_from(version).ok() != Some(expected_version) {
    return Ok(Outcome::Rejected(Rejection::VersionConflict {
      expected: expected_version,
      actual:   version,
    }));
  }

  let Ok(old) = codec.decode(&old_payload, write.record.kind()) else {
    return Ok(Outcome::Rejected(
      Violation::Transition("stored payload no longer decodes").into(),
    ));
  };
  if let Err(violation) = rules::check_update(&old, &write.record) {
    return Ok(Outcome::Rejected(violation.into()));
  }

  let payer = encode_identity(write.payer);
  let growth = write.payload.len().saturating_sub(old_payload.len()) as u64;
  let cost = rent.rent_for_growth(growth);
  if let Some(rejection) = charge(tx, &payer, cost)? {
    return Ok(Outcome::Rejected(rejection));
  }

  let next = version + 1;
  tx.execute(
    "UPDATE accounts SET payload = ?2, version = ?3, updated_at = ?4
     WHERE address = ?1 AND version = ?5",
    rusqlite::params![write.address, write.payload, next, write.now, version],
  )?;
  let slot = journal(tx, &write.address, "update", next, &payer, cost, &write.now)?;
  Ok(Outcome::Committed { version: next, slot })
}

/// The record at `address` if it is of `kind` and still decodes.
fn load_record(
  tx: &Transaction<'_>,
  address: Address,
  kind: RecordKind,
  codec: &RecordCodec,
) -> rusqlite::Result<Option<Record>> {
  let payload: Option<Vec<u8>> = tx
    .query_row(
      "SELECT payload FROM accounts WHERE address = ?1 AND kind = ?2",
      rusqlite::params![encode_address(address), kind.discriminant()],
      |r| r.get(0),
    )
    .optional()?;
  Ok(payload.and_then(|bytes| codec.decode(&bytes, kind).ok()))
}

/// Debit `cost` from `payer`, or explain why not.
fn charge(tx: &Transaction<'_>, payer: &str, cost: u64) -> rusqlite::Result<Option<Rejection>> {
  let available: i64 = tx
    .query_row(
      "SELECT lamports FROM balances WHERE identity = ?1",
      rusqlite::params![payer],
      |r| r.get(0),
    )
    .optional()?
    .unwrap_or(0);
  let available = u64::try_from(available).unwrap_or(0);

  if available < cost {
    return Ok(Some(Rejection::InsufficientFunds { required: cost, available }));
  }
  if cost > 0 {
    tx.execute(
      "UPDATE balances SET lamports = lamports - ?2 WHERE identity = ?1",
      rusqlite::params![payer, encode_u64(cost)],
    )?;
  }
  Ok(None)
}

fn journal(
  tx: &Transaction<'_>,
  address: &str,
  mode: &str,
  version: i64,
  payer: &str,
  rent_paid: u64,
  now: &str,
) -> rusqlite::Result<i64> {
  tx.execute(
    "INSERT INTO writes (address, mode, version, payer, rent_paid, confirmed_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    rusqlite::params![address, mode, version, payer, encode_u64(rent_paid), now],
  )?;
  Ok(tx.last_insert_rowid())
}

// ─── Ledger impl ─────────────────────────────────────────────────────────────

impl Ledger for SqliteLedger {
  async fn submit(&self, write: SignedWrite) -> Result<Confirmation, LedgerError> {
    Ok(self.commit(write).await?)
  }

  async fn fetch(&self, address: Address) -> Result<Option<Account>, LedgerError> {
    Ok(self.get_account(address).await?)
  }

  async fn fetch_page(
    &self,
    kind: RecordKind,
    after: Option<Address>,
    limit: usize,
  ) -> Result<Vec<Account>, LedgerError> {
    Ok(self.list_accounts(kind, after, limit).await?)
  }

  async fn balance(&self, identity: Identity) -> Result<u64, LedgerError> {
    Ok(self.lamports(identity).await?)
  }
}
