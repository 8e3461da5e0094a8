//! Encoding and decoding helpers between core types and the representations
//! stored in SQLite columns.
//!
//! Addresses and identities are stored as lowercase hex. Timestamps are
//! RFC 3339 strings. Lamports and versions are `INTEGER` (SQLite's `i64`).

use alyrasign_core::{
  address::Address,
  identity::Identity,
  ledger::Account,
  record::RecordKind,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::{Error, Result};

// ─── Keys ────────────────────────────────────────────────────────────────────

pub fn encode_address(address: Address) -> String { address.to_string() }

pub fn decode_address(s: &str) -> Result<Address> { Ok(s.parse()?) }

pub fn encode_identity(identity: Identity) -> String { identity.to_string() }

pub fn decode_identity(s: &str) -> Result<Identity> { Ok(s.parse()?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Integers ────────────────────────────────────────────────────────────────

pub fn encode_u64(value: u64) -> i64 { i64::try_from(value).unwrap_or(i64::MAX) }

pub fn decode_u64(value: i64) -> Result<u64> {
  u64::try_from(value).map_err(|_| Error::NegativeValue(value))
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read directly from an `accounts` row.
pub struct RawAccount {
  pub address: String,
  pub kind:    u8,
  pub payload: Vec<u8>,
  pub writer:  String,
  pub version: i64,
}

impl RawAccount {
  pub const COLUMNS: &'static str = "address, kind, payload, writer, version";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      address: row.get(0)?,
      kind:    row.get(1)?,
      payload: row.get(2)?,
      writer:  row.get(3)?,
      version: row.get(4)?,
    })
  }

  pub fn into_account(self) -> Result<Account> {
    Ok(Account {
      address: decode_address(&self.address)?,
      kind:    RecordKind::from_discriminant(self.kind)
        .ok_or(Error::UnknownKind(self.kind))?,
      payload: Bytes::from(self.payload),
      writer:  decode_identity(&self.writer)?,
      version: decode_u64(self.version)?,
    })
  }
}
