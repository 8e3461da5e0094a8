//! Record types: the four account shapes stored on the ledger.
//!
//! Each kind is a closed struct with mandatory fields. [`Record`] is the
//! tagged union the codec reads and writes; [`RecordKind`] is its
//! discriminant as stored in the encoded header and by the ledger.

use serde::{Deserialize, Serialize};

use crate::{Error, Result, address::Address, identity::Identity};

// ─── Kind ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
  StudentGroup,
  Formation,
  Session,
  Presence,
}

impl RecordKind {
  /// The byte stored in the encoded header and in the ledger's `kind` column.
  pub fn discriminant(self) -> u8 {
    match self {
      Self::StudentGroup => 1,
      Self::Formation => 2,
      Self::Session => 3,
      Self::Presence => 4,
    }
  }

  pub fn from_discriminant(byte: u8) -> Option<Self> {
    match byte {
      1 => Some(Self::StudentGroup),
      2 => Some(Self::Formation),
      3 => Some(Self::Session),
      4 => Some(Self::Presence),
      _ => None,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::StudentGroup => "student_group",
      Self::Formation => "formation",
      Self::Session => "session",
      Self::Presence => "presence",
    }
  }
}

impl std::fmt::Display for RecordKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

// ─── Records ─────────────────────────────────────────────────────────────────

/// A named cohort. Lives at an address derived from `name`.
///
/// `students` never holds the same entry twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentGroup {
  pub authority:  Identity,
  pub name:       String,
  pub students:   Vec<String>,
  pub formations: Vec<String>,
}

/// A course offering. `authority` is fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Formation {
  pub authority:   Identity,
  pub name:        String,
  pub description: String,
}

/// One sitting of a formation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
  /// Address of the [`Formation`] this session belongs to.
  pub formation:   Address,
  /// Unix epoch seconds.
  pub date:        i64,
  pub description: String,
  pub authority:   Identity,
}

/// A student's claim of attendance at a session.
///
/// `is_validated` only ever moves from `false` to `true`, and only through
/// the session authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
  pub session:      Address,
  pub student:      Identity,
  /// Unix epoch seconds.
  pub timestamp:    i64,
  pub is_validated: bool,
}

// ─── Record ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Record {
  StudentGroup(StudentGroup),
  Formation(Formation),
  Session(Session),
  Presence(Presence),
}

impl Record {
  pub fn kind(&self) -> RecordKind {
    match self {
      Self::StudentGroup(_) => RecordKind::StudentGroup,
      Self::Formation(_) => RecordKind::Formation,
      Self::Session(_) => RecordKind::Session,
      Self::Presence(_) => RecordKind::Presence,
    }
  }
}

/// Typed extraction from a decoded [`Record`]. A kind mismatch means the
/// bytes at an address are not what the caller expected, which is reported
/// as a malformed record.
macro_rules! record_variant {
  ($variant:ident) => {
    impl From<$variant> for Record {
      fn from(value: $variant) -> Self { Record::$variant(value) }
    }

    impl TryFrom<Record> for $variant {
      type Error = Error;

      fn try_from(record: Record) -> Result<Self> {
        match record {
          Record::$variant(inner) => Ok(inner),
          other => Err(Error::MalformedRecord(format!(
            "expected {}, found {}",
            RecordKind::$variant,
            other.kind()
          ))),
        }
      }
    }
  };
}

record_variant!(StudentGroup);
record_variant!(Formation);
record_variant!(Session);
record_variant!(Presence);

/// Implemented by every record struct so generic code can name its kind.
pub trait RecordType: TryFrom<Record, Error = Error> + Into<Record> {
  const KIND: RecordKind;
}

impl RecordType for StudentGroup {
  const KIND: RecordKind = RecordKind::StudentGroup;
}

impl RecordType for Formation {
  const KIND: RecordKind = RecordKind::Formation;
}

impl RecordType for Session {
  const KIND: RecordKind = RecordKind::Session;
}

impl RecordType for Presence {
  const KIND: RecordKind = RecordKind::Presence;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn discriminants_roundtrip() {
    for kind in [
      RecordKind::StudentGroup,
      RecordKind::Formation,
      RecordKind::Session,
      RecordKind::Presence,
    ] {
      assert_eq!(RecordKind::from_discriminant(kind.discriminant()), Some(kind));
    }
    assert_eq!(RecordKind::from_discriminant(0), None);
    assert_eq!(RecordKind::from_discriminant(5), None);
  }

  #[test]
  fn wrong_variant_is_malformed() {
    let record = Record::Presence(Presence {
      session:      Address::from_bytes([1; 32]),
      student:      Identity::from_bytes([2; 32]),
      timestamp:    0,
      is_validated: false,
    });
    let err = Formation::try_from(record).unwrap_err();
    assert!(matches!(err, Error::MalformedRecord(_)));
  }

  #[test]
  fn record_serializes_with_kind_tag() {
    let record = Record::Formation(Formation {
      authority:   Identity::from_bytes([7; 32]),
      name:        "Rust".into(),
      description: "Systems".into(),
    });
    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["kind"], "formation");
    assert_eq!(json["data"]["name"], "Rust");
  }
}
