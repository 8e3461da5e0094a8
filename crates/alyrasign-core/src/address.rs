//! Record addresses and deterministic address derivation.
//!
//! Two kinds of address exist. Student groups live at an address derived
//! from their name, so any caller can recompute it. Formations, sessions and
//! presences live at a freshly generated address that only the creator knows
//! until it is handed out.

use std::{fmt, str::FromStr};

use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::{Error, Result, identity::parse_hex_32};

/// Domain separation tag mixed into every derived address.
const DERIVATION_TAG: &[u8] = b"alyrasign/address/v1";

/// Namespace for [`AddressDeriver::student_group`].
pub const STUDENT_GROUP_NAMESPACE: &str = "student_group";

// ─── Address ─────────────────────────────────────────────────────────────────

/// The key under which a record is stored on the ledger.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; 32]);

impl Address {
  pub const fn from_bytes(bytes: [u8; 32]) -> Self { Self(bytes) }

  pub fn as_bytes(&self) -> &[u8; 32] { &self.0 }

  /// A fresh, non-reproducible address drawn from the OS RNG.
  pub fn generate() -> Self {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    Self(bytes)
  }
}

impl fmt::Display for Address {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&hex::encode(self.0))
  }
}

impl fmt::Debug for Address {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Address({})", &hex::encode(self.0)[..12])
  }
}

impl FromStr for Address {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    parse_hex_32(s)
      .map(Self)
      .map_err(|reason| Error::InvalidKey(format!("address {s:?}: {reason}")))
  }
}

impl Serialize for Address {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.to_string())
  }
}

impl<'de> Deserialize<'de> for Address {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
  }
}

// ─── AddressDeriver ──────────────────────────────────────────────────────────

/// Maps a `(namespace, key parts)` pair to a stable [`Address`].
///
/// The digest covers the tag, the salt, the namespace and every key part,
/// each preceded by its length, so `("ab", "c")` and `("a", "bc")` hash
/// differently. Every operation that addresses a student group goes through
/// [`AddressDeriver::student_group`].
#[derive(Debug, Clone)]
pub struct AddressDeriver {
  salt:        Vec<u8>,
  max_key_len: usize,
}

impl AddressDeriver {
  pub fn new(salt: impl Into<Vec<u8>>, max_key_len: usize) -> Self {
    Self { salt: salt.into(), max_key_len }
  }

  /// Derive the address for `key_parts` within `namespace`.
  ///
  /// Fails with [`Error::InvalidKey`] if the namespace or any key part is
  /// empty, if no key part is given, or if a part exceeds the key ceiling.
  pub fn derive(&self, namespace: &str, key_parts: &[&[u8]]) -> Result<Address> {
    if namespace.is_empty() {
      return Err(Error::InvalidKey("empty namespace".into()));
    }
    if key_parts.is_empty() {
      return Err(Error::InvalidKey("no key parts".into()));
    }
    for (i, part) in key_parts.iter().enumerate() {
      if part.is_empty() {
        return Err(Error::InvalidKey(format!("key part {i} is empty")));
      }
      if part.len() > self.max_key_len {
        return Err(Error::InvalidKey(format!(
          "key part {i} is {} bytes, ceiling is {}",
          part.len(),
          self.max_key_len
        )));
      }
    }

    let mut hasher = Sha256::new();
    hasher.update(DERIVATION_TAG);
    update_prefixed(&mut hasher, &self.salt);
    update_prefixed(&mut hasher, namespace.as_bytes());
    hasher.update((key_parts.len() as u32).to_le_bytes());
    for part in key_parts {
      update_prefixed(&mut hasher, part);
    }
    Ok(Address(hasher.finalize().into()))
  }

  /// The address of the student group called `name`.
  pub fn student_group(&self, name: &str) -> Result<Address> {
    self.derive(STUDENT_GROUP_NAMESPACE, &[name.as_bytes()])
  }
}

fn update_prefixed(hasher: &mut Sha256, bytes: &[u8]) {
  hasher.update((bytes.len() as u32).to_le_bytes());
  hasher.update(bytes);
}

#[cfg(test)]
mod tests {
  use super::*;

  fn deriver() -> AddressDeriver { AddressDeriver::new("test-salt", 50) }

  #[test]
  fn derivation_is_deterministic() {
    let d = deriver();
    let a = d.derive("student_group", &[b"Cohort2024".as_slice()]).unwrap();
    let b = d.derive("student_group", &[b"Cohort2024".as_slice()]).unwrap();
    assert_eq!(a, b);
    assert_eq!(d.student_group("Cohort2024").unwrap(), a);
  }

  #[test]
  fn length_prefix_prevents_concatenation_collisions() {
    let d = deriver();
    let a = d.derive("ns", &[b"ab".as_slice(), b"c".as_slice()]).unwrap();
    let b = d.derive("ns", &[b"a".as_slice(), b"bc".as_slice()]).unwrap();
    assert_ne!(a, b);
  }

  #[test]
  fn namespace_and_salt_separate_addresses() {
    let d = deriver();
    let a = d.derive("student_group", &[b"x".as_slice()]).unwrap();
    let b = d.derive("formation", &[b"x".as_slice()]).unwrap();
    let c = AddressDeriver::new("other-salt", 50)
      .derive("student_group", &[b"x".as_slice()])
      .unwrap();
    assert_ne!(a, b);
    assert_ne!(a, c);
  }

  #[test]
  fn part_order_matters() {
    let d = deriver();
    let a = d.derive("ns", &[b"first".as_slice(), b"second".as_slice()]).unwrap();
    let b = d.derive("ns", &[b"second".as_slice(), b"first".as_slice()]).unwrap();
    assert_ne!(a, b);
  }

  #[test]
  fn empty_or_oversized_parts_are_invalid() {
    let d = deriver();
    assert!(matches!(d.derive("ns", &[b"".as_slice()]), Err(Error::InvalidKey(_))));
    assert!(matches!(d.derive("ns", &[]), Err(Error::InvalidKey(_))));
    assert!(matches!(d.derive("", &[b"x".as_slice()]), Err(Error::InvalidKey(_))));

    let long = "n".repeat(51);
    assert!(matches!(d.student_group(&long), Err(Error::InvalidKey(_))));
    assert!(d.student_group(&"n".repeat(50)).is_ok());
  }

  #[test]
  fn address_hex_roundtrip() {
    let a = Address::generate();
    assert_eq!(a.to_string().parse::<Address>().unwrap(), a);
    assert_ne!(Address::generate(), a);
  }
}
