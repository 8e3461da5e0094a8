//! Public identities and the keypairs that sign on their behalf.
//!
//! The core only ever compares public identities. Secret key material lives
//! in [`Keypair`], which callers construct and hold; nothing in this crate
//! persists it.

use std::{fmt, str::FromStr};

use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Error, Result};

pub use ed25519_dalek::Signature;

// ─── Identity ────────────────────────────────────────────────────────────────

/// An ed25519 public key. Rendered as 64 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity([u8; 32]);

impl Identity {
  pub const fn from_bytes(bytes: [u8; 32]) -> Self { Self(bytes) }

  pub fn as_bytes(&self) -> &[u8; 32] { &self.0 }

  /// Check `signature` over `message` against this identity.
  ///
  /// Returns `false` for malformed public keys as well as bad signatures.
  pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
    VerifyingKey::from_bytes(&self.0)
      .and_then(|key| key.verify_strict(message, signature))
      .is_ok()
  }
}

impl fmt::Display for Identity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&hex::encode(self.0))
  }
}

impl fmt::Debug for Identity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Identity({})", &hex::encode(self.0)[..12])
  }
}

impl FromStr for Identity {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    parse_hex_32(s)
      .map(Self)
      .map_err(|reason| Error::InvalidIdentity(format!("{s:?}: {reason}")))
  }
}

impl Serialize for Identity {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.to_string())
  }
}

impl<'de> Deserialize<'de> for Identity {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
  }
}

/// Decode exactly 32 bytes of hex. Shared with [`crate::address::Address`].
pub(crate) fn parse_hex_32(s: &str) -> std::result::Result<[u8; 32], String> {
  let bytes = hex::decode(s).map_err(|e| e.to_string())?;
  <[u8; 32]>::try_from(bytes.as_slice())
    .map_err(|_| format!("expected 32 bytes, got {}", bytes.len()))
}

// ─── Keypair ─────────────────────────────────────────────────────────────────

/// A signing keypair, built from secret bytes the caller supplies. The core
/// never creates secrets; key generation and storage belong to the caller.
pub struct Keypair(SigningKey);

impl Keypair {
  #[cfg(test)]
  pub(crate) fn generate() -> Self {
    Self(SigningKey::generate(&mut rand_core::OsRng))
  }

  pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
    Self(SigningKey::from_bytes(secret))
  }

  pub fn secret_bytes(&self) -> [u8; 32] { self.0.to_bytes() }

  pub fn identity(&self) -> Identity {
    Identity(self.0.verifying_key().to_bytes())
  }

  pub fn sign(&self, message: &[u8]) -> Signature { self.0.sign(message) }
}

impl fmt::Debug for Keypair {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("Keypair").field(&self.identity()).finish()
  }
}
