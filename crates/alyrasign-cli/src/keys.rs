//! Keypair files: a single line holding the hex-encoded 32-byte secret.

use std::{fs, path::Path};

use alyrasign_core::identity::Keypair;
use anyhow::{Context, Result, bail};
use rand_core::{OsRng, RngCore};

/// Generate a keypair and write it to `path`. Refuses to overwrite an
/// existing file unless `force` is set.
pub fn generate(path: &Path, force: bool) -> Result<Keypair> {
  if path.exists() && !force {
    bail!("{} already exists (pass --force to overwrite)", path.display());
  }
  let mut secret = [0u8; 32];
  OsRng.fill_bytes(&mut secret);
  let keypair = Keypair::from_secret_bytes(&secret);
  let secret = hex::encode(secret);
  fs::write(path, format!("{secret}\n"))
    .with_context(|| format!("writing keypair to {}", path.display()))?;
  restrict_permissions(path)?;
  Ok(keypair)
}

/// Read a keypair written by [`generate`].
pub fn load(path: &Path) -> Result<Keypair> {
  let raw = fs::read_to_string(path)
    .with_context(|| format!("reading keypair from {}", path.display()))?;
  let bytes = hex::decode(raw.trim())
    .with_context(|| format!("{} is not hex", path.display()))?;
  let secret: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
    anyhow::anyhow!("{} holds {} bytes, expected 32", path.display(), b.len())
  })?;
  Ok(Keypair::from_secret_bytes(&secret))
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
  use std::os::unix::fs::PermissionsExt;
  fs::set_permissions(path, fs::Permissions::from_mode(0o600))
    .with_context(|| format!("restricting permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> { Ok(()) }

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn generated_key_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("id.key");

    let written = generate(&path, false).unwrap();
    let read = load(&path).unwrap();
    assert_eq!(written.identity(), read.identity());
  }

  #[test]
  fn refuses_to_overwrite_without_force() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("id.key");

    let first = generate(&path, false).unwrap();
    assert!(generate(&path, false).is_err());
    assert_eq!(load(&path).unwrap().identity(), first.identity());

    let second = generate(&path, true).unwrap();
    assert_ne!(first.identity(), second.identity());
    assert_ne!(first.secret_bytes(), second.secret_bytes());
  }

  #[test]
  fn rejects_short_secret() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("short.key");
    fs::write(&path, "abcd\n").unwrap();
    assert!(load(&path).is_err());
  }
}
