//! `alyrasign`: command-line client for AlyraSign attendance records.
//!
//! Reads `alyrasign.toml` (or the path given with `--config`), then
//! `ALYRASIGN_*` environment variables, opens the SQLite ledger and runs one
//! command against it. Results are printed to stdout as JSON; logs go to
//! stderr.
//!
//! # Usage
//!
//! ```text
//! alyrasign keygen --out trainer.key
//! alyrasign airdrop --key trainer.key 2000000000
//! alyrasign group create --key trainer.key Cohort2024 --student alice --student bob
//! alyrasign formation create --key trainer.key "Rust 101" --description "Ownership"
//! ```

mod commands;
mod keys;

use std::path::{Path, PathBuf};

use alyrasign_core::config::StoreConfig;
use alyrasign_ledger_sqlite::RentSchedule;
use anyhow::Context as _;
use clap::Parser;
use serde::Deserialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::commands::Command;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(author, version, about = "AlyraSign attendance records")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "alyrasign.toml")]
  config: PathBuf,

  /// Ledger database file; overrides `ledger_path` from the config.
  #[arg(long, env = "ALYRASIGN_LEDGER")]
  ledger: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

// ─── Config file ──────────────────────────────────────────────────────────────

/// Shape of the optional config file. Every field has a default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CliConfig {
  pub ledger_path: PathBuf,
  pub rent:        RentSchedule,
  pub store:       StoreConfig,
}

impl Default for CliConfig {
  fn default() -> Self {
    Self {
      ledger_path: PathBuf::from("alyrasign.db"),
      rent:        RentSchedule::default(),
      store:       StoreConfig::default(),
    }
  }
}

fn load_config(path: &Path) -> anyhow::Result<CliConfig> {
  let settings = config::Config::builder()
    .add_source(config::File::from(path.to_path_buf()).required(false))
    .add_source(
      config::Environment::with_prefix("ALYRASIGN")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true),
    )
    .build()
    .context("failed to read config file")?;

  settings
    .try_deserialize()
    .context("failed to deserialise CliConfig")
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let mut config = load_config(&cli.config)?;
  if let Some(path) = cli.ledger {
    config.ledger_path = path;
  }
  config.ledger_path = expand_tilde(&config.ledger_path);

  commands::run(cli.command, &config).await
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_config_file_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.ledger_path, PathBuf::from("alyrasign.db"));
    assert_eq!(config.rent, RentSchedule::default());
    assert_eq!(config.store.limits.max_students, 100);
  }

  #[test]
  fn config_file_overrides_nested_fields() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("alyrasign.toml");
    std::fs::write(
      &path,
      r#"
ledger_path = "/tmp/ledger.db"

[rent]
lamports_per_byte = 1

[store]
min_balance = 42

[store.retry]
max_attempts = 2
"#,
    )
    .unwrap();

    let config = load_config(&path).unwrap();
    assert_eq!(config.ledger_path, PathBuf::from("/tmp/ledger.db"));
    assert_eq!(config.rent.lamports_per_byte, 1);
    assert_eq!(config.rent.overhead_bytes, 128);
    assert_eq!(config.store.min_balance, 42);
    assert_eq!(config.store.retry.max_attempts, 2);
    assert_eq!(config.store.retry.initial_backoff_ms, 200);
    assert_eq!(config.store.address_salt, "alyrasign");
  }

  #[test]
  fn tilde_expands_to_home() {
    let Ok(home) = std::env::var("HOME") else { return };
    assert_eq!(
      expand_tilde(Path::new("~/ledger.db")),
      PathBuf::from(home).join("ledger.db")
    );
    assert_eq!(expand_tilde(Path::new("/abs.db")), PathBuf::from("/abs.db"));
  }
}
