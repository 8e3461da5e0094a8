//! Subcommands. Each one opens the ledger, runs a single store operation as
//! the identity in `--key`, and prints the result.

use std::path::PathBuf;

use alyrasign_core::{address::Address, identity::Identity, store::RecordStore};
use alyrasign_ledger_sqlite::SqliteLedger;
use anyhow::{Context, Result};
use clap::Subcommand;
use serde::Serialize;
use serde_json::json;

use crate::{CliConfig, keys};

// ─── Commands ─────────────────────────────────────────────────────────────────

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Generate a new keypair file and print its identity.
  Keygen {
    #[arg(long, value_name = "FILE")]
    out:   PathBuf,
    /// Overwrite an existing file.
    #[arg(long)]
    force: bool,
  },

  /// Print the identity of a keypair file.
  Identity {
    #[arg(long, value_name = "FILE")]
    key: PathBuf,
  },

  /// Credit lamports to an identity on the local ledger.
  Airdrop {
    /// Identity to fund; defaults to the one in `--key`.
    #[arg(long, conflicts_with = "key")]
    to:       Option<Identity>,
    #[arg(long, value_name = "FILE")]
    key:      Option<PathBuf>,
    lamports: u64,
  },

  /// Show the balance of an identity.
  Balance { identity: Identity },

  /// Every committed write to an address, oldest first.
  History { address: Address },

  #[command(subcommand)]
  Group(GroupCommand),

  #[command(subcommand)]
  Formation(FormationCommand),

  #[command(subcommand)]
  Session(SessionCommand),

  #[command(subcommand)]
  Presence(PresenceCommand),
}

#[derive(Subcommand, Debug)]
pub enum GroupCommand {
  /// Create a student group owned by `--key`.
  Create {
    #[arg(long, value_name = "FILE")]
    key:        PathBuf,
    name:       String,
    #[arg(long = "student")]
    students:   Vec<String>,
    #[arg(long = "formation")]
    formations: Vec<String>,
  },
  AddStudents {
    #[arg(long, value_name = "FILE")]
    key:      PathBuf,
    name:     String,
    #[arg(required = true)]
    students: Vec<String>,
  },
  RemoveStudents {
    #[arg(long, value_name = "FILE")]
    key:      PathBuf,
    name:     String,
    #[arg(required = true)]
    students: Vec<String>,
  },
  AddFormations {
    #[arg(long, value_name = "FILE")]
    key:        PathBuf,
    name:       String,
    #[arg(required = true)]
    formations: Vec<String>,
  },
  RemoveFormations {
    #[arg(long, value_name = "FILE")]
    key:        PathBuf,
    name:       String,
    #[arg(required = true)]
    formations: Vec<String>,
  },
  Show { name: String },
  List,
}

#[derive(Subcommand, Debug)]
pub enum FormationCommand {
  Create {
    #[arg(long, value_name = "FILE")]
    key:         PathBuf,
    name:        String,
    #[arg(long, default_value = "")]
    description: String,
  },
  Show { address: Address },
  List,
}

#[derive(Subcommand, Debug)]
pub enum SessionCommand {
  /// Create a session of a formation owned by `--key`.
  Create {
    #[arg(long, value_name = "FILE")]
    key:         PathBuf,
    #[arg(long)]
    formation:   Address,
    /// Unix seconds.
    #[arg(long)]
    date:        i64,
    #[arg(long, default_value = "")]
    description: String,
  },
  Show { address: Address },
}

#[derive(Subcommand, Debug)]
pub enum PresenceCommand {
  /// Register the `--key` identity as present at a session.
  Register {
    #[arg(long, value_name = "FILE")]
    key:       PathBuf,
    #[arg(long)]
    session:   Address,
    /// Unix seconds; defaults to now.
    #[arg(long)]
    timestamp: Option<i64>,
  },
  /// Validate a presence as the session authority.
  Validate {
    #[arg(long, value_name = "FILE")]
    key:      PathBuf,
    presence: Address,
  },
  Show { address: Address },
}

// ─── Dispatch ─────────────────────────────────────────────────────────────────

pub async fn run(command: Command, config: &CliConfig) -> Result<()> {
  match command {
    Command::Keygen { out, force } => {
      let keypair = keys::generate(&out, force)?;
      print_json(&json!({ "identity": keypair.identity(), "path": out }))
    }
    Command::Identity { key } => {
      print_json(&json!({ "identity": keys::load(&key)?.identity() }))
    }
    Command::Airdrop { to, key, lamports } => {
      let identity = match (to, key) {
        (Some(identity), _) => identity,
        (None, Some(key)) => keys::load(&key)?.identity(),
        (None, None) => anyhow::bail!("pass either --to or --key"),
      };
      let ledger = open_ledger(config).await?;
      let balance = ledger.airdrop(identity, lamports).await?;
      print_json(&json!({ "identity": identity, "balance": balance }))
    }
    Command::Balance { identity } => {
      let ledger = open_ledger(config).await?;
      let balance = alyrasign_core::ledger::Ledger::balance(&ledger, identity).await?;
      print_json(&json!({ "identity": identity, "balance": balance }))
    }
    Command::History { address } => {
      let ledger = open_ledger(config).await?;
      print_json(&ledger.history(address).await?)
    }
    Command::Group(cmd) => run_group(cmd, &open_store(config).await?).await,
    Command::Formation(cmd) => run_formation(cmd, &open_store(config).await?).await,
    Command::Session(cmd) => run_session(cmd, &open_store(config).await?).await,
    Command::Presence(cmd) => run_presence(cmd, &open_store(config).await?).await,
  }
}

type Store = RecordStore<SqliteLedger>;

async fn run_group(cmd: GroupCommand, store: &Store) -> Result<()> {
  match cmd {
    GroupCommand::Create { key, name, students, formations } => {
      let key = keys::load(&key)?;
      let address = store
        .create_group(&key, key.identity(), &name, students, formations)
        .await?;
      print_json(&json!({ "address": address }))
    }
    GroupCommand::AddStudents { key, name, students } => {
      let key = keys::load(&key)?;
      print_json(&store.add_students(&key, key.identity(), &name, students).await?)
    }
    GroupCommand::RemoveStudents { key, name, students } => {
      let key = keys::load(&key)?;
      print_json(&store.remove_students(&key, key.identity(), &name, students).await?)
    }
    GroupCommand::AddFormations { key, name, formations } => {
      let key = keys::load(&key)?;
      print_json(&store.add_formations(&key, key.identity(), &name, formations).await?)
    }
    GroupCommand::RemoveFormations { key, name, formations } => {
      let key = keys::load(&key)?;
      print_json(
        &store
          .remove_formations(&key, key.identity(), &name, formations)
          .await?,
      )
    }
    GroupCommand::Show { name } => {
      let group = store
        .fetch_group(&name)
        .await?
        .with_context(|| format!("no group named {name:?}"))?;
      print_json(&json!({ "address": store.group_address(&name)?, "group": group }))
    }
    GroupCommand::List => {
      let groups = store.fetch_all_groups().try_collect().await?;
      print_json(&listing(groups))
    }
  }
}

async fn run_formation(cmd: FormationCommand, store: &Store) -> Result<()> {
  match cmd {
    FormationCommand::Create { key, name, description } => {
      let key = keys::load(&key)?;
      let address = store
        .create_formation(&key, key.identity(), &name, &description)
        .await?;
      print_json(&json!({ "address": address }))
    }
    FormationCommand::Show { address } => {
      let formation = store
        .fetch_formation(address)
        .await?
        .with_context(|| format!("no formation at {address}"))?;
      print_json(&formation)
    }
    FormationCommand::List => {
      let formations = store.fetch_all_formations().try_collect().await?;
      print_json(&listing(formations))
    }
  }
}

async fn run_session(cmd: SessionCommand, store: &Store) -> Result<()> {
  match cmd {
    SessionCommand::Create { key, formation, date, description } => {
      let key = keys::load(&key)?;
      let address = store
        .create_session(&key, key.identity(), formation, date, &description)
        .await?;
      print_json(&json!({ "address": address }))
    }
    SessionCommand::Show { address } => {
      let session = store
        .fetch_session(address)
        .await?
        .with_context(|| format!("no session at {address}"))?;
      print_json(&session)
    }
  }
}

async fn run_presence(cmd: PresenceCommand, store: &Store) -> Result<()> {
  match cmd {
    PresenceCommand::Register { key, session, timestamp } => {
      let key = keys::load(&key)?;
      let timestamp = timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp());
      let address = store
        .create_presence(&key, key.identity(), session, timestamp)
        .await?;
      print_json(&json!({ "address": address }))
    }
    PresenceCommand::Validate { key, presence } => {
      let key = keys::load(&key)?;
      store
        .validate_presence(&key, key.identity(), presence)
        .await?;
      print_json(&json!({ "address": presence, "is_validated": true }))
    }
    PresenceCommand::Show { address } => {
      let presence = store
        .fetch_presence(address)
        .await?
        .with_context(|| format!("no presence at {address}"))?;
      print_json(&presence)
    }
  }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

async fn open_ledger(config: &CliConfig) -> Result<SqliteLedger> {
  let path = &config.ledger_path;
  let ledger = SqliteLedger::open(path)
    .await
    .with_context(|| format!("failed to open ledger at {path:?}"))?;
  Ok(ledger.with_rent(config.rent).with_limits(config.store.limits))
}

async fn open_store(config: &CliConfig) -> Result<Store> {
  Ok(RecordStore::new(open_ledger(config).await?, config.store.clone()))
}

#[derive(Serialize)]
struct Listed<R> {
  address: Address,
  #[serde(flatten)]
  record:  R,
}

fn listing<R>(items: Vec<(Address, R)>) -> Vec<Listed<R>> {
  items
    .into_iter()
    .map(|(address, record)| Listed { address, record })
    .collect()
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
