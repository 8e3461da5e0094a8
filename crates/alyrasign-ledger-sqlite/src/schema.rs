//! Tables backing [`crate::SqliteLedger`]: current account state, balances,
//! and the write journal.

/// Run on every open. Safe to repeat; the layout version is recorded in
/// `user_version`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 250;

-- Current state of every account. Rows are inserted once and only ever
-- updated through a version compare-and-swap.
CREATE TABLE IF NOT EXISTS accounts (
    address     TEXT PRIMARY KEY,   -- 64 hex chars
    kind        INTEGER NOT NULL,   -- RecordKind discriminant
    payload     BLOB NOT NULL,      -- encoded record
    writer      TEXT NOT NULL,      -- identity allowed to update
    version     INTEGER NOT NULL CHECK (version >= 1),
    created_at  TEXT NOT NULL,      -- ISO 8601 UTC
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS balances (
    identity    TEXT PRIMARY KEY,
    lamports    INTEGER NOT NULL CHECK (lamports >= 0)
);

-- Append-only journal of committed writes. The row id is the slot reported
-- in confirmations. No UPDATE or DELETE is ever issued against this table.
CREATE TABLE IF NOT EXISTS writes (
    slot         INTEGER PRIMARY KEY AUTOINCREMENT,
    address      TEXT NOT NULL REFERENCES accounts(address),
    mode         TEXT NOT NULL,     -- 'create' | 'update'
    version      INTEGER NOT NULL,  -- account version after the write
    payer        TEXT NOT NULL,
    rent_paid    INTEGER NOT NULL,
    confirmed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS accounts_kind_idx    ON accounts(kind, address);
CREATE INDEX IF NOT EXISTS writes_address_idx   ON writes(address);

PRAGMA user_version = 1;
";
