//! Core types and trait definitions for AlyraSign attendance records.
//!
//! This crate is free of database and CLI dependencies. It defines the four
//! record kinds, how they are addressed, encoded and authorized, the
//! [`ledger::Ledger`] abstraction they are stored in, and the
//! [`store::RecordStore`] façade that ties those together.

pub mod address;
pub mod auth;
pub mod codec;
pub mod config;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod record;
pub mod retry;
pub mod store;

pub use error::{Error, Result};
