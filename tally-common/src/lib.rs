//! # Tally Common Library
//!
//! Shared code for the Tally back-office services:
//! - Error and result types
//! - TOML configuration loading and root folder resolution
//! - Database bootstrap (SQLite pool, settings table)
//! - Clock abstraction and hashing helpers

pub mod config;
pub mod db;
pub mod error;
pub mod hash;
pub mod time;

pub use error::{Error, Result};
pub use time::{Clock, SystemClock};
