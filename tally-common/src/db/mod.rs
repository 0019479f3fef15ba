//! Database bootstrap and shared settings

pub mod init;

pub use init::*;
