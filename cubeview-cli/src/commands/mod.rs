//! CLI command implementations.
//!
//! - [`serve`] - Run the tile server
//! - [`init`] - Write the default configuration file
//! - [`config`] - Configuration helpers (path)

pub mod config;
pub mod init;
pub mod serve;
