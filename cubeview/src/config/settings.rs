//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file.

use std::path::PathBuf;

use crate::protocol::TileCompression;
use crate::session::SessionSettings;

/// Complete configuration loaded from config.ini.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    pub server: ServerSettings,
    pub cache: CacheSettings,
    pub animation: AnimationSettings,
    pub logging: LoggingSettings,
}

/// `[server]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Interface to listen on
    pub host: String,
    pub port: u16,
    /// Threads executing tile, cursor, animation and moment tasks
    pub worker_threads: usize,
    pub tile_compression: TileCompression,
}

impl ServerSettings {
    /// `host:port` for binding.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// `[cache]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Upper bound on tiles cached per open file (1..=4096)
    pub max_tile_capacity: usize,
}

/// `[animation]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimationSettings {
    /// Flow control acknowledgements a client sends per second
    pub waits_per_second: i32,
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    /// Log file path
    pub file: PathBuf,
}

impl ConfigFile {
    /// Session settings derived from the `[server]`, `[cache]` and
    /// `[animation]` sections.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            max_tile_capacity: self.cache.max_tile_capacity,
            waits_per_second: self.animation.waits_per_second,
            compression: self.server.tile_compression,
            ..SessionSettings::default()
        }
    }
}
