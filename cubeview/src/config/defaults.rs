//! Default values and constants for all configuration settings.

use std::path::PathBuf;

use super::file::config_directory;
use super::settings::*;
use crate::cache::MAX_TILE_CACHE_CAPACITY;
use crate::executor::DEFAULT_WORKER_THREADS;
use crate::protocol::TileCompression;
use crate::session::DEFAULT_WAITS_PER_SECOND;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3002;

/// Smallest per-file tile cache accepted from the config file.
pub const MIN_TILE_CAPACITY: usize = 1;

pub const DEFAULT_LOG_FILE_NAME: &str = "cubeview.log";

/// Default log file (~/.cubeview/cubeview.log).
pub fn default_log_file() -> PathBuf {
    config_directory().join(DEFAULT_LOG_FILE_NAME)
}

/// Clamps the tile capacity to `MIN_TILE_CAPACITY..=MAX_TILE_CACHE_CAPACITY`,
/// logging a warning if it had to.
pub(super) fn clamp_tile_capacity(value: usize) -> usize {
    let clamped = value.clamp(MIN_TILE_CAPACITY, MAX_TILE_CACHE_CAPACITY);
    if clamped != value {
        tracing::warn!(
            requested = value,
            min = MIN_TILE_CAPACITY,
            max = MAX_TILE_CACHE_CAPACITY,
            "max_tile_capacity out of range, clamping to {}",
            clamped
        );
    }
    clamped
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: DEFAULT_HOST.to_string(),
                port: DEFAULT_PORT,
                worker_threads: DEFAULT_WORKER_THREADS,
                tile_compression: TileCompression::default(),
            },
            cache: CacheSettings {
                max_tile_capacity: MAX_TILE_CACHE_CAPACITY,
            },
            animation: AnimationSettings {
                waits_per_second: DEFAULT_WAITS_PER_SECOND,
            },
            logging: LoggingSettings {
                file: default_log_file(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_tile_capacity() {
        assert_eq!(clamp_tile_capacity(0), 1);
        assert_eq!(clamp_tile_capacity(100), 100);
        assert_eq!(clamp_tile_capacity(10_000), MAX_TILE_CACHE_CAPACITY);
    }

    #[test]
    fn test_defaults_match_session_defaults() {
        let config = ConfigFile::default();
        let session = config.session_settings();

        assert_eq!(session.max_tile_capacity, MAX_TILE_CACHE_CAPACITY);
        assert_eq!(session.waits_per_second, DEFAULT_WAITS_PER_SECOND);
        assert_eq!(session.compression, TileCompression::Lz4);
        assert_eq!(config.server.address(), "127.0.0.1:3002");
        assert!(config.logging.file.ends_with(DEFAULT_LOG_FILE_NAME));
    }
}
