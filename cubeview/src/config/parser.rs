//! INI parsing: the single place where INI keys map to struct fields.

use std::path::PathBuf;
use std::str::FromStr;

use ini::Ini;

use super::defaults::clamp_tile_capacity;
use super::file::ConfigFileError;
use super::settings::ConfigFile;

/// Parse an `Ini` into a `ConfigFile`, overlaying defaults.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    if let Some(section) = ini.section(Some("server")) {
        if let Some(v) = section.get("host") {
            let v = v.trim();
            if !v.is_empty() {
                config.server.host = v.to_string();
            }
        }
        if let Some(v) = section.get("port") {
            config.server.port = parse_number("server", "port", v)?;
        }
        if let Some(v) = section.get("worker_threads") {
            let threads: usize = parse_number("server", "worker_threads", v)?;
            if threads == 0 {
                return Err(invalid("server", "worker_threads", v, "must be at least 1"));
            }
            config.server.worker_threads = threads;
        }
        if let Some(v) = section.get("tile_compression") {
            config.server.tile_compression = v
                .parse()
                .map_err(|reason: String| invalid("server", "tile_compression", v, &reason))?;
        }
    }

    if let Some(section) = ini.section(Some("cache")) {
        if let Some(v) = section.get("max_tile_capacity") {
            config.cache.max_tile_capacity =
                clamp_tile_capacity(parse_number("cache", "max_tile_capacity", v)?);
        }
    }

    if let Some(section) = ini.section(Some("animation")) {
        if let Some(v) = section.get("waits_per_second") {
            let waits: i32 = parse_number("animation", "waits_per_second", v)?;
            if waits <= 0 {
                return Err(invalid(
                    "animation",
                    "waits_per_second",
                    v,
                    "must be a positive integer",
                ));
            }
            config.animation.waits_per_second = waits;
        }
    }

    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("file") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.file = expand_tilde(v);
            }
        }
    }

    Ok(config)
}

fn parse_number<T: FromStr>(section: &str, key: &str, value: &str) -> Result<T, ConfigFileError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(section, key, value, "expected a number"))
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Expand ~ to home directory in paths.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
