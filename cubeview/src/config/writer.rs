//! Serialization of `ConfigFile` into the commented INI written to disk.

use super::settings::ConfigFile;

/// Convert a `ConfigFile` to a commented INI string.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    format!(
        r#"[server]
; Interface and port the viewer backend listens on
host = {}
port = {}
; Threads executing tile, cursor, animation and moment requests (default: 3)
worker_threads = {}
; Tile pixel encoding: lz4 (NaN runs plus LZ4 block) or none (default: lz4)
tile_compression = {}

[cache]
; Upper bound on tiles cached per open file (1-4096). The actual capacity
; is 2 x (tiles across + tiles down) of the image, capped by this value.
max_tile_capacity = {}

[animation]
; Flow control acknowledgements the client sends per second (default: 3)
waits_per_second = {}

[logging]
; Log file, truncated at server start
file = {}
"#,
        config.server.host,
        config.server.port,
        config.server.worker_threads,
        config.server.tile_compression,
        config.cache.max_tile_capacity,
        config.animation.waits_per_second,
        config.logging.file.display(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_every_section() {
        let text = to_config_string(&ConfigFile::default());
        for section in ["[server]", "[cache]", "[animation]", "[logging]"] {
            assert!(text.contains(section), "missing {section}");
        }
        assert!(text.contains("max_tile_capacity = 4096"));
    }
}
