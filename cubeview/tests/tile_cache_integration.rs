//! Tile cache over a file-backed cube.

use std::sync::Arc;
use std::thread;

use cubeview::cache::{Plane, TileCache, TileKey, TileLayout};
use cubeview::loader::{ChunkLoader, ImageRegistry, ImageShape, OpenImage, RawCubeFile};
use tempfile::TempDir;

fn value_at(x: usize, y: usize, z: usize) -> f32 {
    (x + y * 1000 + z * 1_000_000) as f32
}

/// 50 x 40 pixels, 3 channels, 1 polarization.
fn raw_image(dir: &TempDir) -> Arc<OpenImage> {
    let shape = ImageShape::new(50, 40, 3, 1);
    let mut values = Vec::with_capacity(shape.len());
    for z in 0..shape.depth {
        for y in 0..shape.height {
            for x in 0..shape.width {
                values.push(value_at(x, y, z));
            }
        }
    }

    let path = dir.path().join("cube.f32");
    RawCubeFile::write(&path, &values).unwrap();
    let registry = ImageRegistry::new();
    registry.register("cube", Arc::new(RawCubeFile::open(&path, shape).unwrap()))
}

fn check_tile(image: &OpenImage, cache: &TileCache, key: TileKey, z: usize) {
    let tile = cache
        .get(key, image.loader(), image.io_lock())
        .unwrap_or_else(|| panic!("tile {key} missing"));
    let shape = image.shape();
    assert_eq!(tile.width(), (shape.width - key.x as usize).min(16));
    assert_eq!(tile.height(), (shape.height - key.y as usize).min(16));
    for row in 0..tile.height() {
        for col in 0..tile.width() {
            assert_eq!(
                tile.value(col, row),
                Some(value_at(key.x as usize + col, key.y as usize + row, z)),
                "tile {key} pixel ({col}, {row})"
            );
        }
    }
}

#[test]
fn test_every_tile_matches_file_contents() {
    let dir = TempDir::new().unwrap();
    let image = raw_image(&dir);
    let cache = TileCache::with_layout(32, TileLayout::new(16));

    for y in (0..40).step_by(16) {
        for x in (0..50).step_by(16) {
            check_tile(&image, &cache, TileKey::new(x, y), 0);
        }
    }

    // 4 x 3 tiles from 2 x 2 chunks
    assert_eq!(cache.len(), 12);
    assert_eq!(cache.stats().chunk_loads, 4);
}

#[test]
fn test_reset_serves_new_plane() {
    let dir = TempDir::new().unwrap();
    let image = raw_image(&dir);
    let cache = TileCache::with_layout(16, TileLayout::new(16));

    check_tile(&image, &cache, TileKey::new(32, 32), 0);
    cache.reset(2, 0, 0);
    assert!(cache.is_empty());
    assert_eq!(cache.plane(), Plane::new(2, 0));

    check_tile(&image, &cache, TileKey::new(32, 32), 2);
    check_tile(&image, &cache, TileKey::new(0, 0), 2);
}

#[test]
fn test_parallel_readers_share_cache() {
    let dir = TempDir::new().unwrap();
    let image = raw_image(&dir);
    let cache = Arc::new(TileCache::with_layout(12, TileLayout::new(16)));

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let image = Arc::clone(&image);
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for round in 0..20 {
                    let x = ((i + round) % 4) as i32 * 16;
                    let y = ((i * 3 + round) % 3) as i32 * 16;
                    check_tile(&image, &cache, TileKey::new(x, y), 0);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // The whole image fits, so each chunk is read exactly once.
    let stats = cache.stats();
    assert_eq!(stats.chunk_loads, 4);
    assert_eq!(stats.load_failures, 0);
    assert_eq!(stats.hits + stats.misses, 120);
}

#[test]
fn test_small_cache_keeps_serving_under_eviction() {
    let dir = TempDir::new().unwrap();
    let image = raw_image(&dir);
    let cache = TileCache::with_layout(5, TileLayout::new(16));

    for _ in 0..3 {
        for y in (0..40).step_by(16) {
            for x in (0..50).step_by(16) {
                check_tile(&image, &cache, TileKey::new(x, y), 0);
            }
        }
    }

    assert!(cache.len() <= 5);
    assert!(cache.stats().evictions > 0);
    assert!(cache.pool().stats().reuses > 0);
}

#[test]
fn test_loader_reports_clipped_extent() {
    let dir = TempDir::new().unwrap();
    let image = raw_image(&dir);
    let mut buffer = Vec::new();

    let request = cubeview::loader::ChunkRequest::new(32, 32, 32, Plane::new(1, 0));
    let extent = image
        .loader()
        .get_chunk(&request, &mut buffer, image.io_lock())
        .unwrap();

    assert_eq!((extent.width, extent.height), (18, 8));
    assert_eq!(buffer[0], value_at(32, 32, 1));
    assert_eq!(buffer[extent.len() - 1], value_at(49, 39, 1));
}
