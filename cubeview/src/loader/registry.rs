//! Registry of open images shared by all sessions.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::info;

use super::{ChunkLoader, ImageShape};

/// An image available for viewing.
///
/// Every session that opens the image shares this value, and with it the
/// I/O lock passed to the loader.
pub struct OpenImage {
    name: String,
    loader: Arc<dyn ChunkLoader>,
    io_lock: Mutex<()>,
}

impl OpenImage {
    /// Wrap a loader under a display name.
    pub fn new(name: impl Into<String>, loader: Arc<dyn ChunkLoader>) -> Self {
        Self {
            name: name.into(),
            loader,
            io_lock: Mutex::new(()),
        }
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dimensions of the image.
    pub fn shape(&self) -> ImageShape {
        self.loader.shape()
    }

    /// The loader reading this image.
    pub fn loader(&self) -> &dyn ChunkLoader {
        self.loader.as_ref()
    }

    /// Lock serializing reads of this image.
    pub fn io_lock(&self) -> &Mutex<()> {
        &self.io_lock
    }
}

impl std::fmt::Debug for OpenImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenImage")
            .field("name", &self.name)
            .field("shape", &self.shape())
            .finish()
    }
}

/// Name-indexed set of images.
#[derive(Debug, Default)]
pub struct ImageRegistry {
    images: DashMap<String, Arc<OpenImage>>,
}

impl ImageRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a loader under `name`, replacing any previous image with
    /// that name.
    pub fn register(&self, name: impl Into<String>, loader: Arc<dyn ChunkLoader>) -> Arc<OpenImage> {
        let image = Arc::new(OpenImage::new(name, loader));
        info!(name = image.name(), shape = %image.shape(), "Registered image");
        self.images
            .insert(image.name().to_string(), Arc::clone(&image));
        image
    }

    /// Look up an image by name.
    pub fn get(&self, name: &str) -> Option<Arc<OpenImage>> {
        self.images.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove an image. Sessions that already opened it keep their handle.
    pub fn remove(&self, name: &str) -> Option<Arc<OpenImage>> {
        self.images.remove(name).map(|(_, image)| image)
    }

    /// Registered image names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.images.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of registered images.
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Whether no images are registered.
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MemoryCube;

    fn cube() -> Arc<dyn ChunkLoader> {
        Arc::new(MemoryCube::filled(ImageShape::new(8, 8, 1, 1), 0.0))
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ImageRegistry::new();
        registry.register("b", cube());
        registry.register("a", cube());

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert_eq!(registry.get("a").unwrap().shape().width, 8);
        assert!(registry.get("c").is_none());
    }

    #[test]
    fn test_same_image_shared() {
        let registry = ImageRegistry::new();
        registry.register("a", cube());

        let first = registry.get("a").unwrap();
        let second = registry.get("a").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(std::ptr::eq(first.io_lock(), second.io_lock()));
    }

    #[test]
    fn test_remove_keeps_handles() {
        let registry = ImageRegistry::new();
        let image = registry.register("a", cube());
        registry.remove("a");

        assert!(registry.is_empty());
        assert_eq!(image.name(), "a");
    }
}
