//! cubeview - tile serving core for an image cube viewer backend
//!
//! Clients open multi-dimensional images (width × height × channel × stokes)
//! and request 2D raster tiles of a chosen plane. The crate provides:
//!
//! - [`cache`]: per-file LRU tile cache filled a 2×2 chunk at a time, backed
//!   by a recycling tile pool
//! - [`loader`]: the chunk source seam plus in-memory and raw file cubes
//! - [`sync`]: FIFO-fair reader/writer lock and a small concurrent queue
//! - [`executor`]: worker threads draining a shared task queue
//! - [`protocol`]: the binary event header and message codecs
//! - [`session`]: per-connection state and event dispatch
//! - [`server`]: the tokio TCP front end
//!
//! ```ignore
//! use std::sync::Arc;
//! use cubeview::executor::{TaskQueue, WorkerPool};
//! use cubeview::loader::{ImageRegistry, ImageShape, MemoryCube};
//! use cubeview::server::Server;
//! use cubeview::session::{SessionManager, SessionSettings};
//!
//! let registry = Arc::new(ImageRegistry::new());
//! registry.register("m51", Arc::new(MemoryCube::filled(ImageShape::new(512, 512, 10, 1), 0.0)));
//!
//! let queue = TaskQueue::new();
//! let _workers = WorkerPool::start(queue.clone(), 3)?;
//! let sessions = Arc::new(SessionManager::new(registry, SessionSettings::default(), queue));
//! Server::bind("127.0.0.1:3002", sessions).await?.run(shutdown).await?;
//! ```

pub mod cache;
pub mod config;
pub mod executor;
pub mod loader;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod session;
pub mod sync;

/// Version of the library and CLI, shared across the workspace.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
