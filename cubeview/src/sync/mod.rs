//! Locking primitives for per-file session state.
//!
//! - [`QueuingRwMutex`] - reader/writer mutex granting entry in arrival order
//! - [`ScopedAccess`] - RAII role on a `QueuingRwMutex` with early release
//! - [`QueuingRwLock`] - value guarded by a `QueuingRwMutex`
//! - [`ConcurrentQueue`] - FIFO with non-blocking pop

mod queue;
mod rw_lock;
mod rw_mutex;

pub use queue::ConcurrentQueue;
pub use rw_lock::{QueuingReadGuard, QueuingRwLock, QueuingWriteGuard};
pub use rw_mutex::{AccessMode, QueuingRwMutex, ScopedAccess};
