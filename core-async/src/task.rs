//! Task spawning.
//!
//! `spawn` runs a future concurrently on the shared executor; `spawn_blocking`
//! moves CPU-bound work such as AES-GCM encryption or thumbnail decoding onto
//! the blocking pool so it never stalls other tasks.
//!
//! # Examples
//!
//! ```rust
//! use core_async::task;
//!
//! async fn example() {
//!     let digest_len = task::spawn_blocking(|| vec![0u8; 32].len()).await.unwrap();
//!     assert_eq!(digest_len, 32);
//! }
//! ```

pub use tokio::task::{spawn_blocking, yield_now, JoinError, JoinHandle};

/// Spawns a new asynchronous task.
///
/// The task may run on a different worker thread and is detached unless the
/// returned handle is awaited or aborted.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::task::spawn(future)
}

/// Result type for task operations.
pub type Result<T> = std::result::Result<T, JoinError>;
