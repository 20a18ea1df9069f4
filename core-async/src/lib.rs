//! Async runtime facade for the gallery core.
//!
//! Every core crate spawns tasks, sleeps and synchronizes through this crate
//! instead of naming Tokio directly. Reconciliation chunks, secure-folder file
//! work and remote uploads all suspend on the primitives exported here, so the
//! executor can be swapped or tuned in a single place.
//!
//! # Modules
//!
//! - `task`: task spawning and blocking offload
//! - `time`: sleep, timeout, instants and wall-clock helpers
//! - `sync`: locks, channels and the cancellation token
//! - `fs`: async filesystem calls
//! - `runtime`: `block_on` for synchronous entry points
//!
//! # Examples
//!
//! ```rust
//! use core_async::task;
//! use core_async::time::{sleep, Duration};
//!
//! async fn example() {
//!     let handle = task::spawn(async {
//!         sleep(Duration::from_millis(10)).await;
//!         42
//!     });
//!     assert_eq!(handle.await.unwrap(), 42);
//! }
//! ```

// Downstream crates get the entry-point/test macros without a Tokio dependency.
pub use core_async_macros::{main, test};

pub mod fs;
pub mod runtime;
pub mod sync;
pub mod task;
pub mod time;

pub use sync::CancellationToken;
pub use task::spawn;
pub use time::{sleep, Duration, Instant};
