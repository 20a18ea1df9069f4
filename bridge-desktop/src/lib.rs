//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop hosts
//! (macOS, Windows, Linux) and for integration tests.
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest` (rustls, multipart uploads)
//! - `FileSystemAccess` using `tokio::fs`
//! - `SecureStore` using the `keyring` crate
//! - `NetworkMonitor` using a TCP reachability probe
//! - `BackgroundScheduler` using Tokio tasks with unique work names
//! - `MediaSource` walking a directory tree, for tooling and tests
//!
//! ## Feature Flags
//!
//! - `secure-store`: Enable OS keychain integration (default)
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, TokioBackgroundScheduler, TokioFileSystem};
//!
//! #[core_async::main]
//! async fn main() {
//!     let http_client = ReqwestHttpClient::new()?;
//!     let fs = TokioFileSystem::new("/var/lib/gallery");
//!     let scheduler = TokioBackgroundScheduler::new();
//!     // Hand these to core_runtime::config::CoreConfig::builder()
//! }
//! ```

mod background;
mod filesystem;
mod http;
mod media_source;
mod network;

#[cfg(feature = "secure-store")]
mod secure_store;

pub use background::{SchedulerRetry, TokioBackgroundScheduler};
pub use filesystem::TokioFileSystem;
pub use http::ReqwestHttpClient;
pub use bridge_traits::media_source::mime_for_path;
pub use media_source::DirectoryMediaSource;
pub use network::DesktopNetworkMonitor;

#[cfg(feature = "secure-store")]
pub use secure_store::KeyringSecureStore;
