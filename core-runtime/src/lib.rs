//! # Core Runtime Module
//!
//! Runtime infrastructure shared by every gallery core crate:
//! - Configuration (`CoreConfig` and its builder)
//! - Logging and tracing setup
//! - The event bus observed by the host UI

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
