//! # Immich Provider
//!
//! Implements the `PhotoServer` contract for an Immich-compatible REST API.
//!
//! ## Overview
//!
//! - Password login; the returned access token is attached as a bearer
//!   token to every later request
//! - Album listing, lookup, creation, update and deletion
//! - Multipart asset upload with duplicate detection
//! - Album membership changes and asset deletion

pub mod client;
pub mod error;
pub mod types;

pub use client::ImmichClient;
pub use error::{ImmichError, Result};
