//! Core domain types and shared logic for the wharf artifact store.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Content digests and their byte-store paths
//! - Tag lifecycle and the per-namespace retention window ("time machine")
//! - Timestamp helpers for millisecond tag lifetimes
//! - Shared configuration

pub mod config;
pub mod digest;
pub mod error;
pub mod tag;
pub mod timestamp;

pub use digest::BlobDigest;
pub use error::{Error, Result};
pub use tag::{RetentionWindow, TagStatus};
