//! `shrinkray-core`: shared building blocks for the scheduler crates.
//!
//! This crate contains **pure** primitives (no IO, no async runtime).

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::JobId;
