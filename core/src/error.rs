//! Shared error vocabulary for collaborator traits.

use alloc::string::String;

/// Result type used throughout this crate.
///
/// Type alias for [`anyhow::Result<T>`](anyhow::Result) with [`String`] as
/// the default success type, matching the teacher crate's convention.
pub type Result<T = String> = anyhow::Result<T>;

pub use anyhow::Error;
