//! A content-addressed snapshot format for distributing OS file trees.
//!
//! The packer walks a source tree, deduplicates payloads by SHA-1, and
//! splits them across three tiers: embedded in the manifest, bundled into
//! pack files, or standalone blob sidecars. The unpacker reverses it,
//! sourcing each payload from the cheapest place that has it.

pub mod cleanup;
pub mod dirstack;
pub mod fetch;
pub mod file_util;
pub mod hashing;
pub mod manifest;
pub mod packfile;
pub mod plan;
pub mod progress;
pub mod resolve;
pub mod restore;
pub mod stream;
pub mod walk;
pub mod writer;

// CLI stuff:
pub mod ui;
