//! Trellis - templated issue fields and external tracker synchronization.
//!
//! Two subsystems live here:
//!
//! - [`template`]: schema-checked templated fields on any node type, with
//!   template extension and migration
//! - [`sync`]: incremental, duplicate-free import of issues and timelines
//!   from a remote tracker
//!
//! The primary issue graph is reached through [`storage::IssueStorage`];
//! an in-memory backend is included.

#![forbid(unsafe_code)]

pub mod config;
pub mod domain;
pub mod error;
pub mod id_generation;
pub mod logging;
pub mod storage;
pub mod sync;
pub mod template;

pub use error::{Error, Result};
