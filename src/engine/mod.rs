//! Selection and the batch engines built on top of it.

pub mod download;
pub mod merge;
pub mod selector;
mod transfer;
pub mod update;

pub use download::DownloadEngine;
pub use merge::{MergeEngine, MergeReport};
pub use selector::{compile_patterns, resolve_runs, SelectionConfig};
pub use update::{DeletePlan, UpdateEngine};
