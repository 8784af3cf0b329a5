//! Tracking-service access.
//!
//! Engines only talk to [`TrackingApi`]; [`WandbClient`] is the network
//! implementation. Every call is scoped to the entity/project the client was
//! built for, and every call is awaited before the next one starts.

mod graphql;
#[cfg(test)]
pub(crate) mod memory;
mod wandb;

use crate::error::ToolResult;
use crate::model::{Artifact, HistoryRecord, NewRun, Run, RunFile};
use async_trait::async_trait;
use std::path::Path;

pub use wandb::WandbClient;

#[async_trait]
pub trait TrackingApi: Send + Sync {
    /// All runs in the project, in service order.
    async fn list_runs(&self) -> ToolResult<Vec<Run>>;

    /// Full metric history of `run`, ordered by step.
    async fn scan_history(&self, run: &Run) -> ToolResult<Vec<HistoryRecord>>;

    async fn list_files(&self, run: &Run) -> ToolResult<Vec<RunFile>>;

    /// Download `file` to `dest`, returning the number of bytes written.
    async fn download_file(&self, file: &RunFile, dest: &Path) -> ToolResult<u64>;

    async fn delete_file(&self, file: &RunFile) -> ToolResult<()>;

    async fn list_artifacts(&self, run: &Run) -> ToolResult<Vec<Artifact>>;

    async fn delete_artifact(&self, artifact: &Artifact, delete_aliases: bool) -> ToolResult<()>;

    /// Replace the tag set of `run`.
    async fn set_tags(&self, run: &Run, tags: &[String]) -> ToolResult<()>;

    async fn create_run(&self, new_run: &NewRun) -> ToolResult<Run>;

    /// Append `records` to the history of `run`.
    async fn log_history(&self, run: &Run, records: &[HistoryRecord]) -> ToolResult<()>;

    /// Mark `run` as finished.
    async fn finish_run(&self, run: &Run) -> ToolResult<()>;
}
