use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Duration;

/// Key of the monotonically increasing step counter in every history row.
pub const STEP_KEY: &str = "_step";

/// Connection settings for the tracking service, built once from CLI args.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: String,
    pub entity: String,
    pub project: String,
    pub timeout: Duration,
    pub user_agent: String,
}

impl ApiConfig {
    /// `entity/project`, the namespace every call is scoped to.
    pub fn project_path(&self) -> String {
        format!("{}/{}", self.entity, self.project)
    }
}

/// A tracked run as seen through the service API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Short run id, unique within the project.
    pub id: String,
    /// Opaque storage id used by mutations.
    pub storage_id: String,
    /// Display name; not guaranteed unique.
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub last_history_step: Option<i64>,
}

/// One row of a run's metric history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryRecord(pub Map<String, Value>);

impl HistoryRecord {
    pub fn step(&self) -> Option<i64> {
        self.0.get(STEP_KEY).and_then(Value::as_i64)
    }

    pub fn set_step(&mut self, step: i64) {
        self.0.insert(STEP_KEY.to_string(), Value::from(step));
    }

    /// Numeric value of `metric`, if present. Booleans and strings count as absent.
    pub fn metric(&self, metric: &str) -> Option<f64> {
        self.0
            .get(metric)
            .and_then(Value::as_f64)
            .filter(|v| !v.is_nan())
    }
}

/// A file stored with a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFile {
    pub id: String,
    /// Path relative to the run's files root.
    pub name: String,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub download_url: Option<String>,
}

/// A versioned artifact logged by a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    /// `sequence:vN`
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Request to create a fresh run.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub id: String,
    pub name: String,
    pub tags: Vec<String>,
    pub notes: Option<String>,
}

/// What to do when adjacent runs' overlap-metric ranges overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    Abort,
    Warn,
}

/// What to do when a copied file already exists at the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilePolicy {
    Skip,
    Overwrite,
}

impl FilePolicy {
    pub fn from_overwrite_flag(overwrite: bool) -> Self {
        if overwrite {
            FilePolicy::Overwrite
        } else {
            FilePolicy::Skip
        }
    }
}

#[derive(Debug, Clone)]
pub struct MergeConfig {
    pub overlap_metric: String,
    pub overlap_policy: OverlapPolicy,
    /// Explicit save dir; when `None` the first ordered run's name under `results_dir`.
    pub save_dir: Option<PathBuf>,
    pub results_dir: PathBuf,
    /// Tag for source runs; `None` disables tagging.
    pub partial_tag: Option<String>,
    pub file_policy: FilePolicy,
    pub merged_run_name: Option<String>,
    pub upload: bool,
}

#[derive(Debug, Clone)]
pub struct UpdateConfig {
    pub file_patterns: Vec<regex::Regex>,
    pub artifact_patterns: Vec<regex::Regex>,
    pub delete_aliases: bool,
}

#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub results_dir: PathBuf,
    pub checkpoint_name: Option<String>,
    pub file_policy: FilePolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Artifact,
    Tag,
}

/// Result of one per-item operation in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    Done,
    DryRun,
    Skipped(String),
    Failed(String),
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemReport {
    pub run_id: String,
    pub run_name: String,
    pub kind: ItemKind,
    pub item: String,
    pub outcome: Outcome,
}
