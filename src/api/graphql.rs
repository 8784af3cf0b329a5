//! GraphQL documents and response shapes for the W&B public API.

use crate::error::{ToolError, ToolResult};
use crate::model::{Artifact, Run, RunFile};
use serde::Deserialize;
use serde_json::Value;

pub(crate) const RUNS_QUERY: &str = r#"
query Runs($entity: String!, $project: String!, $cursor: String, $perPage: Int) {
  project(name: $project, entityName: $entity) {
    runs(after: $cursor, first: $perPage) {
      edges { node { id name displayName tags historyKeys } cursor }
      pageInfo { endCursor hasNextPage }
    }
  }
}"#;

pub(crate) const HISTORY_QUERY: &str = r#"
query HistoryPage($entity: String!, $project: String!, $run: String!, $minStep: Int64!, $maxStep: Int64!, $pageSize: Int!) {
  project(name: $project, entityName: $entity) {
    run(name: $run) { history(minStep: $minStep, maxStep: $maxStep, samples: $pageSize) }
  }
}"#;

pub(crate) const FILES_QUERY: &str = r#"
query RunFiles($entity: String!, $project: String!, $run: String!, $cursor: String, $perPage: Int) {
  project(name: $project, entityName: $entity) {
    run(name: $run) {
      files(after: $cursor, first: $perPage) {
        edges { node { id name sizeBytes directUrl } cursor }
        pageInfo { endCursor hasNextPage }
      }
    }
  }
}"#;

pub(crate) const ARTIFACTS_QUERY: &str = r#"
query RunOutputArtifacts($entity: String!, $project: String!, $run: String!, $cursor: String, $perPage: Int) {
  project(name: $project, entityName: $entity) {
    run(name: $run) {
      outputArtifacts(after: $cursor, first: $perPage) {
        edges { node { id versionIndex artifactSequence { name } aliases { alias } } cursor }
        pageInfo { endCursor hasNextPage }
      }
    }
  }
}"#;

pub(crate) const DELETE_FILES_MUTATION: &str = r#"
mutation deleteFiles($files: [ID!]!) {
  deleteFiles(input: { files: $files }) { success }
}"#;

pub(crate) const DELETE_ARTIFACT_MUTATION: &str = r#"
mutation DeleteArtifact($artifactID: ID!, $deleteAliases: Boolean) {
  deleteArtifact(input: { artifactID: $artifactID, deleteAliases: $deleteAliases }) { artifact { id } }
}"#;

pub(crate) const UPDATE_TAGS_MUTATION: &str = r#"
mutation UpsertBucketTags($id: String!, $tags: [String!]) {
  upsertBucket(input: { id: $id, tags: $tags }) { bucket { id tags } }
}"#;

pub(crate) const CREATE_RUN_MUTATION: &str = r#"
mutation UpsertBucket($name: String!, $displayName: String, $entity: String!, $project: String!, $tags: [String!], $notes: String) {
  upsertBucket(input: { name: $name, displayName: $displayName, entityName: $entity, modelName: $project, tags: $tags, notes: $notes }) {
    bucket { id name displayName tags historyKeys }
  }
}"#;

/// `{ "data": ..., "errors": [...] }`
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GqlError>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GqlError {
    pub message: String,
}

impl<T> Envelope<T> {
    /// Surface GraphQL errors, then require a data payload.
    pub(crate) fn into_data(self) -> ToolResult<T> {
        if !self.errors.is_empty() {
            let message = self
                .errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ToolError::Api { message });
        }
        self.data.ok_or_else(|| ToolError::InvalidResponse {
            message: "response carried neither data nor errors".into(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PageInfo {
    pub end_cursor: Option<String>,
    pub has_next_page: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Edge<N> {
    pub node: N,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Connection<N> {
    pub edges: Vec<Edge<N>>,
    pub page_info: PageInfo,
}

/// `project { ... }` may be null when entity/project do not exist.
#[derive(Debug, Deserialize)]
pub(crate) struct ProjectData<P> {
    pub project: Option<P>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RunsProject {
    pub runs: Connection<RunNode>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RunProject<R> {
    pub run: Option<R>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RunNode {
    pub id: String,
    pub name: String,
    pub display_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// JSON scalar; sometimes delivered as an encoded string.
    #[serde(default)]
    pub history_keys: Option<Value>,
}

impl From<RunNode> for Run {
    fn from(node: RunNode) -> Self {
        let last_history_step = node.history_keys.as_ref().and_then(last_step);
        Run {
            name: node.display_name.unwrap_or_else(|| node.name.clone()),
            id: node.name,
            storage_id: node.id,
            tags: node.tags,
            last_history_step,
        }
    }
}

fn last_step(history_keys: &Value) -> Option<i64> {
    let parsed;
    let keys = match history_keys {
        Value::String(s) => {
            parsed = serde_json::from_str::<Value>(s).ok()?;
            &parsed
        }
        other => other,
    };
    keys.get("lastStep").and_then(Value::as_i64).filter(|s| *s >= 0)
}

#[derive(Debug, Deserialize)]
pub(crate) struct HistoryRun {
    #[serde(default)]
    pub history: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FilesRun {
    pub files: Connection<FileNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FileNode {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    #[serde(default)]
    pub direct_url: Option<String>,
}

impl From<FileNode> for RunFile {
    fn from(node: FileNode) -> Self {
        RunFile {
            id: node.id,
            name: node.name,
            size_bytes: node.size_bytes.unwrap_or(0),
            download_url: node.direct_url,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ArtifactsRun {
    pub output_artifacts: Connection<ArtifactNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ArtifactNode {
    pub id: String,
    pub version_index: Option<i64>,
    pub artifact_sequence: SequenceRef,
    #[serde(default)]
    pub aliases: Vec<AliasRef>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SequenceRef {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AliasRef {
    pub alias: String,
}

impl From<ArtifactNode> for Artifact {
    fn from(node: ArtifactNode) -> Self {
        let name = match node.version_index {
            Some(v) => format!("{}:v{}", node.artifact_sequence.name, v),
            None => node.artifact_sequence.name,
        };
        Artifact {
            id: node.id,
            name,
            aliases: node.aliases.into_iter().map(|a| a.alias).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UpsertBucketData {
    pub upsert_bucket: Option<UpsertBucketPayload>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UpsertBucketPayload {
    pub bucket: RunNode,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DeleteFilesData {
    pub delete_files: Option<SuccessPayload>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SuccessPayload {
    #[serde(default)]
    pub success: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DeleteArtifactData {
    pub delete_artifact: Option<Value>,
}
