//! HTTP client for the W&B GraphQL and file-stream endpoints.

use super::graphql::{
    self, ArtifactsRun, DeleteArtifactData, DeleteFilesData, Envelope, FilesRun, HistoryRun,
    ProjectData, RunProject, RunsProject, UpsertBucketData,
};
use super::TrackingApi;
use crate::error::{ToolError, ToolResult};
use crate::model::{ApiConfig, Artifact, HistoryRecord, NewRun, Run, RunFile};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::debug;

const RUNS_PER_PAGE: i64 = 50;
const FILES_PER_PAGE: i64 = 100;
const HISTORY_PAGE_SIZE: i64 = 1000;
/// Lines per file-stream post.
const STREAM_CHUNK_LINES: usize = 500;
const HISTORY_FILE: &str = "wandb-history.jsonl";

#[derive(Debug, Clone)]
pub struct WandbClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    entity: String,
    project: String,
}

impl WandbClient {
    pub fn new(cfg: &ApiConfig) -> ToolResult<Self> {
        let mut headers = HeaderMap::new();
        let agent = HeaderValue::from_str(&cfg.user_agent)
            .map_err(|e| ToolError::config(format!("invalid user agent: {e}")))?;
        headers.insert(USER_AGENT, agent);

        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            entity: cfg.entity.clone(),
            project: cfg.project.clone(),
        })
    }

    fn graphql_url(&self) -> String {
        format!("{}/graphql", self.base_url)
    }

    fn file_stream_url(&self, run: &Run) -> String {
        format!(
            "{}/files/{}/{}/{}/file_stream",
            self.base_url, self.entity, self.project, run.id
        )
    }

    /// POST a GraphQL document and decode its `data` payload.
    async fn graphql<T: DeserializeOwned>(&self, query: &str, variables: Value) -> ToolResult<T> {
        let body = json!({ "query": query, "variables": variables });
        let resp = self
            .http
            .post(self.graphql_url())
            .basic_auth("api", Some(&self.api_key))
            .json(&body)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let envelope: Envelope<T> = resp.json().await.map_err(|e| ToolError::InvalidResponse {
            message: format!("failed to decode GraphQL response: {e}"),
        })?;
        envelope.into_data()
    }

    /// Run a query scoped to one run and unwrap the `project.run` nesting.
    async fn run_query<R: DeserializeOwned>(
        &self,
        query: &str,
        run: &Run,
        extra: Value,
    ) -> ToolResult<R> {
        let mut variables = json!({
            "entity": self.entity,
            "project": self.project,
            "run": run.id,
        });
        if let (Some(vars), Value::Object(extra)) = (variables.as_object_mut(), extra) {
            vars.extend(extra);
        }
        let data: ProjectData<RunProject<R>> = self.graphql(query, variables).await?;
        data.project
            .ok_or_else(|| self.missing_project())?
            .run
            .ok_or_else(|| ToolError::Api {
                message: format!("run {} ({}) not found", run.name, run.id),
            })
    }

    fn missing_project(&self) -> ToolError {
        ToolError::Api {
            message: format!("project {}/{} not found", self.entity, self.project),
        }
    }

    async fn post_file_stream(&self, run: &Run, body: Value) -> ToolResult<()> {
        let resp = self
            .http
            .post(self.file_stream_url(run))
            .basic_auth("api", Some(&self.api_key))
            .json(&body)
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }
}

/// Map non-2xx answers to an API error carrying the body text.
async fn check_status(resp: reqwest::Response) -> ToolResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ToolError::Api {
        message: format!("HTTP {status}: {}", body.trim()),
    })
}

#[async_trait]
impl TrackingApi for WandbClient {
    async fn list_runs(&self) -> ToolResult<Vec<Run>> {
        let mut runs = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let data: ProjectData<RunsProject> = self
                .graphql(
                    graphql::RUNS_QUERY,
                    json!({
                        "entity": self.entity,
                        "project": self.project,
                        "cursor": cursor,
                        "perPage": RUNS_PER_PAGE,
                    }),
                )
                .await?;
            let page = data.project.ok_or_else(|| self.missing_project())?.runs;
            runs.extend(page.edges.into_iter().map(|e| Run::from(e.node)));
            debug!(fetched = runs.len(), "listed runs page");
            match (page.page_info.has_next_page, page.page_info.end_cursor) {
                (true, Some(next)) => cursor = Some(next),
                _ => break,
            }
        }
        Ok(runs)
    }

    async fn scan_history(&self, run: &Run) -> ToolResult<Vec<HistoryRecord>> {
        let Some(last_step) = run.last_history_step else {
            return Ok(Vec::new());
        };
        let mut records = Vec::new();
        let mut min_step = 0i64;
        while min_step <= last_step {
            let max_step = min_step + HISTORY_PAGE_SIZE;
            let page: HistoryRun = self
                .run_query(
                    graphql::HISTORY_QUERY,
                    run,
                    json!({
                        "minStep": min_step,
                        "maxStep": max_step,
                        "pageSize": HISTORY_PAGE_SIZE,
                    }),
                )
                .await?;
            for line in page.history {
                let record: HistoryRecord =
                    serde_json::from_str(&line).map_err(|e| ToolError::InvalidResponse {
                        message: format!("bad history row for run {}: {e}", run.id),
                    })?;
                records.push(record);
            }
            min_step = max_step;
        }
        debug!(run_id = %run.id, rows = records.len(), "scanned history");
        Ok(records)
    }

    async fn list_files(&self, run: &Run) -> ToolResult<Vec<RunFile>> {
        let mut files = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page: FilesRun = self
                .run_query(
                    graphql::FILES_QUERY,
                    run,
                    json!({ "cursor": cursor, "perPage": FILES_PER_PAGE }),
                )
                .await?;
            files.extend(page.files.edges.into_iter().map(|e| RunFile::from(e.node)));
            match (page.files.page_info.has_next_page, page.files.page_info.end_cursor) {
                (true, Some(next)) => cursor = Some(next),
                _ => break,
            }
        }
        Ok(files)
    }

    async fn download_file(&self, file: &RunFile, dest: &Path) -> ToolResult<u64> {
        let url = file
            .download_url
            .as_deref()
            .ok_or_else(|| ToolError::InvalidResponse {
                message: format!("file {} has no download url", file.name),
            })?;

        // Signed storage URL: no API credentials.
        let resp = check_status(self.http.get(url).send().await?).await?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::io(parent, e))?;
        }
        let mut out = tokio::fs::File::create(dest)
            .await
            .map_err(|e| ToolError::io(dest, e))?;

        let mut written = 0u64;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk: bytes::Bytes = chunk?;
            out.write_all(&chunk)
                .await
                .map_err(|e| ToolError::io(dest, e))?;
            written += chunk.len() as u64;
        }
        out.flush().await.map_err(|e| ToolError::io(dest, e))?;
        Ok(written)
    }

    async fn delete_file(&self, file: &RunFile) -> ToolResult<()> {
        let data: DeleteFilesData = self
            .graphql(
                graphql::DELETE_FILES_MUTATION,
                json!({ "files": [file.id] }),
            )
            .await?;
        match data.delete_files {
            Some(p) if p.success => Ok(()),
            _ => Err(ToolError::Api {
                message: format!("service refused to delete file {}", file.name),
            }),
        }
    }

    async fn list_artifacts(&self, run: &Run) -> ToolResult<Vec<Artifact>> {
        let mut artifacts = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page: ArtifactsRun = self
                .run_query(
                    graphql::ARTIFACTS_QUERY,
                    run,
                    json!({ "cursor": cursor, "perPage": FILES_PER_PAGE }),
                )
                .await?;
            let conn = page.output_artifacts;
            artifacts.extend(conn.edges.into_iter().map(|e| Artifact::from(e.node)));
            match (conn.page_info.has_next_page, conn.page_info.end_cursor) {
                (true, Some(next)) => cursor = Some(next),
                _ => break,
            }
        }
        Ok(artifacts)
    }

    async fn delete_artifact(&self, artifact: &Artifact, delete_aliases: bool) -> ToolResult<()> {
        let data: DeleteArtifactData = self
            .graphql(
                graphql::DELETE_ARTIFACT_MUTATION,
                json!({ "artifactID": artifact.id, "deleteAliases": delete_aliases }),
            )
            .await?;
        match data.delete_artifact {
            Some(v) if !v.is_null() => Ok(()),
            _ => Err(ToolError::Api {
                message: format!("service refused to delete artifact {}", artifact.name),
            }),
        }
    }

    async fn set_tags(&self, run: &Run, tags: &[String]) -> ToolResult<()> {
        let data: UpsertBucketData = self
            .graphql(
                graphql::UPDATE_TAGS_MUTATION,
                json!({ "id": run.storage_id, "tags": tags }),
            )
            .await?;
        data.upsert_bucket.ok_or_else(|| ToolError::InvalidResponse {
            message: format!("tag update for run {} returned no bucket", run.id),
        })?;
        Ok(())
    }

    async fn create_run(&self, new_run: &NewRun) -> ToolResult<Run> {
        let data: UpsertBucketData = self
            .graphql(
                graphql::CREATE_RUN_MUTATION,
                json!({
                    "name": new_run.id,
                    "displayName": new_run.name,
                    "entity": self.entity,
                    "project": self.project,
                    "tags": new_run.tags,
                    "notes": new_run.notes,
                }),
            )
            .await?;
        let bucket = data
            .upsert_bucket
            .ok_or_else(|| ToolError::InvalidResponse {
                message: format!("creating run {} returned no bucket", new_run.id),
            })?
            .bucket;
        Ok(Run::from(bucket))
    }

    async fn log_history(&self, run: &Run, records: &[HistoryRecord]) -> ToolResult<()> {
        let mut offset = 0usize;
        for chunk in records.chunks(STREAM_CHUNK_LINES) {
            let content = chunk
                .iter()
                .map(serde_json::to_string)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| ToolError::InvalidResponse {
                    message: format!("failed to encode history row: {e}"),
                })?;
            let body = json!({
                "files": { (HISTORY_FILE): { "offset": offset, "content": content } }
            });
            self.post_file_stream(run, body).await?;
            offset += chunk.len();
            debug!(run_id = %run.id, offset, "streamed history chunk");
        }
        Ok(())
    }

    async fn finish_run(&self, run: &Run) -> ToolResult<()> {
        self.post_file_stream(run, json!({ "complete": true, "exitcode": 0 }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> WandbClient {
        WandbClient::new(&ApiConfig {
            base_url: server.uri(),
            api_key: "test-key".into(),
            entity: "team".into(),
            project: "proj".into(),
            timeout: Duration::from_secs(5),
            user_agent: "wandb-run-tools/test".into(),
        })
        .unwrap()
    }

    fn run(id: &str, last: Option<i64>) -> Run {
        Run {
            id: id.into(),
            storage_id: format!("S-{id}"),
            name: format!("name-{id}"),
            tags: vec![],
            last_history_step: last,
        }
    }

    fn runs_page(ids: &[&str], next: Option<&str>) -> Value {
        let edges: Vec<Value> = ids
            .iter()
            .map(|id| {
                json!({
                    "node": {
                        "id": format!("S-{id}"),
                        "name": id,
                        "displayName": format!("name-{id}"),
                        "tags": [],
                        "historyKeys": {"lastStep": 9}
                    },
                    "cursor": id
                })
            })
            .collect();
        json!({"data": {"project": {"runs": {
            "edges": edges,
            "pageInfo": {"endCursor": next, "hasNextPage": next.is_some()}
        }}}})
    }

    #[tokio::test]
    async fn list_runs_follows_pagination() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(header_exists("authorization"))
            .and(body_partial_json(json!({"variables": {"cursor": null}})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(runs_page(&["a", "b"], Some("c1"))),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_partial_json(json!({"variables": {"cursor": "c1"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(runs_page(&["c"], None)))
            .mount(&server)
            .await;

        let runs = client_for(&server).list_runs().await.unwrap();
        let ids: Vec<&str> = runs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(runs[0].name, "name-a");
        assert_eq!(runs[0].last_history_step, Some(9));
    }

    #[tokio::test]
    async fn graphql_errors_become_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": null, "errors": [{"message": "project not found"}]
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).list_runs().await.unwrap_err();
        assert!(matches!(err, ToolError::Api { ref message } if message == "project not found"));
    }

    #[tokio::test]
    async fn http_failures_carry_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let err = client_for(&server).list_runs().await.unwrap_err();
        assert!(err.to_string().contains("401"), "{err}");
        assert_eq!(err.exit_code(), 3);
    }

    #[tokio::test]
    async fn scan_history_pages_by_step_window() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_partial_json(json!({"variables": {"run": "r1", "minStep": 0}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"project": {"run": {"history": [
                    "{\"_step\": 0, \"iter\": 0}",
                    "{\"_step\": 1, \"iter\": 10}"
                ]}}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let rows = client_for(&server)
            .scan_history(&run("r1", Some(1)))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].metric("iter"), Some(10.0));
    }

    #[tokio::test]
    async fn scan_history_skips_runs_without_history() {
        let server = MockServer::start().await;
        let rows = client_for(&server)
            .scan_history(&run("r1", None))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn missing_run_is_reported_by_name() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"project": {"run": null}}
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).list_files(&run("gone", None)).await.unwrap_err();
        assert!(err.to_string().contains("name-gone"), "{err}");
    }

    #[tokio::test]
    async fn delete_file_sends_file_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_partial_json(json!({"variables": {"files": ["F1"]}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"deleteFiles": {"success": true}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let file = RunFile {
            id: "F1".into(),
            name: "a.pth".into(),
            size_bytes: 1,
            download_url: None,
        };
        client_for(&server).delete_file(&file).await.unwrap();
    }

    #[tokio::test]
    async fn download_file_streams_to_disk() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blob/ckpt.pth"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"weights".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested").join("ckpt.pth");
        let file = RunFile {
            id: "F1".into(),
            name: "ckpt.pth".into(),
            size_bytes: 7,
            download_url: Some(format!("{}/blob/ckpt.pth", server.uri())),
        };
        let n = client_for(&server).download_file(&file, &dest).await.unwrap();
        assert_eq!(n, 7);
        assert_eq!(std::fs::read(&dest).unwrap(), b"weights");
    }

    #[tokio::test]
    async fn log_history_posts_to_file_stream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/files/team/proj/merged1/file_stream"))
            .and(body_partial_json(json!({"files": {"wandb-history.jsonl": {"offset": 0}}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/files/team/proj/merged1/file_stream"))
            .and(body_partial_json(json!({"complete": true, "exitcode": 0})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let target = run("merged1", None);
        let rows: Vec<HistoryRecord> = (0..3)
            .map(|i| serde_json::from_value(json!({"_step": i, "iter": i * 10})).unwrap())
            .collect();
        client.log_history(&target, &rows).await.unwrap();
        client.finish_run(&target).await.unwrap();
    }
}
