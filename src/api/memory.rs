//! In-memory tracking backend used by engine tests.

use super::TrackingApi;
use crate::error::{ToolError, ToolResult};
use crate::model::{Artifact, HistoryRecord, NewRun, Run, RunFile};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

#[derive(Default)]
struct State {
    runs: Vec<Run>,
    history: HashMap<String, Vec<HistoryRecord>>,
    files: HashMap<String, Vec<(RunFile, Vec<u8>)>>,
    artifacts: HashMap<String, Vec<Artifact>>,
    failing: HashSet<String>,
    deleted_files: Vec<String>,
    deleted_artifacts: Vec<(String, bool)>,
    tag_updates: Vec<(String, Vec<String>)>,
    created: Vec<Run>,
    logged: HashMap<String, Vec<HistoryRecord>>,
    finished: Vec<String>,
}

#[derive(Default)]
pub(crate) struct MemoryApi {
    state: Mutex<State>,
}

pub(crate) fn run(id: &str, name: &str) -> Run {
    Run {
        id: id.to_string(),
        storage_id: format!("storage-{id}"),
        name: name.to_string(),
        tags: Vec::new(),
        last_history_step: None,
    }
}

impl MemoryApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_run(self, run: Run) -> Self {
        self.state.lock().unwrap().runs.push(run);
        self
    }

    pub(crate) fn with_history(self, run_id: &str, rows: Vec<HistoryRecord>) -> Self {
        {
            let mut st = self.state.lock().unwrap();
            let last = rows.iter().filter_map(HistoryRecord::step).max();
            if let Some(r) = st.runs.iter_mut().find(|r| r.id == run_id) {
                r.last_history_step = last;
            }
            st.history.insert(run_id.to_string(), rows);
        }
        self
    }

    pub(crate) fn with_file(self, run_id: &str, name: &str, contents: &[u8]) -> Self {
        {
            let mut st = self.state.lock().unwrap();
            let files = st.files.entry(run_id.to_string()).or_default();
            let file = RunFile {
                id: format!("{run_id}/{name}"),
                name: name.to_string(),
                size_bytes: contents.len() as u64,
                download_url: Some(format!("mem://{run_id}/{name}")),
            };
            files.push((file, contents.to_vec()));
        }
        self
    }

    pub(crate) fn with_artifact(self, run_id: &str, name: &str) -> Self {
        {
            let mut st = self.state.lock().unwrap();
            let artifacts = st.artifacts.entry(run_id.to_string()).or_default();
            artifacts.push(Artifact {
                id: format!("{run_id}/{name}"),
                name: name.to_string(),
                aliases: vec!["latest".to_string()],
            });
        }
        self
    }

    /// Make every mutation on the file/artifact with this id fail.
    pub(crate) fn failing_on(self, item_id: &str) -> Self {
        self.state.lock().unwrap().failing.insert(item_id.to_string());
        self
    }

    pub(crate) fn deleted_files(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted_files.clone()
    }

    pub(crate) fn deleted_artifacts(&self) -> Vec<(String, bool)> {
        self.state.lock().unwrap().deleted_artifacts.clone()
    }

    pub(crate) fn tag_updates(&self) -> Vec<(String, Vec<String>)> {
        self.state.lock().unwrap().tag_updates.clone()
    }

    pub(crate) fn created_runs(&self) -> Vec<Run> {
        self.state.lock().unwrap().created.clone()
    }

    pub(crate) fn logged_history(&self, run_id: &str) -> Vec<HistoryRecord> {
        self.state
            .lock()
            .unwrap()
            .logged
            .get(run_id)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn finished(&self) -> Vec<String> {
        self.state.lock().unwrap().finished.clone()
    }

    pub(crate) fn runs(&self) -> Vec<Run> {
        self.state.lock().unwrap().runs.clone()
    }
}

fn injected(id: &str) -> ToolError {
    ToolError::Api {
        message: format!("injected failure for {id}"),
    }
}

#[async_trait]
impl TrackingApi for MemoryApi {
    async fn list_runs(&self) -> ToolResult<Vec<Run>> {
        Ok(self.state.lock().unwrap().runs.clone())
    }

    async fn scan_history(&self, run: &Run) -> ToolResult<Vec<HistoryRecord>> {
        let st = self.state.lock().unwrap();
        Ok(st.history.get(&run.id).cloned().unwrap_or_default())
    }

    async fn list_files(&self, run: &Run) -> ToolResult<Vec<RunFile>> {
        let st = self.state.lock().unwrap();
        if st.failing.contains(&run.id) {
            return Err(injected(&run.id));
        }
        Ok(st
            .files
            .get(&run.id)
            .map(|fs| fs.iter().map(|(f, _)| f.clone()).collect())
            .unwrap_or_default())
    }

    async fn download_file(&self, file: &RunFile, dest: &Path) -> ToolResult<u64> {
        let contents = {
            let st = self.state.lock().unwrap();
            if st.failing.contains(&file.id) {
                return Err(injected(&file.id));
            }
            st.files
                .values()
                .flatten()
                .find(|(f, _)| f.id == file.id)
                .map(|(_, c)| c.clone())
                .ok_or_else(|| injected(&file.id))?
        };
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ToolError::io(parent, e))?;
        }
        std::fs::write(dest, &contents).map_err(|e| ToolError::io(dest, e))?;
        Ok(contents.len() as u64)
    }

    async fn delete_file(&self, file: &RunFile) -> ToolResult<()> {
        let mut st = self.state.lock().unwrap();
        if st.failing.contains(&file.id) {
            return Err(injected(&file.id));
        }
        st.deleted_files.push(file.id.clone());
        Ok(())
    }

    async fn list_artifacts(&self, run: &Run) -> ToolResult<Vec<Artifact>> {
        let st = self.state.lock().unwrap();
        Ok(st.artifacts.get(&run.id).cloned().unwrap_or_default())
    }

    async fn delete_artifact(&self, artifact: &Artifact, delete_aliases: bool) -> ToolResult<()> {
        let mut st = self.state.lock().unwrap();
        if st.failing.contains(&artifact.id) {
            return Err(injected(&artifact.id));
        }
        st.deleted_artifacts
            .push((artifact.id.clone(), delete_aliases));
        Ok(())
    }

    async fn set_tags(&self, run: &Run, tags: &[String]) -> ToolResult<()> {
        let mut st = self.state.lock().unwrap();
        if st.failing.contains(&run.storage_id) {
            return Err(injected(&run.storage_id));
        }
        if let Some(r) = st.runs.iter_mut().find(|r| r.id == run.id) {
            r.tags = tags.to_vec();
        }
        st.tag_updates.push((run.id.clone(), tags.to_vec()));
        Ok(())
    }

    async fn create_run(&self, new_run: &NewRun) -> ToolResult<Run> {
        let mut st = self.state.lock().unwrap();
        let created = Run {
            id: new_run.id.clone(),
            storage_id: format!("storage-{}", new_run.id),
            name: new_run.name.clone(),
            tags: new_run.tags.clone(),
            last_history_step: None,
        };
        st.created.push(created.clone());
        Ok(created)
    }

    async fn log_history(&self, run: &Run, records: &[HistoryRecord]) -> ToolResult<()> {
        let mut st = self.state.lock().unwrap();
        st.logged
            .entry(run.id.clone())
            .or_default()
            .extend_from_slice(records);
        Ok(())
    }

    async fn finish_run(&self, run: &Run) -> ToolResult<()> {
        self.state.lock().unwrap().finished.push(run.id.clone());
        Ok(())
    }
}
