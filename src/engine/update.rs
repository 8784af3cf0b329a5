//! Pattern-based deletion of run files and artifacts.

use crate::api::TrackingApi;
use crate::model::{Artifact, ItemKind, ItemReport, Outcome, Run, RunFile, UpdateConfig};
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DeleteTarget {
    File(RunFile),
    Artifact(Artifact),
}

impl DeleteTarget {
    pub fn name(&self) -> &str {
        match self {
            DeleteTarget::File(f) => &f.name,
            DeleteTarget::Artifact(a) => &a.name,
        }
    }

    pub fn kind(&self) -> ItemKind {
        match self {
            DeleteTarget::File(_) => ItemKind::File,
            DeleteTarget::Artifact(_) => ItemKind::Artifact,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedDeletion {
    pub run_id: String,
    pub run_name: String,
    pub target: DeleteTarget,
}

impl PlannedDeletion {
    fn report(&self, outcome: Outcome) -> ItemReport {
        ItemReport {
            run_id: self.run_id.clone(),
            run_name: self.run_name.clone(),
            kind: self.target.kind(),
            item: self.target.name().to_string(),
            outcome,
        }
    }
}

/// Everything that would be deleted, gathered before any mutation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeletePlan {
    pub entries: Vec<PlannedDeletion>,
    /// Runs whose files or artifacts could not be listed.
    pub listing_failures: Vec<ItemReport>,
}

impl DeletePlan {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Reports for a dry run: every entry as would-delete, plus listing failures.
    pub fn dry_run_reports(&self) -> Vec<ItemReport> {
        self.entries
            .iter()
            .map(|e| e.report(Outcome::DryRun))
            .chain(self.listing_failures.iter().cloned())
            .collect()
    }
}

fn matches_any(patterns: &[Regex], name: &str) -> bool {
    patterns.iter().any(|re| re.is_match(name))
}

fn listing_failure(run: &Run, kind: ItemKind, error: String) -> ItemReport {
    ItemReport {
        run_id: run.id.clone(),
        run_name: run.name.clone(),
        kind,
        item: "*".into(),
        outcome: Outcome::Failed(error),
    }
}

pub struct UpdateEngine<'a> {
    api: &'a dyn TrackingApi,
    cfg: &'a UpdateConfig,
}

impl<'a> UpdateEngine<'a> {
    pub fn new(api: &'a dyn TrackingApi, cfg: &'a UpdateConfig) -> Self {
        Self { api, cfg }
    }

    /// Enumerate matching files and artifacts of every run. Never mutates.
    pub async fn plan(&self, runs: &[Run]) -> DeletePlan {
        let mut plan = DeletePlan::default();
        for run in runs {
            if !self.cfg.file_patterns.is_empty() {
                match self.api.list_files(run).await {
                    Ok(files) => {
                        let matched: Vec<RunFile> = files
                            .into_iter()
                            .filter(|f| matches_any(&self.cfg.file_patterns, &f.name))
                            .collect();
                        if !matched.is_empty() {
                            info!(
                                run_name = %run.name,
                                count = matched.len(),
                                "found matching files"
                            );
                        }
                        plan.entries.extend(matched.into_iter().map(|f| PlannedDeletion {
                            run_id: run.id.clone(),
                            run_name: run.name.clone(),
                            target: DeleteTarget::File(f),
                        }));
                    }
                    Err(e) => {
                        warn!(run_id = %run.id, error = %e, "could not list files");
                        plan.listing_failures
                            .push(listing_failure(run, ItemKind::File, e.to_string()));
                    }
                }
            }

            if !self.cfg.artifact_patterns.is_empty() {
                match self.api.list_artifacts(run).await {
                    Ok(artifacts) => {
                        let matched: Vec<Artifact> = artifacts
                            .into_iter()
                            .filter(|a| matches_any(&self.cfg.artifact_patterns, &a.name))
                            .collect();
                        if !matched.is_empty() {
                            info!(
                                run_name = %run.name,
                                count = matched.len(),
                                "found matching artifacts"
                            );
                        }
                        plan.entries.extend(matched.into_iter().map(|a| PlannedDeletion {
                            run_id: run.id.clone(),
                            run_name: run.name.clone(),
                            target: DeleteTarget::Artifact(a),
                        }));
                    }
                    Err(e) => {
                        warn!(run_id = %run.id, error = %e, "could not list artifacts");
                        plan.listing_failures
                            .push(listing_failure(run, ItemKind::Artifact, e.to_string()));
                    }
                }
            }
        }
        plan
    }

    /// Delete every planned item; one failure does not stop the batch.
    pub async fn execute(&self, plan: &DeletePlan) -> Vec<ItemReport> {
        let mut reports = Vec::with_capacity(plan.len() + plan.listing_failures.len());
        for entry in &plan.entries {
            let result = match &entry.target {
                DeleteTarget::File(f) => self.api.delete_file(f).await,
                DeleteTarget::Artifact(a) => {
                    self.api.delete_artifact(a, self.cfg.delete_aliases).await
                }
            };
            let outcome = match result {
                Ok(()) => {
                    info!(run_name = %entry.run_name, item = %entry.target.name(), "deleted");
                    Outcome::Done
                }
                Err(e) => {
                    warn!(
                        run_name = %entry.run_name,
                        item = %entry.target.name(),
                        error = %e,
                        "delete failed"
                    );
                    Outcome::Failed(e.to_string())
                }
            };
            reports.push(entry.report(outcome));
        }
        reports.extend(plan.listing_failures.iter().cloned());
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::memory::{run, MemoryApi};
    use crate::engine::selector::compile_patterns;

    fn cfg(files: &[&str], artifacts: &[&str]) -> UpdateConfig {
        let own = |ps: &[&str]| ps.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        UpdateConfig {
            file_patterns: compile_patterns(&own(files), "--delete-filename-regex").unwrap(),
            artifact_patterns: compile_patterns(&own(artifacts), "--delete-artifact-regex")
                .unwrap(),
            delete_aliases: true,
        }
    }

    fn names(plan: &DeletePlan) -> Vec<&str> {
        plan.entries.iter().map(|e| e.target.name()).collect()
    }

    #[tokio::test]
    async fn dry_run_reports_only_matching_files() {
        let api = MemoryApi::new()
            .with_file("r1", "a.pth", b"w")
            .with_file("r1", "b.json", b"{}");
        let runs = vec![run("r1", "run-one")];
        let cfg = cfg(&[r".*\.pth"], &[]);
        let engine = UpdateEngine::new(&api, &cfg);

        let plan = engine.plan(&runs).await;
        assert_eq!(names(&plan), vec!["a.pth"]);
        let reports = plan.dry_run_reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].item, "a.pth");
        assert_eq!(reports[0].outcome, Outcome::DryRun);
        assert!(api.deleted_files().is_empty());
        assert!(api.deleted_artifacts().is_empty());
    }

    #[tokio::test]
    async fn file_matching_several_patterns_is_listed_once() {
        let api = MemoryApi::new().with_file("r1", "ckpt_bbox_segm.pth", b"w");
        let runs = vec![run("r1", "run-one")];
        let cfg = cfg(&[r".*_segm_.*\.pth", r".*_bbox_.*\.pth"], &[]);
        let plan = UpdateEngine::new(&api, &cfg).plan(&runs).await;
        assert_eq!(plan.len(), 1);
    }

    #[tokio::test]
    async fn deletes_files_and_artifacts_with_aliases() {
        let api = MemoryApi::new()
            .with_file("r1", "predictions/x.json", b"1")
            .with_file("r1", "config.yaml", b"2")
            .with_artifact("r1", "run-r1-preds_pred_final:v0")
            .with_artifact("r1", "model:v3");
        let runs = vec![run("r1", "run-one")];
        let cfg = cfg(&["^predictions/.*"], &[".*_pred_final"]);
        let engine = UpdateEngine::new(&api, &cfg);

        let plan = engine.plan(&runs).await;
        let reports = engine.execute(&plan).await;

        assert!(reports.iter().all(|r| r.outcome == Outcome::Done));
        assert_eq!(api.deleted_files(), vec!["r1/predictions/x.json".to_string()]);
        assert_eq!(
            api.deleted_artifacts(),
            vec![("r1/run-r1-preds_pred_final:v0".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn keep_aliases_is_passed_through() {
        let api = MemoryApi::new().with_artifact("r1", "model:v3");
        let runs = vec![run("r1", "run-one")];
        let mut cfg = cfg(&[], &["^model:"]);
        cfg.delete_aliases = false;
        let engine = UpdateEngine::new(&api, &cfg);

        let plan = engine.plan(&runs).await;
        let reports = engine.execute(&plan).await;

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].outcome, Outcome::Done);
        assert_eq!(api.deleted_artifacts(), vec![("r1/model:v3".to_string(), false)]);
    }

    #[tokio::test]
    async fn one_failed_delete_does_not_stop_the_batch() {
        let api = MemoryApi::new()
            .with_file("r1", "a.pth", b"w")
            .with_file("r2", "b.pth", b"w")
            .failing_on("r1/a.pth");
        let runs = vec![run("r1", "one"), run("r2", "two")];
        let cfg = cfg(&[r"\.pth$"], &[]);
        let engine = UpdateEngine::new(&api, &cfg);

        let plan = engine.plan(&runs).await;
        let reports = engine.execute(&plan).await;

        assert_eq!(reports.len(), 2);
        assert!(reports[0].outcome.is_failure());
        assert_eq!(reports[1].outcome, Outcome::Done);
        assert_eq!(api.deleted_files(), vec!["r2/b.pth".to_string()]);
    }

    #[tokio::test]
    async fn listing_failure_is_reported_and_other_runs_continue() {
        let api = MemoryApi::new()
            .with_file("r2", "b.pth", b"w")
            .failing_on("r1");
        let runs = vec![run("r1", "broken"), run("r2", "fine")];
        let cfg = cfg(&[r"\.pth$"], &[]);
        let plan = UpdateEngine::new(&api, &cfg).plan(&runs).await;

        assert_eq!(names(&plan), vec!["b.pth"]);
        assert_eq!(plan.listing_failures.len(), 1);
        assert_eq!(plan.listing_failures[0].run_name, "broken");
    }
}
