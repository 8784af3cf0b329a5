//! Pulling run files into per-run local directories.

use super::transfer::{is_safe_dir_name, FileCopier};
use crate::api::TrackingApi;
use crate::model::{DownloadConfig, ItemKind, ItemReport, Outcome, Run};
use tracing::{info, warn};

pub struct DownloadEngine<'a> {
    api: &'a dyn TrackingApi,
    cfg: &'a DownloadConfig,
}

impl<'a> DownloadEngine<'a> {
    pub fn new(api: &'a dyn TrackingApi, cfg: &'a DownloadConfig) -> Self {
        Self { api, cfg }
    }

    /// Copy each run's files (or only the checkpoint) into `<results_dir>/<run name>/`.
    pub async fn run(&self, runs: &[Run], dry_run: bool) -> Vec<ItemReport> {
        let mut reports = Vec::new();
        for run in runs {
            if !is_safe_dir_name(&run.name) {
                warn!(
                    run_id = %run.id,
                    run_name = %run.name,
                    "run name is not a plain directory name"
                );
                reports.push(failure(run, "*", "run name is not a usable directory name".into()));
                continue;
            }
            let run_dir = self.cfg.results_dir.join(&run.name);
            info!(run_name = %run.name, dir = %run_dir.display(), "syncing run files");

            let files = match self.api.list_files(run).await {
                Ok(files) => files,
                Err(e) => {
                    warn!(run_id = %run.id, error = %e, "could not list files");
                    reports.push(failure(run, "*", e.to_string()));
                    continue;
                }
            };
            let files = match self.cfg.checkpoint_name.as_deref() {
                Some(name) => {
                    let matched: Vec<_> = files.into_iter().filter(|f| f.name == name).collect();
                    if matched.is_empty() {
                        warn!(run_name = %run.name, checkpoint = name, "checkpoint not found");
                        reports.push(failure(run, name, "checkpoint not found in run".into()));
                        continue;
                    }
                    matched
                }
                None => files,
            };

            let mut copier = FileCopier::new(&run_dir, self.cfg.file_policy, dry_run);
            reports.extend(copier.copy_run_files(self.api, run, &files).await);
        }
        reports
    }
}

fn failure(run: &Run, item: &str, reason: String) -> ItemReport {
    ItemReport {
        run_id: run.id.clone(),
        run_name: run.name.clone(),
        kind: ItemKind::File,
        item: item.to_string(),
        outcome: Outcome::Failed(reason),
    }
}
