//! Copying run files into a local directory.

use crate::api::TrackingApi;
use crate::model::{FilePolicy, ItemKind, ItemReport, Outcome, Run, RunFile};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};

/// Copies files of one or more runs into `dest_dir`, applying one collision policy.
pub(crate) struct FileCopier {
    dest_dir: PathBuf,
    policy: FilePolicy,
    dry_run: bool,
    /// Relative paths written (or planned) during this invocation.
    claimed: HashSet<String>,
    /// Relative paths owned by the tool itself; never written by a copy.
    reserved: HashSet<String>,
}

impl FileCopier {
    pub(crate) fn new(dest_dir: impl Into<PathBuf>, policy: FilePolicy, dry_run: bool) -> Self {
        Self {
            dest_dir: dest_dir.into(),
            policy,
            dry_run,
            claimed: HashSet::new(),
            reserved: HashSet::new(),
        }
    }

    pub(crate) fn reserve(mut self, names: &[&str]) -> Self {
        self.reserved.extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub(crate) async fn copy_run_files(
        &mut self,
        api: &dyn TrackingApi,
        run: &Run,
        files: &[RunFile],
    ) -> Vec<ItemReport> {
        let mut reports = Vec::with_capacity(files.len());
        for file in files {
            let outcome = self.copy_one(api, run, file).await;
            reports.push(ItemReport {
                run_id: run.id.clone(),
                run_name: run.name.clone(),
                kind: ItemKind::File,
                item: file.name.clone(),
                outcome,
            });
        }
        reports
    }

    async fn copy_one(&mut self, api: &dyn TrackingApi, run: &Run, file: &RunFile) -> Outcome {
        if !is_safe_relative(&file.name) {
            warn!(run_id = %run.id, file = %file.name, "refusing path outside destination");
            return Outcome::Failed("path escapes destination directory".into());
        }
        if self.reserved.contains(&file.name) {
            warn!(run_id = %run.id, file = %file.name, "name collides with merge output, skipping");
            return Outcome::Skipped("reserved for merge output".into());
        }

        let dest = self.dest_dir.join(&file.name);
        let exists = self.claimed.contains(&file.name) || dest.exists();
        if exists && self.policy == FilePolicy::Skip {
            warn!(run_id = %run.id, file = %file.name, "file exists and not overwriting, skipping");
            return Outcome::Skipped("already exists".into());
        }
        self.claimed.insert(file.name.clone());

        if self.dry_run {
            info!(run_id = %run.id, file = %file.name, bytes = file.size_bytes, "would copy");
            return Outcome::DryRun;
        }
        match api.download_file(file, &dest).await {
            Ok(bytes) => {
                info!(run_id = %run.id, file = %file.name, bytes, "copied");
                Outcome::Done
            }
            Err(e) => {
                warn!(run_id = %run.id, file = %file.name, error = %e, "copy failed");
                Outcome::Failed(e.to_string())
            }
        }
    }
}

fn is_safe_relative(name: &str) -> bool {
    let path = Path::new(name);
    !name.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// A run name usable as one directory level under a parent directory.
pub(crate) fn is_safe_dir_name(name: &str) -> bool {
    let mut parts = Path::new(name).components();
    matches!(
        (parts.next(), parts.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains('\\')
}
