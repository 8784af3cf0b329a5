//! Merging split runs into one history.
//!
//! [`MergeEngine::plan`] only reads from the service: it scans every history,
//! orders runs by the overlap metric and verifies the ranges. [`MergeEngine::execute`]
//! then writes the merged output, copies files, uploads and tags.

use super::transfer::{is_safe_dir_name, FileCopier};
use crate::api::TrackingApi;
use crate::error::{ToolError, ToolResult};
use crate::metrics::{compute_range, is_non_decreasing, metric_values, MetricRange};
use crate::model::{
    HistoryRecord, ItemKind, ItemReport, MergeConfig, NewRun, Outcome, OverlapPolicy, Run,
};
use rand::Rng;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const MERGED_HISTORY_FILE: &str = "merged-history.jsonl";
pub const MANIFEST_FILE: &str = "merge-manifest.json";
const RUN_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// One source run, in merge order.
#[derive(Debug, Clone, Serialize)]
pub struct MergeSource {
    pub run: Run,
    pub range: MetricRange,
    pub rows: usize,
    /// Added to every `_step` of this run in the merged history.
    pub step_offset: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergePlan {
    pub metric: String,
    pub sources: Vec<MergeSource>,
    pub violations: Vec<String>,
    pub save_dir: PathBuf,
    pub merged_run_name: String,
    pub total_rows: usize,
    #[serde(skip)]
    pub history: Vec<HistoryRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub plan: MergePlan,
    pub dry_run: bool,
    pub merged_run: Option<Run>,
    pub files: Vec<ItemReport>,
    pub tags: Vec<ItemReport>,
}

impl MergeReport {
    pub fn failures(&self) -> usize {
        self.files
            .iter()
            .chain(self.tags.iter())
            .filter(|r| r.outcome.is_failure())
            .count()
    }
}

#[derive(Debug, Serialize)]
struct Manifest<'a> {
    created_utc: String,
    metric: &'a str,
    sources: &'a [MergeSource],
    violations: &'a [String],
    total_rows: usize,
    merged_run_id: Option<&'a str>,
    merged_run_name: &'a str,
}

/// Order runs by the minimum of the overlap metric, ascending.
pub fn order_by_metric(
    histories: Vec<(Run, Vec<HistoryRecord>)>,
    metric: &str,
) -> ToolResult<Vec<(Run, Vec<HistoryRecord>, MetricRange)>> {
    let mut ranged = Vec::with_capacity(histories.len());
    for (run, rows) in histories {
        let range = compute_range(&rows, metric).ok_or_else(|| ToolError::MissingMetric {
            metric: metric.to_string(),
            run_id: run.id.clone(),
            run_name: run.name.clone(),
        })?;
        ranged.push((run, rows, range));
    }
    ranged.sort_by(|a, b| a.2.min.total_cmp(&b.2.min));
    Ok(ranged)
}

/// Describe every adjacent pair whose ranges are not strictly increasing.
pub fn find_violations(
    ordered: &[(Run, Vec<HistoryRecord>, MetricRange)],
    metric: &str,
) -> Vec<String> {
    ordered
        .windows(2)
        .filter(|w| !w[0].2.strictly_before(&w[1].2))
        .map(|w| {
            let (a, b) = (&w[0], &w[1]);
            format!(
                "{} ({}) {metric} range [{}, {}] is not below {} ({}) range [{}, {}]",
                a.0.name, a.0.id, a.2.min, a.2.max, b.0.name, b.0.id, b.2.min, b.2.max
            )
        })
        .collect()
}

/// Concatenate histories in order, shifting a run's steps only when they would
/// not continue past the previous run's last step. Returns rows and per-run offsets.
pub fn concat_histories(histories: &[Vec<HistoryRecord>]) -> (Vec<HistoryRecord>, Vec<i64>) {
    let mut merged = Vec::with_capacity(histories.iter().map(Vec::len).sum());
    let mut offsets = Vec::with_capacity(histories.len());
    let mut prev_last: Option<i64> = None;

    for rows in histories {
        let first = rows.iter().find_map(HistoryRecord::step);
        let offset = match (prev_last, first) {
            (Some(prev), Some(first)) if first <= prev => prev + 1 - first,
            _ => 0,
        };
        for row in rows {
            let mut row = row.clone();
            if let Some(step) = row.step() {
                row.set_step(step + offset);
                prev_last = Some(prev_last.map_or(step + offset, |p| p.max(step + offset)));
            }
            merged.push(row);
        }
        offsets.push(offset);
    }
    (merged, offsets)
}

fn gen_run_id() -> String {
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| RUN_ID_ALPHABET[rng.gen_range(0..RUN_ID_ALPHABET.len())] as char)
        .collect()
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "now".into())
}

pub struct MergeEngine<'a> {
    api: &'a dyn TrackingApi,
    cfg: &'a MergeConfig,
}

impl<'a> MergeEngine<'a> {
    pub fn new(api: &'a dyn TrackingApi, cfg: &'a MergeConfig) -> Self {
        Self { api, cfg }
    }

    pub async fn plan(&self, runs: Vec<Run>) -> ToolResult<MergePlan> {
        if runs.len() < 2 {
            return Err(ToolError::TooFewRuns { found: runs.len() });
        }
        let metric = self.cfg.overlap_metric.as_str();

        let mut histories = Vec::with_capacity(runs.len());
        for run in runs {
            info!(run_id = %run.id, run_name = %run.name, "scanning history");
            let rows = self.api.scan_history(&run).await?;
            histories.push((run, rows));
        }

        let ordered = order_by_metric(histories, metric)?;
        let violations = find_violations(&ordered, metric);
        if !violations.is_empty() {
            match self.cfg.overlap_policy {
                OverlapPolicy::Abort => {
                    return Err(ToolError::OverlapVerification {
                        metric: metric.to_string(),
                        violations,
                    })
                }
                OverlapPolicy::Warn => {
                    for v in &violations {
                        warn!("{v}");
                    }
                }
            }
        }

        let rows: Vec<Vec<HistoryRecord>> = ordered.iter().map(|(_, h, _)| h.clone()).collect();
        let (history, offsets) = concat_histories(&rows);
        if !is_non_decreasing(&metric_values(&history, metric)) {
            warn!(metric, "merged history is not non-decreasing in the overlap metric");
        }
        let sources: Vec<MergeSource> = ordered
            .into_iter()
            .zip(offsets)
            .map(|((run, rows, range), step_offset)| MergeSource {
                run,
                range,
                rows: rows.len(),
                step_offset,
            })
            .collect();

        let save_dir = match &self.cfg.save_dir {
            Some(dir) => dir.clone(),
            None => {
                let first = &sources[0].run;
                if !is_safe_dir_name(&first.name) {
                    return Err(ToolError::config(format!(
                        "run name '{}' ({}) is not a usable directory name; pass --merge-run-save-dir",
                        first.name, first.id
                    )));
                }
                self.cfg.results_dir.join(&first.name)
            }
        };
        let merged_run_name = self
            .cfg
            .merged_run_name
            .clone()
            .or_else(|| {
                save_dir
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| format!("{}-merged", sources[0].run.name));

        Ok(MergePlan {
            metric: metric.to_string(),
            total_rows: history.len(),
            sources,
            violations,
            save_dir,
            merged_run_name,
            history,
        })
    }

    pub async fn execute(&self, plan: MergePlan, dry_run: bool) -> ToolResult<MergeReport> {
        if !dry_run {
            std::fs::create_dir_all(&plan.save_dir)
                .map_err(|e| ToolError::io(&plan.save_dir, e))?;
            write_history(&plan.save_dir.join(MERGED_HISTORY_FILE), &plan.history)?;
        }

        let mut copier = FileCopier::new(&plan.save_dir, self.cfg.file_policy, dry_run)
            .reserve(&[MERGED_HISTORY_FILE, MANIFEST_FILE]);
        let mut files = Vec::new();
        for source in &plan.sources {
            match self.api.list_files(&source.run).await {
                Ok(list) => files.extend(copier.copy_run_files(self.api, &source.run, &list).await),
                Err(e) => {
                    warn!(run_id = %source.run.id, error = %e, "could not list files");
                    files.push(ItemReport {
                        run_id: source.run.id.clone(),
                        run_name: source.run.name.clone(),
                        kind: ItemKind::File,
                        item: "*".into(),
                        outcome: Outcome::Failed(e.to_string()),
                    });
                }
            }
        }

        let merged_run = if self.cfg.upload && !dry_run {
            Some(self.upload(&plan).await?)
        } else {
            None
        };

        let tags = self.tag_sources(&plan.sources, dry_run).await;

        if !dry_run {
            let manifest = Manifest {
                created_utc: now_rfc3339(),
                metric: &plan.metric,
                sources: &plan.sources,
                violations: &plan.violations,
                total_rows: plan.total_rows,
                merged_run_id: merged_run.as_ref().map(|r| r.id.as_str()),
                merged_run_name: &plan.merged_run_name,
            };
            let path = plan.save_dir.join(MANIFEST_FILE);
            let json = serde_json::to_string_pretty(&manifest).map_err(|e| {
                ToolError::io(&path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
            })?;
            std::fs::write(&path, json).map_err(|e| ToolError::io(&path, e))?;
        }

        Ok(MergeReport {
            plan,
            dry_run,
            merged_run,
            files,
            tags,
        })
    }

    async fn upload(&self, plan: &MergePlan) -> ToolResult<Run> {
        let notes = plan
            .sources
            .iter()
            .map(|s| format!("{} ({})", s.run.name, s.run.id))
            .collect::<Vec<_>>()
            .join(", ");
        let new_run = NewRun {
            id: gen_run_id(),
            name: plan.merged_run_name.clone(),
            tags: Vec::new(),
            notes: Some(format!("Merged from runs: {notes}")),
        };
        let run = self.api.create_run(&new_run).await?;
        info!(
            run_id = %run.id,
            run_name = %run.name,
            rows = plan.history.len(),
            "uploading merged history"
        );
        self.api.log_history(&run, &plan.history).await?;
        self.api.finish_run(&run).await?;
        Ok(run)
    }

    async fn tag_sources(&self, sources: &[MergeSource], dry_run: bool) -> Vec<ItemReport> {
        let Some(tag) = self.cfg.partial_tag.as_deref() else {
            return Vec::new();
        };
        let mut reports = Vec::with_capacity(sources.len());
        for source in sources {
            let run = &source.run;
            let outcome = match with_tag(&run.tags, tag) {
                None => Outcome::Skipped("already tagged".into()),
                Some(_) if dry_run => Outcome::DryRun,
                Some(tags) => match self.api.set_tags(run, &tags).await {
                    Ok(()) => {
                        info!(run_id = %run.id, tag, "tagged source run");
                        Outcome::Done
                    }
                    Err(e) => {
                        warn!(run_id = %run.id, error = %e, "tagging failed");
                        Outcome::Failed(e.to_string())
                    }
                },
            };
            reports.push(ItemReport {
                run_id: run.id.clone(),
                run_name: run.name.clone(),
                kind: ItemKind::Tag,
                item: tag.to_string(),
                outcome,
            });
        }
        reports
    }
}

/// Tag set with `tag` added, or `None` when already present.
fn with_tag(tags: &[String], tag: &str) -> Option<Vec<String>> {
    if tags.iter().any(|t| t == tag) {
        return None;
    }
    let mut out = tags.to_vec();
    out.push(tag.to_string());
    Some(out)
}

fn write_history(path: &Path, rows: &[HistoryRecord]) -> ToolResult<()> {
    let file = std::fs::File::create(path).map_err(|e| ToolError::io(path, e))?;
    let mut out = std::io::BufWriter::new(file);
    for row in rows {
        serde_json::to_writer(&mut out, row)
            .map_err(|e| ToolError::io(path, std::io::Error::from(e)))?;
        out.write_all(b"\n").map_err(|e| ToolError::io(path, e))?;
    }
    out.flush().map_err(|e| ToolError::io(path, e))
}
