//! Run selection by id, exact name, or name pattern.

use crate::api::TrackingApi;
use crate::error::{ToolError, ToolResult};
use crate::model::Run;
use regex::Regex;
use std::collections::HashSet;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct SelectionConfig {
    /// Each id must resolve to exactly one run.
    pub run_ids: Vec<String>,
    /// Each name must resolve to at least one run.
    pub run_names: Vec<String>,
    pub select_run_ids: Vec<String>,
    pub skip_run_ids: Vec<String>,
    pub select_name_patterns: Vec<Regex>,
    pub skip_name_patterns: Vec<Regex>,
}

/// Compile user-supplied patterns, naming the offending flag on failure.
pub fn compile_patterns(patterns: &[String], flag: &str) -> ToolResult<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p)
                .map_err(|e| ToolError::config(format!("invalid {flag} pattern '{p}': {e}")))
        })
        .collect()
}

/// Apply `cfg` to the project's runs.
pub fn select_runs(all: Vec<Run>, cfg: &SelectionConfig) -> ToolResult<Vec<Run>> {
    let mut candidates: Vec<Run> = if !cfg.run_ids.is_empty() || !cfg.run_names.is_empty() {
        let mut picked = Vec::new();
        for id in &cfg.run_ids {
            let matching: Vec<&Run> = all.iter().filter(|r| &r.id == id).collect();
            match matching.as_slice() {
                [one] => picked.push((*one).clone()),
                [] => {
                    return Err(ToolError::selection(format!(
                        "no run with id '{id}'; verify entity, project and that the run still exists"
                    )))
                }
                many => {
                    return Err(ToolError::selection(format!(
                        "found {} runs with id '{id}', expected one",
                        many.len()
                    )))
                }
            }
        }
        for name in &cfg.run_names {
            let before = picked.len();
            picked.extend(all.iter().filter(|r| &r.name == name).cloned());
            if picked.len() == before {
                return Err(ToolError::selection(format!("no run named '{name}'")));
            }
        }
        picked
    } else {
        all
    };

    candidates.retain(|run| keep(run, cfg));

    let mut seen = HashSet::new();
    candidates.retain(|run| seen.insert(run.id.clone()));

    if candidates.is_empty() {
        return Err(ToolError::selection("no runs matched the given filters"));
    }
    Ok(candidates)
}

fn keep(run: &Run, cfg: &SelectionConfig) -> bool {
    if cfg.skip_run_ids.iter().any(|id| id == &run.id) {
        debug!(run_id = %run.id, "skipped by id");
        return false;
    }
    if !cfg.select_run_ids.is_empty() && !cfg.select_run_ids.iter().any(|id| id == &run.id) {
        return false;
    }
    if cfg.skip_name_patterns.iter().any(|re| re.is_match(&run.name)) {
        debug!(run_name = %run.name, "skipped by name pattern");
        return false;
    }
    if !cfg.select_name_patterns.is_empty()
        && !cfg.select_name_patterns.iter().any(|re| re.is_match(&run.name))
    {
        return false;
    }
    true
}

/// List the project's runs and apply `cfg`.
pub async fn resolve_runs(api: &dyn TrackingApi, cfg: &SelectionConfig) -> ToolResult<Vec<Run>> {
    let all = api.list_runs().await?;
    let total = all.len();
    let runs = select_runs(all, cfg)?;
    info!(selected = runs.len(), total, "selected runs");
    Ok(runs)
}
