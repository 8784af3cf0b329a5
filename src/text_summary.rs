//! Text summary builder for CLI output.
//!
//! Formats human-readable lines for merge plans and batch reports in text mode.

use crate::engine::merge::MergePlan;
use crate::engine::MergeReport;
use crate::engine::DeletePlan;
use crate::model::{ItemKind, ItemReport, Outcome};

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Describe what a merge is about to do.
pub(crate) fn build_merge_plan_summary(plan: &MergePlan) -> TextSummary {
    let mut lines = vec![format!(
        "Merge order by '{}' ({} runs, {} history rows):",
        plan.metric,
        plan.sources.len(),
        plan.total_rows
    )];
    for (i, s) in plan.sources.iter().enumerate() {
        let shift = if s.step_offset != 0 {
            format!(", steps shifted by {}", s.step_offset)
        } else {
            String::new()
        };
        lines.push(format!(
            "  {}. {} ({}): {} [{}, {}], {} rows{}",
            i + 1,
            s.run.name,
            s.run.id,
            plan.metric,
            s.range.min,
            s.range.max,
            s.rows,
            shift
        ));
    }
    for v in &plan.violations {
        lines.push(format!("  WARNING: {v}"));
    }
    lines.push(format!("Save dir: {}", plan.save_dir.display()));
    lines.push(format!("Merged run name: {}", plan.merged_run_name));
    TextSummary { lines }
}

pub(crate) fn build_merge_summary(report: &MergeReport) -> TextSummary {
    let mut lines = Vec::new();
    if report.dry_run {
        lines.push("Dry run: nothing was written, uploaded or tagged".to_string());
    }
    if let Some(run) = report.merged_run.as_ref() {
        lines.push(format!("Merged run: {} ({})", run.name, run.id));
    }
    lines.push(counts_line("Files", &report.files));
    lines.extend(failure_lines(&report.files));
    if !report.tags.is_empty() {
        lines.push(counts_line("Tags", &report.tags));
        lines.extend(failure_lines(&report.tags));
    }
    TextSummary { lines }
}

/// List of would-delete items, grouped by run in plan order.
pub(crate) fn build_delete_plan_summary(plan: &DeletePlan) -> TextSummary {
    let mut lines = Vec::new();
    if plan.is_empty() {
        lines.push("Found no matching files or artifacts to delete".to_string());
    }
    let mut current_run: Option<&str> = None;
    for entry in &plan.entries {
        if current_run != Some(entry.run_id.as_str()) {
            lines.push(format!("{} ({}):", entry.run_name, entry.run_id));
            current_run = Some(entry.run_id.as_str());
        }
        lines.push(format!(
            "  {} {}",
            kind_label(entry.target.kind()),
            entry.target.name()
        ));
    }
    lines.extend(failure_lines(&plan.listing_failures));
    TextSummary { lines }
}

pub(crate) fn build_batch_summary(title: &str, reports: &[ItemReport]) -> TextSummary {
    let mut lines = vec![counts_line(title, reports)];
    lines.extend(failure_lines(reports));
    TextSummary { lines }
}

fn kind_label(kind: ItemKind) -> &'static str {
    match kind {
        ItemKind::File => "file",
        ItemKind::Artifact => "artifact",
        ItemKind::Tag => "tag",
    }
}

fn counts_line(title: &str, reports: &[ItemReport]) -> String {
    let (mut done, mut dry, mut skipped, mut failed) = (0, 0, 0, 0);
    for r in reports {
        match r.outcome {
            Outcome::Done => done += 1,
            Outcome::DryRun => dry += 1,
            Outcome::Skipped(_) => skipped += 1,
            Outcome::Failed(_) => failed += 1,
        }
    }
    let mut line = format!("{title}: {done} done, {skipped} skipped, {failed} failed");
    if dry > 0 {
        line.push_str(&format!(", {dry} dry-run"));
    }
    line
}

fn failure_lines(reports: &[ItemReport]) -> Vec<String> {
    reports
        .iter()
        .filter_map(|r| match &r.outcome {
            Outcome::Failed(reason) => Some(format!(
                "  FAILED {} {} in {} ({}): {}",
                kind_label(r.kind),
                r.item,
                r.run_name,
                r.run_id,
                reason
            )),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(item: &str, outcome: Outcome) -> ItemReport {
        ItemReport {
            run_id: "r1".into(),
            run_name: "one".into(),
            kind: ItemKind::File,
            item: item.into(),
            outcome,
        }
    }

    #[test]
    fn batch_summary_counts_and_names_failures() {
        let reports = vec![
            report("a.pth", Outcome::Done),
            report("b.pth", Outcome::Failed("HTTP 403".into())),
            report("c.pth", Outcome::Skipped("exists".into())),
        ];
        let s = build_batch_summary("Deleted", &reports);
        assert_eq!(s.lines[0], "Deleted: 1 done, 1 skipped, 1 failed");
        assert_eq!(s.lines[1], "  FAILED file b.pth in one (r1): HTTP 403");
    }

    #[test]
    fn dry_run_counts_are_only_shown_when_present() {
        let s = build_batch_summary("Files", &[report("a", Outcome::DryRun)]);
        assert_eq!(s.lines[0], "Files: 0 done, 0 skipped, 0 failed, 1 dry-run");
    }

    #[test]
    fn empty_delete_plan_says_so() {
        let s = build_delete_plan_summary(&DeletePlan::default());
        assert_eq!(s.lines, vec!["Found no matching files or artifacts to delete"]);
    }
}
