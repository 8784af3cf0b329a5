use crate::api::{TrackingApi, WandbClient};
use crate::engine::{
    compile_patterns, resolve_runs, DownloadEngine, MergeEngine, SelectionConfig, UpdateEngine,
};
use crate::error::ToolError;
use crate::model::{ApiConfig, DownloadConfig, FilePolicy, MergeConfig, OverlapPolicy, UpdateConfig};
use crate::text_summary::{self, TextSummary};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Parser, Clone)]
#[command(
    name = "wandb-run-tools",
    version,
    about = "Merge split W&B runs and bulk-delete run files and artifacts"
)]
pub struct Cli {
    /// W&B entity (user or team name)
    #[arg(long = "wandb-entity", alias = "wandb_entity", env = "WANDB_ENTITY", global = true)]
    pub wandb_entity: Option<String>,

    /// W&B project name
    #[arg(long = "wandb-project", alias = "wandb_project", env = "WANDB_PROJECT", global = true)]
    pub wandb_project: Option<String>,

    /// API key (default: $WANDB_API_KEY, then ~/.netrc)
    #[arg(
        long = "api-key",
        alias = "api_key",
        env = "WANDB_API_KEY",
        hide_env_values = true,
        global = true
    )]
    pub api_key: Option<String>,

    /// Base URL of the W&B API
    #[arg(
        long = "base-url",
        alias = "base_url",
        env = "WANDB_BASE_URL",
        default_value = "https://api.wandb.ai",
        global = true
    )]
    pub base_url: String,

    /// Per-request timeout
    #[arg(long, default_value = "60s", global = true)]
    pub timeout: humantime::Duration,

    /// Report what would happen without changing anything
    #[arg(long = "dry-run", alias = "dry_run", global = true)]
    pub dry_run: bool,

    /// Skip the confirmation prompt
    #[arg(short = 'y', long, global = true)]
    pub yes: bool,

    /// Print the final report as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Merge the histories and files of runs that were split into separate sessions
    Merge(MergeArgs),
    /// Delete files and artifacts matching patterns across runs
    Update(UpdateArgs),
    /// Download run files (or one checkpoint) into per-run directories
    Download(DownloadArgs),
}

#[derive(Debug, Args, Clone)]
pub struct MergeArgs {
    /// Names of the runs to merge (a name may match several runs)
    #[arg(long = "run-names", alias = "run_names", num_args = 1..)]
    pub run_names: Vec<String>,

    /// Ids of the runs to merge
    #[arg(long = "run-ids", alias = "run_ids", num_args = 1..)]
    pub run_ids: Vec<String>,

    /// Metric used to order runs and verify their ranges do not overlap
    #[arg(long = "verify-overlap-metric", alias = "verify_overlap_metric")]
    pub verify_overlap_metric: String,

    /// What to do when ranges overlap
    #[arg(long = "overlap-policy", alias = "overlap_policy", value_enum, default_value = "abort")]
    pub overlap_policy: OverlapPolicy,

    /// Directory for the merged output (default: <results-dir>/<first run name>)
    #[arg(long = "merge-run-save-dir", alias = "merge_run_save_dir")]
    pub merge_run_save_dir: Option<PathBuf>,

    /// Parent directory for the default save dir
    #[arg(long = "results-dir", alias = "results_dir", default_value = ".")]
    pub results_dir: PathBuf,

    /// Tag added to every source run; pass an empty string to disable
    #[arg(long = "tag-partial-runs", alias = "tag_partial_runs", default_value = "partial-run")]
    pub tag_partial_runs: String,

    /// Name for the merged run (default: save dir folder name)
    #[arg(long = "merged-run-name", alias = "merged_run_name")]
    pub merged_run_name: Option<String>,

    /// Overwrite files that already exist in the save dir (default: skip)
    #[arg(long = "overwrite-existing", alias = "overwrite_existing")]
    pub overwrite_existing: bool,

    /// Only write the merged output locally; do not create a merged run
    #[arg(long = "no-upload", alias = "no_upload")]
    pub no_upload: bool,
}

#[derive(Debug, Args, Clone, Default)]
pub struct FilterArgs {
    /// Only consider these run ids
    #[arg(long = "select-run-ids", alias = "select_run_ids", num_args = 1..)]
    pub select_run_ids: Vec<String>,

    /// Ignore these run ids
    #[arg(long = "skip-run-ids", alias = "skip_run_ids", num_args = 1..)]
    pub skip_run_ids: Vec<String>,

    /// Only consider runs whose name matches one of these patterns
    #[arg(long = "select-run-names-regex", alias = "select_run_names_regex", num_args = 1..)]
    pub select_run_names_regex: Vec<String>,

    /// Ignore runs whose name matches one of these patterns
    #[arg(long = "skip-run-names-regex", alias = "skip_run_names_regex", num_args = 1..)]
    pub skip_run_names_regex: Vec<String>,
}

#[derive(Debug, Args, Clone)]
pub struct UpdateArgs {
    /// Delete files whose path matches any of these patterns
    #[arg(long = "delete-filename-regex", alias = "delete_filename_regex", num_args = 1..)]
    pub delete_filename_regex: Vec<String>,

    /// Delete artifacts whose name matches any of these patterns
    #[arg(long = "delete-artifact-regex", alias = "delete_artifact_regex", num_args = 1..)]
    pub delete_artifact_regex: Vec<String>,

    /// Keep artifact aliases instead of deleting them with the artifact
    #[arg(long = "keep-aliases", alias = "keep_aliases")]
    pub keep_aliases: bool,

    #[command(flatten)]
    pub filters: FilterArgs,
}

#[derive(Debug, Args, Clone)]
pub struct DownloadArgs {
    /// Parent directory; each run lands in <results-dir>/<run name>
    #[arg(long = "results-dir", alias = "results_dir")]
    pub results_dir: PathBuf,

    /// Runs to download (default: all runs passing the filters)
    #[arg(long = "run-names", alias = "run_names", num_args = 1..)]
    pub run_names: Vec<String>,

    /// Only download this file from each run
    #[arg(long = "checkpoint-name", alias = "checkpoint_name")]
    pub checkpoint_name: Option<String>,

    /// Overwrite files that already exist locally (default: skip)
    #[arg(long = "overwrite-existing", alias = "overwrite_existing")]
    pub overwrite_existing: bool,

    #[command(flatten)]
    pub filters: FilterArgs,
}

fn require(value: Option<&str>, flag: &str, env: &str) -> Result<String, ToolError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ToolError::config(format!("missing {flag} (default: ${env})")))
}

/// Build an `ApiConfig` from CLI arguments.
pub fn build_api_config(args: &Cli) -> Result<ApiConfig, ToolError> {
    let entity = require(args.wandb_entity.as_deref(), "--wandb-entity", "WANDB_ENTITY")?;
    let project = require(args.wandb_project.as_deref(), "--wandb-project", "WANDB_PROJECT")?;
    let api_key = crate::auth::resolve_api_key(args.api_key.as_deref(), &args.base_url)?;
    Ok(ApiConfig {
        base_url: args.base_url.clone(),
        api_key,
        entity,
        project,
        timeout: Duration::from(args.timeout),
        user_agent: format!("wandb-run-tools/{}", env!("CARGO_PKG_VERSION")),
    })
}

pub fn build_filters(filters: &FilterArgs) -> Result<SelectionConfig, ToolError> {
    Ok(SelectionConfig {
        select_run_ids: filters.select_run_ids.clone(),
        skip_run_ids: filters.skip_run_ids.clone(),
        select_name_patterns: compile_patterns(
            &filters.select_run_names_regex,
            "--select-run-names-regex",
        )?,
        skip_name_patterns: compile_patterns(
            &filters.skip_run_names_regex,
            "--skip-run-names-regex",
        )?,
        ..Default::default()
    })
}

/// Merge only works on runs named explicitly by id or name.
pub fn build_merge_selection(m: &MergeArgs) -> Result<SelectionConfig, ToolError> {
    if m.run_names.is_empty() && m.run_ids.is_empty() {
        return Err(ToolError::config(
            "pass --run-names and/or --run-ids to choose runs to merge",
        ));
    }
    Ok(SelectionConfig {
        run_ids: m.run_ids.clone(),
        run_names: m.run_names.clone(),
        ..Default::default()
    })
}

pub fn build_merge_config(m: &MergeArgs) -> MergeConfig {
    let tag = m.tag_partial_runs.trim();
    MergeConfig {
        overlap_metric: m.verify_overlap_metric.clone(),
        overlap_policy: m.overlap_policy,
        save_dir: m.merge_run_save_dir.clone(),
        results_dir: m.results_dir.clone(),
        partial_tag: (!tag.is_empty()).then(|| tag.to_string()),
        file_policy: FilePolicy::from_overwrite_flag(m.overwrite_existing),
        merged_run_name: m.merged_run_name.clone(),
        upload: !m.no_upload,
    }
}

pub fn build_update_config(u: &UpdateArgs) -> Result<UpdateConfig, ToolError> {
    if u.delete_filename_regex.is_empty() && u.delete_artifact_regex.is_empty() {
        return Err(ToolError::config(
            "nothing to delete: pass --delete-filename-regex and/or --delete-artifact-regex",
        ));
    }
    Ok(UpdateConfig {
        file_patterns: compile_patterns(&u.delete_filename_regex, "--delete-filename-regex")?,
        artifact_patterns: compile_patterns(&u.delete_artifact_regex, "--delete-artifact-regex")?,
        delete_aliases: !u.keep_aliases,
    })
}

pub fn build_download_config(d: &DownloadArgs) -> DownloadConfig {
    DownloadConfig {
        results_dir: d.results_dir.clone(),
        checkpoint_name: d.checkpoint_name.clone(),
        file_policy: FilePolicy::from_overwrite_flag(d.overwrite_existing),
    }
}

pub async fn run(args: Cli) -> Result<()> {
    let api_cfg = build_api_config(&args)?;
    info!(project = %api_cfg.project_path(), "querying W&B");
    let client = WandbClient::new(&api_cfg)?;

    match &args.command {
        Command::Merge(m) => run_merge(&args, m, &client).await,
        Command::Update(u) => run_update(&args, u, &client).await,
        Command::Download(d) => run_download(&args, d, &client).await,
    }
}

async fn run_merge(args: &Cli, m: &MergeArgs, api: &dyn TrackingApi) -> Result<()> {
    let selection = build_merge_selection(m)?;
    let cfg = build_merge_config(m);

    let runs = resolve_runs(api, &selection).await?;
    let engine = MergeEngine::new(api, &cfg);
    let plan = engine.plan(runs).await?;
    if !args.json {
        print_lines(text_summary::build_merge_plan_summary(&plan));
    }

    let prompt = format!(
        "Merge {} runs into {}?",
        plan.sources.len(),
        plan.save_dir.display()
    );
    if !args.dry_run && !confirm(args, &prompt) {
        info!("skipping merge");
        return Ok(());
    }

    let report = engine
        .execute(plan, args.dry_run)
        .await
        .context("merge failed")?;
    if report.failures() > 0 {
        warn!(failures = report.failures(), "merge finished with per-item failures");
    }
    if args.json {
        print_json(&report)
    } else {
        print_lines(text_summary::build_merge_summary(&report));
        Ok(())
    }
}

async fn run_update(args: &Cli, u: &UpdateArgs, api: &dyn TrackingApi) -> Result<()> {
    let cfg = build_update_config(u)?;
    let selection = build_filters(&u.filters)?;

    let runs = resolve_runs(api, &selection).await?;
    let engine = UpdateEngine::new(api, &cfg);
    let plan = engine.plan(&runs).await;
    if !args.json {
        print_lines(text_summary::build_delete_plan_summary(&plan));
    }

    if args.dry_run {
        let reports = plan.dry_run_reports();
        return if args.json {
            print_json(&reports)
        } else {
            print_lines(text_summary::build_batch_summary("Would delete", &reports));
            Ok(())
        };
    }
    if plan.is_empty() {
        return if args.json { print_json(&plan.listing_failures) } else { Ok(()) };
    }
    if !confirm(args, &format!("Delete {} files/artifacts?", plan.len())) {
        info!("skipping deletion");
        return Ok(());
    }

    let reports = engine.execute(&plan).await;
    if args.json {
        print_json(&reports)
    } else {
        print_lines(text_summary::build_batch_summary("Deleted", &reports));
        Ok(())
    }
}

async fn run_download(args: &Cli, d: &DownloadArgs, api: &dyn TrackingApi) -> Result<()> {
    let mut selection = build_filters(&d.filters)?;
    selection.run_names = d.run_names.clone();
    let cfg = build_download_config(d);

    let runs = resolve_runs(api, &selection).await?;
    let reports = DownloadEngine::new(api, &cfg).run(&runs, args.dry_run).await;
    if args.json {
        print_json(&reports)
    } else {
        print_lines(text_summary::build_batch_summary("Downloaded", &reports));
        Ok(())
    }
}

/// y/N prompt; `--yes` answers for the user. A closed stdin counts as "no".
fn confirm(args: &Cli, prompt: &str) -> bool {
    if args.yes {
        return true;
    }
    dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .unwrap_or(false)
}

fn print_lines(summary: TextSummary) {
    for line in summary.lines {
        println!("{line}");
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("failed to encode report")?;
    println!("{out}");
    Ok(())
}
