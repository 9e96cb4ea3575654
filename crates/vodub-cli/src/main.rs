//! CLI entry point - the composition root.
//!
//! Commands map onto the runner: `run` drives the pipeline to a phase,
//! `bless` re-fingerprints a phase's artifacts after manual edits,
//! `phases` lists the pipeline. Exit code is 0 on success, 1 on any
//! failure.

mod cli;

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::Parser;
use tracing::{error, info};
use uuid::Uuid;

use vodub_core::layout::workspace_for;
use vodub_core::manifest::Manifest;
use vodub_core::phase::RunContext;
use vodub_core::runner::{BlessOutcome, PhaseRunner};
use vodub_core::settings::PipelineConfig;
use vodub_phases::all_phases;

use cli::{Cli, Commands};

fn resolve_workspace(video: &Path, output_dir: Option<&Path>) -> PathBuf {
    match output_dir {
        Some(dir) => {
            let stem = video
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("episode");
            dir.join(stem)
        }
        None => workspace_for(video),
    }
}

async fn run_command(
    video: PathBuf,
    to: String,
    from_phase: Option<String>,
    output_dir: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let video = video
        .canonicalize()
        .with_context(|| format!("video file not found: {}", video.display()))?;

    let mut config = match config_path {
        Some(path) => PipelineConfig::load(&path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    config.video_path = Some(video.clone());

    let workspace = resolve_workspace(&video, output_dir.as_deref());
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("cannot create workspace {}", workspace.display()))?;

    let mut manifest = Manifest::load(&workspace.join("manifest.json"))?;
    let job_id = Uuid::new_v4().to_string();
    manifest.set_job(&job_id, &workspace.display().to_string());
    manifest.save()?;

    let ctx = RunContext {
        job_id,
        workspace: workspace.clone(),
        config,
    };
    let mut runner = PhaseRunner::new(manifest, workspace);
    let phases = all_phases();

    let outputs = runner
        .run_pipeline(&phases, &ctx, Some(&to), from_phase.as_deref())
        .await?;

    info!("pipeline completed");
    for (key, path) in outputs {
        println!("{key}: {}", path.display());
    }
    Ok(())
}

fn bless_command(video: PathBuf, phase: String) -> anyhow::Result<()> {
    let video = video
        .canonicalize()
        .with_context(|| format!("video file not found: {}", video.display()))?;
    let workspace = workspace_for(&video);
    let manifest_path = workspace.join("manifest.json");
    if !manifest_path.exists() {
        bail!("manifest not found: {}", manifest_path.display());
    }

    let manifest = Manifest::load(&manifest_path)?;
    let mut runner = PhaseRunner::new(manifest, workspace);
    let outcomes = runner.bless(&phase)?;
    if outcomes.is_empty() {
        bail!("phase '{phase}' has no output artifacts");
    }

    let mut updated = 0usize;
    for outcome in outcomes {
        match outcome {
            BlessOutcome::Unchanged(key) => println!("  {key}: unchanged"),
            BlessOutcome::Updated { key, old, new } => {
                updated += 1;
                let old_short: String = old.chars().take(16).collect();
                let new_short: String = new.chars().take(16).collect();
                println!("  {key}: {old_short}... -> {new_short}...");
            }
            BlessOutcome::Missing { key, path } => {
                println!("  {key}: file not found ({})", path.display());
            }
        }
    }
    if updated > 0 {
        println!("Blessed {updated} artifact(s) for phase '{phase}'");
    } else {
        println!("All artifacts for phase '{phase}' are unchanged");
    }
    Ok(())
}

fn phases_command() {
    println!("Available phases:");
    for phase in all_phases() {
        println!(
            "  - {} (v{}): requires={:?}, provides={:?}",
            phase.name(),
            phase.version(),
            phase.requires(),
            phase.provides()
        );
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    dotenvy::dotenv().ok();

    let result = match cli.command {
        Commands::Run {
            video,
            to,
            from_phase,
            output_dir,
            config,
        } => run_command(video, to, from_phase, output_dir, config).await,
        Commands::Bless { video, phase } => bless_command(video, phase),
        Commands::Phases => {
            phases_command();
            Ok(())
        }
    };

    if let Err(e) = result {
        error!("{e:#}");
        std::process::exit(1);
    }
}
