// src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use conary_planner::{
    JobTuple, MemoryDatabase, MemoryRepository, ModelFile, SavedJob, TroveCache, UpdateConfig, UpdatePlan,
    UpdatePlanner,
};
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "conary-planner")]
#[command(author, version, about = "Plan system model updates against trove snapshots", long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan the update that makes the installed system match a model
    Plan {
        /// System model file
        #[arg(short, long)]
        model: PathBuf,
        /// Repository snapshot (JSON)
        #[arg(short, long)]
        repo: PathBuf,
        /// Installed database snapshot (JSON)
        #[arg(short, long)]
        db: PathBuf,
        /// Planner configuration (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Trove cache snapshot, loaded when present and saved afterwards
        #[arg(long)]
        cache: Option<PathBuf>,
        /// Save the split job for a later restart
        #[arg(long)]
        save_job: Option<PathBuf>,
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Parse a system model and print it back
    Format {
        /// System model file
        #[arg(short, long)]
        model: PathBuf,
    },
    /// Show the sub-jobs of a saved job that are left to apply
    ShowJob {
        /// Saved job file
        #[arg(short, long)]
        job: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let stdout = std::io::stdout();
    run(cli.command, &mut stdout.lock())
}

fn run(command: Commands, out: &mut impl Write) -> Result<()> {
    match command {
        Commands::Plan {
            model,
            repo,
            db,
            config,
            cache,
            save_job,
            json,
        } => {
            let config = match config {
                Some(path) => UpdateConfig::load(&path).with_context(|| format!("loading {}", path.display()))?,
                None => UpdateConfig::default(),
            };
            let model_file = ModelFile::open(&model).with_context(|| format!("reading {}", model.display()))?;
            let repository = MemoryRepository::load(&repo).with_context(|| format!("loading {}", repo.display()))?;
            let database = MemoryDatabase::load(&db).with_context(|| format!("loading {}", db.display()))?;
            info!(
                "planning {} against {} repository trove(s), {} installed",
                model.display(),
                repository.len(),
                database.len()
            );

            let mut trove_cache = TroveCache::new(&repository, &database);
            if let Some(path) = &cache
                && path.exists()
            {
                trove_cache.load(path).with_context(|| format!("loading cache {}", path.display()))?;
            }

            let plan = UpdatePlanner::new(&mut trove_cache, config).plan_model(&model_file.model)?;

            if let Some(path) = &cache {
                trove_cache.save(path).with_context(|| format!("saving cache {}", path.display()))?;
            }
            if let Some(path) = &save_job {
                SavedJob::new(&plan.split).save(path)?;
                info!("saved job to {}", path.display());
            }

            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&plan)?)?;
            } else {
                print_plan(out, &plan)?;
            }
        }
        Commands::Format { model } => {
            let model_file = ModelFile::open(&model).with_context(|| format!("reading {}", model.display()))?;
            write!(out, "{}", model_file.model.format())?;
        }
        Commands::ShowJob { job } => {
            let saved = SavedJob::load(&job).with_context(|| format!("loading {}", job.display()))?;
            writeln!(out, "Saved at {}", saved.saved_at.to_rfc3339())?;
            for (i, sub) in saved.remaining()?.iter().enumerate() {
                writeln!(out, "Sub-job {}:", saved.applied + i + 1)?;
                print_jobs(out, sub)?;
            }
        }
    }

    Ok(())
}

fn print_jobs(out: &mut impl Write, jobs: &[JobTuple]) -> Result<()> {
    for job in jobs {
        writeln!(out, "    {}", job)?;
    }
    Ok(())
}

fn print_plan(out: &mut impl Write, plan: &UpdatePlan) -> Result<()> {
    if plan.is_empty() {
        writeln!(out, "Nothing to do.")?;
    }
    for (i, sub) in plan.split.iter().enumerate() {
        let critical = if plan.critical.contains(&i) { " (critical)" } else { "" };
        writeln!(out, "Sub-job {}{}:", i + 1, critical)?;
        print_jobs(out, sub)?;
    }
    for (required_by, troves) in &plan.suggestions {
        let names: Vec<String> = troves.iter().map(|t| t.to_string()).collect();
        writeln!(out, "Added for {}: {}", required_by, names.join(", "))?;
    }
    for kept in &plan.keep_list {
        writeln!(out, "Not erasing {}: required by {}", kept.job.name, kept.required_by)?;
    }
    for (old, new) in &plan.pin_mappings {
        writeln!(out, "Pinned {} kept next to {}", old, new)?;
    }
    Ok(())
}
