mod commands;
mod logging;
mod progress;

use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use dotenv::dotenv;
use progress::CliReporter;
use tensor_duper::report::{self, TableTotals};
use tensor_duper::storage::CheckpointStore;
use tensor_duper::{AppConfig, DedupeEngine};
use tracing::{error, info, warn};

fn main() {
    dotenv().ok();

    let args = Cli::parse();
    let command = args.command.as_ref().map_or("help", Commands::name);
    let _guard = logging::init_logger(command);

    let config = match tensor_duper::config::load_configuration(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let result = match args.command {
        Some(Commands::Process {
            dir,
            checkpoint_dir,
            workers,
        }) => run_process(with_overrides(config, dir, checkpoint_dir, workers)),
        Some(Commands::Status) => run_status(&config),
        Some(Commands::ExportDuplicates { output }) => run_export(&config, output),
        Some(Commands::PrintConfig) => toml::to_string_pretty(&config)
            .map(|rendered| println!("{}", rendered))
            .context("rendering configuration"),
        Some(Commands::ResetCheckpoint) => run_reset(&config),
        None => Cli::command()
            .print_long_help()
            .context("printing help"),
    };

    if let Err(err) = result {
        error!("Error: {:#}", err);
        process::exit(1);
    }
}

fn with_overrides(
    mut config: AppConfig,
    dir: Option<PathBuf>,
    checkpoint_dir: Option<PathBuf>,
    workers: Option<usize>,
) -> AppConfig {
    if let Some(dir) = dir {
        config.scan_dir = dir;
    }
    if let Some(checkpoint_dir) = checkpoint_dir {
        config.checkpoint_dir = checkpoint_dir;
    }
    if let Some(workers) = workers {
        config.workers = workers;
    }
    config
}

fn run_process(config: AppConfig) -> anyhow::Result<()> {
    let engine = DedupeEngine::new(config);
    let reporter = CliReporter::new();
    let result = engine.run(&reporter)?;

    info!(
        "Scan: {}, Refine: {}",
        format!("{:.2}s", result.scan_duration.as_secs_f64()).green(),
        format!("{:.2}s", result.refine_duration.as_secs_f64()).green(),
    );
    info!(
        "{} files detected, {} already processed, {} loaded, {} failed to load",
        format!("{}", result.files_discovered).cyan(),
        format!("{}", result.files_skipped).cyan(),
        format!("{}", result.files_loaded).cyan(),
        format!("{}", result.load_failures).yellow(),
    );
    if result.files_unsupported > 0 {
        warn!(
            "{} files skipped because their paths are not valid UTF-8",
            format!("{}", result.files_unsupported).yellow(),
        );
    }
    print_totals(&result.totals);
    Ok(())
}

fn run_status(config: &AppConfig) -> anyhow::Result<()> {
    let store = CheckpointStore::open(&config.checkpoint_dir)?;
    let tables = store.load_all()?;
    print_totals(&TableTotals::from_tables(&tables));
    Ok(())
}

fn run_export(config: &AppConfig, output: PathBuf) -> anyhow::Result<()> {
    let store = CheckpointStore::open(&config.checkpoint_dir)?;
    let tables = store.load_all()?;
    let rows = report::write_duplicates_csv(&tables, &output)
        .with_context(|| format!("writing {}", output.display()))?;
    info!("{} duplicate rows written to {}", rows, output.display());
    Ok(())
}

fn run_reset(config: &AppConfig) -> anyhow::Result<()> {
    let prompt = format!(
        "Are you SURE you want to DELETE the checkpoint tables in {}?",
        config.checkpoint_dir.display()
    );
    if prompt_confirm(&prompt, Some(false))? {
        CheckpointStore::open(&config.checkpoint_dir)?.clear()?;
        println!("Checkpoint tables removed");
    }
    Ok(())
}

fn print_totals(totals: &TableTotals) {
    println!("Total files processed: {}", totals.files_recorded);
    println!(
        "Groups: {} ({} with more than one file)",
        totals.coarse_groups, totals.multi_member_groups
    );
    println!(
        "Refined clusters: {} ({} multi-file candidates)",
        totals.refined_clusters, totals.candidate_clusters
    );
    println!(
        "Duplicate clusters: {}, duplicate files: {}, {} bytes wasted",
        format!("{}", totals.duplicate_clusters).red(),
        format!("{}", totals.duplicate_files).red(),
        format!("{}", totals.wasted_bytes).red(),
    );
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        if io::stdin().read_line(&mut input)? == 0 {
            return Ok(default.unwrap_or(false));
        }

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
