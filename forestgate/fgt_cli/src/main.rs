use std::{path::PathBuf, sync::Arc};

use anyhow::{ensure, Context, Result};
use clap::{Parser, Subcommand};
use forestgate_training::{
    ArtifactStore, DefaultPipeline, PipelineConfig, PipelineTelemetry, PredictionUnit, Table,
};
use serde_json::json;
use shared_event_bus::FileEventPublisher;
use shared_logging::{ConsoleLogger, FanoutLogger, JsonLogger, LogLevel};

#[derive(Parser, Debug)]
#[command(name = "fgt", version, about = "Forestgate training pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Runs ingestion, validation, transformation and training.
    Run(RunArgs),
    /// Predicts labels for a CSV batch with a promoted model.
    Predict(PredictArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Pipeline configuration (TOML).
    #[arg(long)]
    config: PathBuf,
    /// Append JSON log lines to this file.
    #[arg(long)]
    log_file: Option<PathBuf>,
    /// Append lifecycle events to this file.
    #[arg(long)]
    event_log: Option<PathBuf>,
    /// Only print warnings and errors on the console.
    #[arg(long)]
    quiet: bool,
}

#[derive(Parser, Debug)]
struct PredictArgs {
    /// Persisted prediction unit.
    #[arg(long)]
    model: PathBuf,
    /// CSV batch with a header row.
    #[arg(long)]
    input: PathBuf,
    /// Scale with training-time parameters instead of re-fitting on the batch.
    #[arg(long)]
    frozen: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => handle_run(&args),
        Commands::Predict(args) => handle_predict(&args),
    }
}

fn handle_run(args: &RunArgs) -> Result<()> {
    ensure!(
        args.config.exists(),
        "config file {} not found",
        args.config.display()
    );
    let config = PipelineConfig::load(&args.config)?;

    let console = if args.quiet {
        ConsoleLogger::new(LogLevel::Warn)
    } else {
        ConsoleLogger::default()
    };
    let mut sinks = FanoutLogger::new().with_sink(console);
    if let Some(path) = &args.log_file {
        let file = JsonLogger::new(path)
            .with_context(|| format!("opening log file {}", path.display()))?;
        sinks = sinks.with_sink(file);
    }
    let mut builder = PipelineTelemetry::builder("fgt").log_sink(Arc::new(sinks));
    if let Some(path) = &args.event_log {
        builder = builder.event_publisher(Arc::new(FileEventPublisher::new(path)?));
    }
    let telemetry = builder.build().context("initialising telemetry")?;

    telemetry.note(
        LogLevel::Info,
        "starting training pipeline",
        json!({
            "config": args.config.display().to_string(),
            "artifact_dir": config.artifact_dir.display().to_string(),
            "ensemble_size": config.trainer.ensemble_size,
            "threshold": config.trainer.expected_accuracy_threshold,
        }),
    );
    let pipeline = DefaultPipeline::from_config(&config, &telemetry);
    let artifact = pipeline.run_pipeline()?;
    println!("{}", serde_json::to_string_pretty(&artifact)?);
    Ok(())
}

fn handle_predict(args: &PredictArgs) -> Result<()> {
    let unit = PredictionUnit::load(&ArtifactStore::new(), &args.model)
        .with_context(|| format!("loading model {}", args.model.display()))?;
    let batch = Table::read_csv(&args.input)
        .with_context(|| format!("reading batch {}", args.input.display()))?;
    let labels = if args.frozen {
        unit.predict_frozen(&batch)?
    } else {
        unit.predict(&batch)?
    };
    for label in &labels {
        println!("{label}");
    }
    Ok(())
}
