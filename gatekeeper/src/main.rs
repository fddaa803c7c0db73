//! Gatekeeper CLI.
//!
//! Manages `gatekeeper.toml` and replays recorded event streams through the
//! full admission, retry, timeout and monitoring pipeline.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gatekeeper::core::contract::{AcceptAny, JsonSchemaContract, PayloadContract};
use gatekeeper::io::config::{DEFAULT_CONFIG_PATH, GatekeeperConfig, load_config, write_config};
use gatekeeper::io::event_stream::JsonlReplay;
use gatekeeper::{AdmissionController, Driver, exit_codes, logging};
use serde_json::json;

#[derive(Parser)]
#[command(
    name = "gatekeeper",
    version,
    about = "Admission control and monitoring for long-running agent tasks"
)]
struct Cli {
    /// Path to the config file.
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default config if missing.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Load the config and check every limit.
    Validate,
    /// Run a recorded JSON-lines event stream through the driver.
    Replay {
        /// Recorded events, one JSON object per line.
        events: PathBuf,
        /// Cost units to reserve for the run.
        #[arg(long, default_value_t = 1)]
        cost: u64,
        /// JSON Schema for the result payload (defaults to the review report schema).
        #[arg(long, conflicts_with = "no_schema")]
        schema: Option<PathBuf>,
        /// Accept any result payload.
        #[arg(long)]
        no_schema: bool,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Validate => cmd_validate(&cli.config),
        Command::Replay {
            events,
            cost,
            schema,
            no_schema,
        } => cmd_replay(&cli.config, &events, cost, schema.as_deref(), no_schema),
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if !force && config_path.exists() {
        eprintln!("{} already exists (use --force to overwrite)", config_path.display());
        return Ok(exit_codes::OK);
    }
    write_config(config_path, &GatekeeperConfig::default())?;
    println!("wrote {}", config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_validate(config_path: &Path) -> Result<i32> {
    load_config(config_path)?;
    println!("ok");
    Ok(exit_codes::OK)
}

fn cmd_replay(
    config_path: &Path,
    events: &Path,
    cost: u64,
    schema: Option<&Path>,
    no_schema: bool,
) -> Result<i32> {
    let config = load_config(config_path)?;
    let contract = load_contract(schema, no_schema)?;
    let admission = AdmissionController::new(config.rate_limits())?;
    let driver = Driver::new(Arc::new(admission), config.driver_settings(), contract)?;
    let task = JsonlReplay::new(events);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    let outcome = runtime.block_on(driver.run(cost, &task));

    match outcome {
        Ok(outcome) => {
            let report = json!({
                "status": "succeeded",
                "attempts": outcome.attempts,
                "elapsed_ms": outcome.elapsed.as_millis() as u64,
                "counters": outcome.counters,
                "payload": outcome.payload,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("serialize outcome")?
            );
            Ok(exit_codes::OK)
        }
        Err(err) => {
            let report = json!({
                "status": err.root_cause().as_label(),
                "error": err.to_string(),
                "attempts": err.attempts(),
                "elapsed_ms": err.elapsed().map(|elapsed| elapsed.as_millis() as u64),
                "counters": err.counters(),
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("serialize outcome")?
            );
            Ok(exit_codes::for_run_error(&err))
        }
    }
}

fn load_contract(
    schema: Option<&Path>,
    no_schema: bool,
) -> Result<Arc<dyn PayloadContract + Send + Sync>> {
    if no_schema {
        return Ok(Arc::new(AcceptAny));
    }
    let contract = match schema {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("read schema {}", path.display()))?;
            JsonSchemaContract::from_json_str(&raw)
                .with_context(|| format!("compile schema {}", path.display()))?
        }
        None => JsonSchemaContract::review_report()?,
    };
    Ok(Arc::new(contract))
}
