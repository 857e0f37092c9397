//! taskforge CLI.
//!
//! Drives the ticket pipeline with the local collaborators: tickets are JSON
//! files in `--tickets`, service repositories live under `--repos`, and all
//! state goes under the configured directories relative to `--root`.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use taskforge::agents::{CliInvoker, Invoker};
use taskforge::core::step::Step;
use taskforge::debate::DebateEngine;
use taskforge::exit_codes;
use taskforge::io::checkpoint::CheckpointStore;
use taskforge::io::config::{CONFIG_FILE_NAME, ForgeConfig, load_config, write_config};
use taskforge::io::prompt::PromptBuilder;
use taskforge::local::{FileTracker, LocalCheckout, LocalShipper, StdoutNotifier};
use taskforge::pipeline::{Collaborators, Pipeline, ResumeError, Tracker, Workspace};
use taskforge::strategy::StrategyRunner;

#[derive(Parser)]
#[command(
    name = "taskforge",
    version,
    about = "Turn tickets into shipped changes with debating coding agents"
)]
struct Cli {
    /// Directory holding `taskforge.toml`; relative state paths resolve here.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Log progress at info level (overridden by `RUST_LOG`).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct Sources {
    /// Directory of `<KEY>.json` ticket files.
    #[arg(long)]
    tickets: PathBuf,
    /// Directory containing one git repository per affected system.
    #[arg(long)]
    repos: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Write `taskforge.toml` with default settings.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Run the full pipeline for a ticket.
    Run {
        key: String,
        #[command(flatten)]
        sources: Sources,
    },
    /// Continue a ticket from a step, using its checkpoint.
    Resume {
        key: String,
        /// Step name (e.g. `execute`) or number.
        #[arg(long)]
        from: Step,
        #[command(flatten)]
        sources: Sources,
    },
    /// Debate and evaluate only; print the cheatsheet.
    Plan {
        key: String,
        #[command(flatten)]
        sources: Sources,
    },
    /// Print the ticket's checkpoint as JSON.
    Status { key: String },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    taskforge::logging::init(cli.verbose);
    match run(cli) {
        Ok(code) => exit_code(code),
        Err(err) => {
            eprintln!("{err:#}");
            if err.downcast_ref::<ResumeError>().is_some() {
                eprintln!("hint: `taskforge status <KEY>` shows the last completed step");
            }
            exit_code(exit_codes::INVALID)
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn run(cli: Cli) -> Result<i32> {
    let config_path = cli.root.join(CONFIG_FILE_NAME);
    let config = || -> Result<ForgeConfig> { Ok(load_config(&config_path)?.rooted_at(&cli.root)) };

    match cli.command {
        Command::Init { force } => cmd_init(&config_path, force),
        Command::Run { key, sources } => cmd_run(&config()?, &key, &sources, None),
        Command::Resume { key, from, sources } => cmd_run(&config()?, &key, &sources, Some(from)),
        Command::Plan { key, sources } => cmd_plan(&config()?, &key, &sources),
        Command::Status { key } => cmd_status(&config()?, &key),
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if config_path.exists() && !force {
        return Err(anyhow!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        ));
    }
    write_config(config_path, &ForgeConfig::default())?;
    println!("wrote {}", config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_run(config: &ForgeConfig, key: &str, sources: &Sources, from: Option<Step>) -> Result<i32> {
    let tracker = FileTracker::new(&sources.tickets);
    let workspace = LocalCheckout::new(&sources.repos, &config.clones_dir);
    let invoker: Arc<dyn Invoker> = Arc::new(CliInvoker::new(config));
    let pipeline = Pipeline::new(
        config,
        invoker,
        Collaborators {
            tracker: &tracker,
            workspace: &workspace,
            shipper: &LocalShipper,
            notifier: &StdoutNotifier,
        },
    );
    let report = match from {
        None => pipeline.run(key),
        Some(step) => pipeline.resume(key, step)?,
    };
    Ok(report.exit_code())
}

fn cmd_plan(config: &ForgeConfig, key: &str, sources: &Sources) -> Result<i32> {
    let tracker = FileTracker::new(&sources.tickets);
    let ticket = tracker.fetch_ticket(key)?;
    let target = ticket
        .targets()
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("ticket {key} has no target to inspect"))?;
    let workspace = LocalCheckout::new(&sources.repos, &config.clones_dir);
    let clone_dir = workspace.clone_target(key, &target)?;

    let invoker: Arc<dyn Invoker> = Arc::new(CliInvoker::new(config));
    let runner = StrategyRunner::new(invoker, config.modes.clone());
    let prompts = PromptBuilder::new(config.prompt_budget_bytes);
    let store = CheckpointStore::new(&config.state_dir);
    let outcome = DebateEngine::new(&runner, config, &prompts, &store).run(&ticket, &clone_dir);
    workspace.cleanup(&clone_dir)?;

    match outcome?.cheatsheet() {
        Some(cheatsheet) => {
            store.save_cheatsheet(key, cheatsheet)?;
            println!("{cheatsheet}");
            Ok(exit_codes::OK)
        }
        None => {
            eprintln!("{key}: no plan was approved");
            Ok(exit_codes::REJECTED)
        }
    }
}

fn cmd_status(config: &ForgeConfig, key: &str) -> Result<i32> {
    let store = CheckpointStore::new(&config.state_dir);
    let checkpoint = store
        .load(key)?
        .with_context(|| format!("no checkpoint for {key}"))?;
    println!("{}", serde_json::to_string_pretty(&checkpoint)?);
    Ok(exit_codes::OK)
}
