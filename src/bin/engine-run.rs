//! CLI for running one supervised task.
//!
//! Emits a single JSON object on stdout and exits per the engine's
//! exit-code protocol (0 ok, 1 failed, 2 capability missing / crash,
//! 5 asleep). The CLI itself carries no subagent capability; a real agentic
//! host links the library and supplies one.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{json, Value};

use engine::entry::{self, RunReport};
use engine::io::config::{parse_contract_mode, ConfigOverrides};
use engine::spawn::HostContext;
use engine::{exit_codes, logging};

#[derive(Parser)]
#[command(
    name = "engine-run",
    version,
    about = "Run a supervised recursion task and persist its proof artifact"
)]
struct Cli {
    /// Repository root containing `.engine/`.
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Task JSON object handed to the orchestrator.
    #[arg(long)]
    task: Option<String>,

    /// Contract mode: `agentic` or `local`.
    #[arg(long)]
    contract_mode: Option<String>,

    /// Enforce a real runtime (no simulation fallback).
    #[arg(long)]
    strict_mode: Option<bool>,

    /// Run the orchestrator in an isolated worker thread.
    #[arg(long)]
    use_worker: Option<bool>,

    /// Hard cap on recursion depth.
    #[arg(long)]
    max_depth: Option<u32>,

    /// Total spawn budget for the run.
    #[arg(long)]
    max_spawns: Option<u32>,

    /// Freshness window for the proof artifact, in minutes.
    #[arg(long)]
    proof_max_age_min: Option<u64>,

    /// Always fail with the asleep exit code.
    #[arg(long)]
    force_sleep: Option<bool>,

    /// Verbose diagnostic logging on stderr.
    #[arg(long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let code = match execute(&cli) {
        Ok(code) => code,
        Err(err) => {
            let crash = json!({
                "ok": false,
                "reason": "cli_crash",
                "error": format!("{err:#}"),
            });
            println!("{crash:#}");
            exit_codes::CAPABILITY_MISSING
        }
    };
    ExitCode::from(code as u8)
}

fn execute(cli: &Cli) -> Result<i32> {
    let task: Value = match &cli.task {
        Some(raw) => serde_json::from_str(raw).context("parse --task as JSON")?,
        None => json!({}),
    };

    let overrides = ConfigOverrides {
        contract_mode: cli
            .contract_mode
            .as_deref()
            .map(parse_contract_mode)
            .transpose()?,
        strict_mode: cli.strict_mode,
        use_worker: cli.use_worker,
        max_depth: cli.max_depth,
        max_spawns: cli.max_spawns,
        proof_max_age_min: cli.proof_max_age_min,
        force_sleep: cli.force_sleep,
        verbose: cli.verbose.then_some(true),
    };

    let report: RunReport = entry::run(&cli.root, task, &overrides, &HostContext::default())?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(entry::exit_code_for(&report))
}
