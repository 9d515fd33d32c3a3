//! CLI guard over the proof artifact.
//!
//! Exits 0 when the artifact admits follow-on agentic work, 5 with a
//! structured JSON error otherwise, and 2 only on a crash of the guard
//! itself.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use serde_json::json;

use engine::guard::{run_guard, GuardVerdict};
use engine::io::config::ConfigOverrides;
use engine::{exit_codes, logging};

#[derive(Parser)]
#[command(
    name = "engine-guard",
    version,
    about = "Check the proof artifact before admitting agentic work"
)]
struct Cli {
    /// Repository root containing `.engine/`.
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Override the freshness window, in minutes.
    #[arg(long)]
    proof_max_age_min: Option<u64>,

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
    let overrides = ConfigOverrides {
        proof_max_age_min: cli.proof_max_age_min,
        ..ConfigOverrides::default()
    };
    let verdict: GuardVerdict = run_guard(&cli.root, &overrides)?;
    println!("{}", serde_json::to_string_pretty(&verdict)?);
    Ok(verdict.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_defaults() {
        let cli = Cli::parse_from(["engine-guard"]);
        assert_eq!(cli.root, PathBuf::from("."));
        assert!(cli.proof_max_age_min.is_none());
    }

    #[test]
    fn parse_age_override() {
        let cli = Cli::parse_from(["engine-guard", "--proof-max-age-min", "3"]);
        assert_eq!(cli.proof_max_age_min, Some(3));
    }
}
