//! Engine configuration resolved from env, file, and built-in defaults.
//!
//! Precedence: explicit caller overrides, then screaming-snake environment
//! variables, then `<root>/.engine/config.json`, then defaults. The resolved
//! configuration is immutable for the rest of the run.

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::types::ContractMode;

/// Resolved engine configuration.
///
/// `contract_mode` and `strict_mode` stay optional here; preflight decides
/// their effective values from the host's capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub contract_mode: Option<ContractMode>,
    pub strict_mode: Option<bool>,
    pub use_worker: bool,
    pub max_depth: u32,
    pub max_spawns: u32,
    pub proof_max_age_min: u64,
    pub force_sleep: bool,
    pub verbose: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            contract_mode: None,
            strict_mode: None,
            use_worker: true,
            max_depth: 4,
            max_spawns: 10,
            proof_max_age_min: 10,
            force_sleep: false,
            verbose: false,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.proof_max_age_min == 0 {
            return Err(anyhow!("proofMaxAgeMin must be > 0"));
        }
        Ok(())
    }
}

/// Caller-supplied (CLI or embedding host) partial configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub contract_mode: Option<ContractMode>,
    pub strict_mode: Option<bool>,
    pub use_worker: Option<bool>,
    pub max_depth: Option<u32>,
    pub max_spawns: Option<u32>,
    pub proof_max_age_min: Option<u64>,
    pub force_sleep: Option<bool>,
    pub verbose: Option<bool>,
}

/// File form: every field optional so partial configs stay valid.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct FileConfig {
    contract_mode: Option<ContractMode>,
    strict_mode: Option<bool>,
    use_worker: Option<bool>,
    max_depth: Option<u32>,
    max_spawns: Option<u32>,
    proof_max_age_min: Option<u64>,
    force_sleep: Option<bool>,
    verbose: Option<bool>,
}

/// Resolve the effective configuration for a run rooted at `root`.
pub fn resolve_config(root: &Path, overrides: &ConfigOverrides) -> Result<EngineConfig> {
    let mut config = EngineConfig::default();
    apply_file(&mut config, &root.join(".engine").join("config.json"))?;
    apply_env(&mut config, |name| std::env::var(name).ok())?;
    apply_overrides(&mut config, overrides);
    config.validate()?;
    Ok(config)
}

fn apply_file(config: &mut EngineConfig, path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let file: FileConfig =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;

    merge(&mut config.contract_mode, file.contract_mode.map(Some));
    merge(&mut config.strict_mode, file.strict_mode.map(Some));
    merge(&mut config.use_worker, file.use_worker);
    merge(&mut config.max_depth, file.max_depth);
    merge(&mut config.max_spawns, file.max_spawns);
    merge(&mut config.proof_max_age_min, file.proof_max_age_min);
    merge(&mut config.force_sleep, file.force_sleep);
    merge(&mut config.verbose, file.verbose);
    Ok(())
}

/// Apply screaming-snake environment overrides via `lookup` (injectable for
/// tests).
pub fn apply_env<F>(config: &mut EngineConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup("CONTRACT_MODE") {
        config.contract_mode = Some(parse_contract_mode(&raw)?);
    }
    if let Some(raw) = lookup("STRICT_MODE") {
        config.strict_mode = Some(parse_bool("STRICT_MODE", &raw)?);
    }
    if let Some(raw) = lookup("USE_WORKER") {
        config.use_worker = parse_bool("USE_WORKER", &raw)?;
    }
    if let Some(raw) = lookup("MAX_DEPTH") {
        config.max_depth = parse_number("MAX_DEPTH", &raw)?;
    }
    if let Some(raw) = lookup("MAX_SPAWNS") {
        config.max_spawns = parse_number("MAX_SPAWNS", &raw)?;
    }
    if let Some(raw) = lookup("PROOF_MAX_AGE_MIN") {
        config.proof_max_age_min = parse_number("PROOF_MAX_AGE_MIN", &raw)?;
    }
    if let Some(raw) = lookup("FORCE_SLEEP") {
        config.force_sleep = parse_bool("FORCE_SLEEP", &raw)?;
    }
    if let Some(raw) = lookup("VERBOSE") {
        config.verbose = parse_bool("VERBOSE", &raw)?;
    }
    Ok(())
}

fn apply_overrides(config: &mut EngineConfig, overrides: &ConfigOverrides) {
    merge(&mut config.contract_mode, overrides.contract_mode.map(Some));
    merge(&mut config.strict_mode, overrides.strict_mode.map(Some));
    merge(&mut config.use_worker, overrides.use_worker);
    merge(&mut config.max_depth, overrides.max_depth);
    merge(&mut config.max_spawns, overrides.max_spawns);
    merge(&mut config.proof_max_age_min, overrides.proof_max_age_min);
    merge(&mut config.force_sleep, overrides.force_sleep);
    merge(&mut config.verbose, overrides.verbose);
}

fn merge<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

/// Parse a contract mode from its wire spelling.
pub fn parse_contract_mode(raw: &str) -> Result<ContractMode> {
    match raw.trim() {
        "agentic" => Ok(ContractMode::Agentic),
        "local" => Ok(ContractMode::Local),
        other => Err(anyhow!("invalid contract mode '{other}' (expected 'agentic' or 'local')")),
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(anyhow!("invalid boolean '{other}' for {name}")),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| anyhow!("invalid number '{raw}' for {name}"))
}
