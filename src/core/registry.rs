//! Run registry: authoritative record of every spawn within one orchestrator.
//!
//! One registry instance per orchestrator; never shared across orchestrators.
//! Records are created by `register_spawn` and mutated exactly once by
//! `register_return`.

use std::collections::HashMap;

use chrono::Utc;
use rand::RngCore;
use thiserror::Error;

use crate::core::types::{RunRecord, RunStatus};

/// Registry operation failures. Both indicate an internal logic error in the
/// caller, not recoverable input conditions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("duplicate_run_id: '{0}' is already registered")]
    DuplicateRunId(String),
    #[error("unknown_run_id: '{0}' was never spawned")]
    UnknownRunId(String),
}

/// Spawn-time fields for a new run record.
#[derive(Debug, Clone)]
pub struct SpawnInfo {
    pub run_id: String,
    pub parent_run_id: Option<String>,
    pub agent_name: String,
    pub depth: u32,
    pub input_hash: String,
    pub nonce: Option<String>,
}

/// Read-only aggregate view over the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub total_spawns: usize,
    pub total_returned: usize,
    pub deepest_depth: u32,
}

#[derive(Debug, Default)]
pub struct RunRegistry {
    runs: HashMap<String, RunRecord>,
    order: Vec<String>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a run id of the form `{agent}_{epoch_ms}_{4-byte hex}`.
    ///
    /// Collision probability is negligible for bounded runs; `register_spawn`
    /// still rejects duplicates outright.
    pub fn mint_run_id(&self, agent_name: &str) -> String {
        let mut suffix = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut suffix);
        format!(
            "{}_{}_{}",
            agent_name,
            Utc::now().timestamp_millis(),
            hex::encode(suffix)
        )
    }

    pub fn register_spawn(&mut self, info: SpawnInfo) -> Result<(), RegistryError> {
        if self.runs.contains_key(&info.run_id) {
            return Err(RegistryError::DuplicateRunId(info.run_id));
        }
        let record = RunRecord {
            run_id: info.run_id.clone(),
            parent_run_id: info.parent_run_id,
            agent_name: info.agent_name,
            depth: info.depth,
            input_hash: info.input_hash,
            output_hash: None,
            nonce: info.nonce,
            status: RunStatus::Spawned,
            spawned_at: Utc::now().timestamp_millis(),
            returned_at: None,
        };
        self.order.push(info.run_id.clone());
        self.runs.insert(info.run_id, record);
        Ok(())
    }

    pub fn register_return(&mut self, run_id: &str, output_hash: &str) -> Result<(), RegistryError> {
        let record = self
            .runs
            .get_mut(run_id)
            .ok_or_else(|| RegistryError::UnknownRunId(run_id.to_string()))?;
        record.status = RunStatus::Returned;
        record.output_hash = Some(output_hash.to_string());
        record.returned_at = Some(Utc::now().timestamp_millis());
        Ok(())
    }

    pub fn has_run(&self, run_id: &str) -> bool {
        self.runs.contains_key(run_id)
    }

    pub fn get_run(&self, run_id: &str) -> Option<&RunRecord> {
        self.runs.get(run_id)
    }

    /// All records in spawn order.
    pub fn all_runs(&self) -> Vec<RunRecord> {
        self.order
            .iter()
            .filter_map(|id| self.runs.get(id).cloned())
            .collect()
    }

    pub fn total_spawns(&self) -> usize {
        self.order.len()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            total_spawns: self.order.len(),
            total_returned: self
                .runs
                .values()
                .filter(|r| r.status == RunStatus::Returned)
                .count(),
            deepest_depth: self.runs.values().map(|r| r.depth).max().unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_info(run_id: &str, depth: u32) -> SpawnInfo {
        SpawnInfo {
            run_id: run_id.to_string(),
            parent_run_id: None,
            agent_name: "agent".to_string(),
            depth,
            input_hash: "hash".to_string(),
            nonce: None,
        }
    }

    #[test]
    fn minted_ids_embed_agent_name_and_differ() {
        let registry = RunRegistry::new();
        let a = registry.mint_run_id("depth1_orchestrator");
        let b = registry.mint_run_id("depth1_orchestrator");
        assert!(a.starts_with("depth1_orchestrator_"));
        assert_ne!(a, b);
    }

    #[test]
    fn duplicate_spawn_is_rejected() {
        let mut registry = RunRegistry::new();
        registry.register_spawn(spawn_info("run-1", 1)).expect("first spawn");
        let err = registry.register_spawn(spawn_info("run-1", 1)).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateRunId("run-1".to_string()));
    }

    #[test]
    fn return_mutates_record_once() {
        let mut registry = RunRegistry::new();
        registry.register_spawn(spawn_info("run-1", 2)).expect("spawn");
        registry.register_return("run-1", "out-hash").expect("return");

        let record = registry.get_run("run-1").expect("record");
        assert_eq!(record.status, RunStatus::Returned);
        assert_eq!(record.output_hash.as_deref(), Some("out-hash"));
        assert!(record.returned_at.is_some());
    }

    #[test]
    fn return_for_unknown_run_fails() {
        let mut registry = RunRegistry::new();
        let err = registry.register_return("ghost", "hash").unwrap_err();
        assert_eq!(err, RegistryError::UnknownRunId("ghost".to_string()));
    }

    #[test]
    fn stats_track_spawns_returns_and_depth() {
        let mut registry = RunRegistry::new();
        registry.register_spawn(spawn_info("run-1", 1)).expect("spawn");
        registry.register_spawn(spawn_info("run-2", 3)).expect("spawn");
        registry.register_return("run-2", "hash").expect("return");

        let stats = registry.stats();
        assert_eq!(stats.total_spawns, 2);
        assert_eq!(stats.total_returned, 1);
        assert_eq!(stats.deepest_depth, 3);
    }

    #[test]
    fn all_runs_preserves_spawn_order() {
        let mut registry = RunRegistry::new();
        for id in ["c", "a", "b"] {
            registry.register_spawn(spawn_info(id, 1)).expect("spawn");
        }
        let ids: Vec<String> = registry.all_runs().into_iter().map(|r| r.run_id).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }
}
