//! Shared wire types for the supervision pipeline.
//!
//! These types define stable contracts between components and with the proof
//! artifact on disk. Wire fields serialize in camelCase so canonical bytes
//! (and therefore signatures) stay portable across implementations; absent
//! optional fields serialize as explicit `null`s.

use serde::{Deserialize, Serialize};

/// Kind of a signed trace event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Spawn,
    Return,
    Merge,
    Limit,
    PreflightOk,
    PlanCreated,
    QualityGatePass,
    QualityGateFail,
    ToolMissingStrict,
    SimulationWarning,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Spawn => "spawn",
            EventKind::Return => "return",
            EventKind::Merge => "merge",
            EventKind::Limit => "limit",
            EventKind::PreflightOk => "preflight_ok",
            EventKind::PlanCreated => "plan_created",
            EventKind::QualityGatePass => "quality_gate_pass",
            EventKind::QualityGateFail => "quality_gate_fail",
            EventKind::ToolMissingStrict => "tool_missing_strict",
            EventKind::SimulationWarning => "simulation_warning",
        }
    }
}

/// One signed record in the append-only trace.
///
/// Immutable after append. `supervisorSig` covers the canonical form of every
/// other field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEvent {
    /// Monotonically increasing, 1-indexed within a trace.
    pub event_id: u64,
    /// Epoch milliseconds at append time.
    pub ts: i64,
    pub kind: EventKind,
    pub depth: Option<u32>,
    pub agent_name: Option<String>,
    pub parent_run_id: Option<String>,
    pub child_run_id: Option<String>,
    pub input_hash: Option<String>,
    pub output_hash: Option<String>,
    pub note: Option<String>,
    pub supervisor_sig: String,
}

/// Lifecycle of a run record in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Spawned,
    Returned,
}

/// Authoritative record of one spawn and (eventually) its return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub run_id: String,
    pub parent_run_id: Option<String>,
    pub agent_name: String,
    pub depth: u32,
    pub input_hash: String,
    pub output_hash: Option<String>,
    /// Present only for spawns at the depth frontier.
    pub nonce: Option<String>,
    pub status: RunStatus,
    pub spawned_at: i64,
    pub returned_at: Option<i64>,
}

/// Nonce-based proof that a frontier subagent actually executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontierProof {
    pub run_id: String,
    pub nonce: String,
    /// `SHA-256(nonce + ":" + runId)`, computed by the frontier subagent.
    pub hash_proof: String,
}

/// How subagent execution was resolved during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeMode {
    Real,
    Simulated,
}

/// Which engagement rules the asleep detector applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractMode {
    Agentic,
    Local,
}

impl ContractMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ContractMode::Agentic => "agentic",
            ContractMode::Local => "local",
        }
    }
}
