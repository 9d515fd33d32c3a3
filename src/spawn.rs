//! Spawn seams: how the engine asks a host to execute one subagent.
//!
//! The [`SpawnAdapter`] trait decouples orchestration from the actual agent
//! backend. The engine makes no assumption about how an adapter resolves a
//! request; it may cross a thread boundary, an IPC pipe, or execute
//! in-process. Tests use scripted adapters that return predetermined
//! outputs without any agent runtime.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One subagent execution request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnRequest {
    pub agent_name: String,
    pub prompt: String,
    pub input: Value,
}

/// Adapter reply. `run_id` is an opaque identifier chosen by the host; the
/// engine never assumes it equals its own minted ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnReply {
    pub run_id: String,
    pub output: Value,
}

/// Caller-supplied executor for one subagent request.
///
/// Adapters must be idempotent with respect to the engine's state: the
/// engine never re-invokes an adapter except through gate retry, which
/// intentionally re-executes.
pub trait SpawnAdapter: Send {
    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnReply>;
}

/// Host capability for invoking a subagent with a prompt and getting its
/// raw (JSON text) reply. Presence of this capability is what preflight
/// probes for.
pub trait Subagent: Send + Sync {
    fn run_subagent(&self, prompt: &str) -> Result<String>;
}

/// Everything the host makes available to a run.
#[derive(Clone, Default)]
pub struct HostContext {
    pub subagent: Option<Arc<dyn Subagent>>,
}

impl HostContext {
    pub fn with_subagent(subagent: Arc<dyn Subagent>) -> Self {
        Self {
            subagent: Some(subagent),
        }
    }
}

/// Parse a subagent's reply, which the role prompts require to be a single
/// JSON value and nothing else.
pub(crate) fn parse_json_reply(raw: &str) -> Result<Value> {
    serde_json::from_str(raw.trim()).context("subagent reply was not valid JSON")
}
