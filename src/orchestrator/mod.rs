//! Supervised recursion orchestrator.
//!
//! Owns the registry, the signed trace, and the frontier proofs for one run.
//! Every spawn passes the depth/budget gate, is registered and signed before
//! execution, and is validated by the quality gate (with retry) after it.
//! Execution resolves through an injected [`SpawnAdapter`], a host
//! [`Subagent`] capability, or the built-in simulation, in that order.

pub mod prompts;
pub mod simulate;

use std::cell::RefCell;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::core::canonical::canonical_json;
use crate::core::crypto::sha256_hex;
use crate::core::gate::{self, GateSpec, RetryOutcome, TightenContext};
use crate::core::registry::{RunRegistry, SpawnInfo};
use crate::core::trace::{EventDraft, SignedTrace};
use crate::core::types::{ContractMode, EventKind, FrontierProof, RuntimeMode, TraceEvent};
use crate::spawn::{parse_json_reply, SpawnAdapter, SpawnRequest, Subagent};

use prompts::{PromptContext, PromptEngine};

pub const DEPTH1_AGENT: &str = "depth1_orchestrator";
pub const DEPTH2_AGENT: &str = "depth2_worker";
pub const DEPTH3_AGENT: &str = "depth3_micro";

const SUPERVISOR_AGENT: &str = "supervisor";
const MERGE_NOTE: &str = "merged_depth2_depth3_results";
const PLAN_NOTE: &str = "fanout_1_2_2";

/// Strict mode was active but neither an adapter nor a subagent capability
/// was available. Fatal: the entry translates this into exit code 2.
#[derive(Debug, Error)]
#[error("tool_missing_strict: no subagent capability available in strict mode")]
pub struct ToolMissingStrict;

/// Subagent role, disambiguated by prompt template rather than output type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRole {
    Orchestrator,
    Worker,
    Frontier,
}

impl AgentRole {
    pub fn template_name(self) -> &'static str {
        match self {
            AgentRole::Orchestrator => "orchestrator",
            AgentRole::Worker => "worker",
            AgentRole::Frontier => "frontier",
        }
    }

    /// Structural requirements the quality gate enforces for this role.
    pub fn gate_spec(self) -> GateSpec {
        match self {
            AgentRole::Orchestrator => GateSpec::new(&["spawn_requests"], 0),
            AgentRole::Worker => GateSpec::new(&["metric", "computation", "spawn_request"], 1),
            AgentRole::Frontier => GateSpec::new(&["hashProof", "timestamp"], 1),
        }
    }
}

/// Frozen per-run configuration handed to the orchestrator.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub contract_mode: ContractMode,
    pub strict_mode: bool,
    pub max_depth: u32,
    pub max_spawns: u32,
}

/// Why a supervised spawn did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    DepthLimit,
    SpawnLimit,
    QualityGateFailed,
}

impl AbortReason {
    pub fn as_str(self) -> &'static str {
        match self {
            AbortReason::DepthLimit => "depth_limit",
            AbortReason::SpawnLimit => "spawn_limit",
            AbortReason::QualityGateFailed => "quality_gate_failed",
        }
    }
}

/// Parameters for one supervised spawn.
#[derive(Debug, Clone)]
pub struct SpawnParams {
    pub parent_run_id: Option<String>,
    pub agent_name: String,
    pub depth: u32,
    pub input: Value,
    pub role: AgentRole,
}

/// A completed supervised spawn.
#[derive(Debug, Clone)]
pub struct CompletedSpawn {
    pub run_id: String,
    pub output: Value,
    pub output_hash: String,
}

/// Outcome of one supervised spawn. Refusals and gate exhaustion are normal
/// results; execution errors surface as `Err`.
#[derive(Debug, Clone)]
pub enum SpawnOutcome {
    Completed(CompletedSpawn),
    Aborted(AbortReason),
}

/// Final orchestration verdict for the task.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub ok: bool,
    pub reason: Option<String>,
    pub result: Option<Value>,
}

impl TaskOutcome {
    pub fn failed(reason: &str) -> Self {
        Self {
            ok: false,
            reason: Some(reason.to_string()),
            result: None,
        }
    }
}

/// Everything the orchestrator owned, exported once the run is over.
#[derive(Debug)]
pub struct OrchestratorRun {
    pub outcome: TaskOutcome,
    pub trace: Vec<TraceEvent>,
    pub registry: RunRegistry,
    pub frontier_proofs: Vec<FrontierProof>,
    pub runtime_mode: Option<RuntimeMode>,
    pub spawns_executed: u32,
}

impl OrchestratorRun {
    /// A run that failed before (or without) any orchestration state.
    pub fn failed(reason: &str, trace: Vec<TraceEvent>) -> Self {
        Self {
            outcome: TaskOutcome::failed(reason),
            trace,
            registry: RunRegistry::new(),
            frontier_proofs: Vec::new(),
            runtime_mode: None,
            spawns_executed: 0,
        }
    }
}

/// One parsed `{child_name, input}` request from a parent's output.
#[derive(Debug, Clone)]
struct ChildRequest {
    child_name: String,
    input: Value,
}

pub struct Orchestrator {
    settings: RunSettings,
    /// Effective depth bound for the current run (task envelope may lower or
    /// raise the configured bound).
    max_depth: u32,
    registry: RunRegistry,
    trace: SignedTrace,
    prompts: PromptEngine,
    adapter: Option<Box<dyn SpawnAdapter>>,
    subagent: Option<Arc<dyn Subagent>>,
    runtime_mode: Option<RuntimeMode>,
    frontier_proofs: Vec<FrontierProof>,
    simulation_warned: bool,
}

impl Orchestrator {
    /// The trace (with any preflight events already appended) moves into the
    /// orchestrator here; registry and frontier proofs are owned from birth.
    pub fn new(
        settings: RunSettings,
        trace: SignedTrace,
        adapter: Option<Box<dyn SpawnAdapter>>,
        subagent: Option<Arc<dyn Subagent>>,
    ) -> Self {
        let max_depth = settings.max_depth;
        Self {
            settings,
            max_depth,
            registry: RunRegistry::new(),
            trace,
            prompts: PromptEngine::new(),
            adapter,
            subagent,
            runtime_mode: None,
            frontier_proofs: Vec::new(),
            simulation_warned: false,
        }
    }

    /// Run the 1→2→2 fan-out program that proves depth-3 execution works
    /// end-to-end: one planner, two workers, two frontier micro-tasks, then
    /// a merge.
    pub fn run_task(&mut self, task: &Value) -> Result<TaskOutcome> {
        let base_depth = task.get("depth").and_then(Value::as_u64).unwrap_or(0) as u32;
        if let Some(max_depth) = task.get("maxDepth").and_then(Value::as_u64) {
            self.max_depth = max_depth as u32;
        }

        self.trace.add_event(EventDraft {
            depth: Some(base_depth),
            agent_name: Some(SUPERVISOR_AGENT.to_string()),
            note: Some(PLAN_NOTE.to_string()),
            ..EventDraft::new(EventKind::PlanCreated)
        })?;

        let planner_input = json!({
            "task": task.get("task").cloned().unwrap_or(Value::Null),
            "depth": base_depth + 1,
        });
        let planner = match self.supervised_spawn(SpawnParams {
            parent_run_id: None,
            agent_name: DEPTH1_AGENT.to_string(),
            depth: base_depth + 1,
            input: planner_input,
            role: AgentRole::Orchestrator,
        })? {
            SpawnOutcome::Completed(spawn) => spawn,
            SpawnOutcome::Aborted(reason) => return Ok(TaskOutcome::failed(reason.as_str())),
        };

        let requests = parse_spawn_requests(&planner.output)?;
        let mut depth2_results = Vec::new();
        let mut depth3_results = Vec::new();

        for request in requests {
            let worker = match self.supervised_spawn(SpawnParams {
                parent_run_id: Some(planner.run_id.clone()),
                agent_name: request.child_name,
                depth: base_depth + 2,
                input: request.input,
                role: AgentRole::Worker,
            })? {
                SpawnOutcome::Completed(spawn) => spawn,
                SpawnOutcome::Aborted(reason) => return Ok(TaskOutcome::failed(reason.as_str())),
            };

            let micro_request = parse_spawn_request(&worker.output)?;
            let micro = match self.supervised_spawn(SpawnParams {
                parent_run_id: Some(worker.run_id.clone()),
                agent_name: micro_request.child_name,
                depth: base_depth + 3,
                input: micro_request.input,
                role: AgentRole::Frontier,
            })? {
                SpawnOutcome::Completed(spawn) => spawn,
                SpawnOutcome::Aborted(reason) => return Ok(TaskOutcome::failed(reason.as_str())),
            };

            depth2_results.push(json!({ "runId": worker.run_id, "output": worker.output }));
            depth3_results.push(json!({ "runId": micro.run_id, "output": micro.output }));
        }

        self.trace.add_event(EventDraft {
            depth: Some(base_depth),
            agent_name: Some(SUPERVISOR_AGENT.to_string()),
            note: Some(MERGE_NOTE.to_string()),
            ..EventDraft::new(EventKind::Merge)
        })?;

        debug!(stats = ?self.trace.stats(), "fan-out complete");
        Ok(TaskOutcome {
            ok: true,
            reason: None,
            result: Some(json!({
                "depth1": { "runId": planner.run_id, "output": planner.output },
                "depth2Results": depth2_results,
                "depth3Results": depth3_results,
            })),
        })
    }

    /// Spawn one subagent under full supervision: budget gate, registration,
    /// signed spawn/return events, quality gate with retry, and the frontier
    /// nonce proof at `max_depth - 1`.
    #[instrument(skip_all, fields(agent = %params.agent_name, depth = params.depth))]
    pub fn supervised_spawn(&mut self, params: SpawnParams) -> Result<SpawnOutcome> {
        if let Some(reason) = self.spawn_gate(&params)? {
            return Ok(SpawnOutcome::Aborted(reason));
        }

        let run_id = self.registry.mint_run_id(&params.agent_name);
        let mut input = params.input;
        let frontier = params.depth + 1 == self.max_depth;
        let mut nonce = None;
        if frontier {
            let minted = mint_nonce();
            match input.as_object_mut() {
                Some(map) => {
                    map.insert("nonce".to_string(), Value::String(minted.clone()));
                    map.insert("runId".to_string(), Value::String(run_id.clone()));
                }
                None => input = json!({ "nonce": minted, "runId": run_id }),
            }
            nonce = Some(minted);
        }

        let input_hash = sha256_hex(&canonical_json(&input));
        self.registry.register_spawn(SpawnInfo {
            run_id: run_id.clone(),
            parent_run_id: params.parent_run_id.clone(),
            agent_name: params.agent_name.clone(),
            depth: params.depth,
            input_hash: input_hash.clone(),
            nonce: nonce.clone(),
        })?;
        self.trace.add_event(EventDraft {
            depth: Some(params.depth),
            agent_name: Some(params.agent_name.clone()),
            parent_run_id: params.parent_run_id.clone(),
            child_run_id: Some(run_id.clone()),
            input_hash: Some(input_hash),
            ..EventDraft::new(EventKind::Spawn)
        })?;

        let spec = params.role.gate_spec();
        let expected_proof = nonce
            .as_ref()
            .map(|nonce| sha256_hex(&format!("{nonce}:{run_id}")));
        let attempt_errors: RefCell<Vec<Vec<String>>> = RefCell::new(Vec::new());
        let tighten_note: RefCell<Option<String>> = RefCell::new(None);

        let agent_name = params.agent_name;
        let role = params.role;
        let depth = params.depth;
        let outcome = {
            let gate_fn = |output: &Value| {
                let mut errors = gate::evaluate(output, &spec);
                if let Some(expected) = &expected_proof {
                    let proof = output.get("hashProof").and_then(Value::as_str);
                    if proof != Some(expected.as_str()) {
                        errors.push("frontier_hash_mismatch".to_string());
                    }
                }
                attempt_errors.borrow_mut().push(errors.clone());
                errors
            };
            let mut tighten = |ctx: &TightenContext<'_>| {
                *tighten_note.borrow_mut() = Some(format!(
                    "Attempt {} failed quality checks: {}. Reply again with a single JSON object satisfying the contract.",
                    ctx.attempt,
                    ctx.gate_errors.join(", ")
                ));
            };
            gate::run_with_retry(
                |_attempt| {
                    let note = tighten_note.borrow().clone();
                    self.execute(&agent_name, role, &run_id, depth, &input, note.as_deref())
                },
                gate::MAX_GATE_ATTEMPTS,
                gate_fn,
                Some(&mut tighten),
            )?
        };

        for (index, errors) in attempt_errors.borrow().iter().enumerate() {
            let attempt = index + 1;
            if errors.is_empty() {
                self.trace.add_event(EventDraft {
                    depth: Some(depth),
                    agent_name: Some(agent_name.clone()),
                    child_run_id: Some(run_id.clone()),
                    note: Some(format!("attempt {attempt}")),
                    ..EventDraft::new(EventKind::QualityGatePass)
                })?;
            } else {
                self.trace.add_event(EventDraft {
                    depth: Some(depth),
                    agent_name: Some(agent_name.clone()),
                    child_run_id: Some(run_id.clone()),
                    note: Some(format!("attempt {attempt}: {}", errors.join(", "))),
                    ..EventDraft::new(EventKind::QualityGateFail)
                })?;
            }
        }

        match outcome {
            RetryOutcome::Passed { output, attempts } => {
                debug!(%run_id, attempts, "spawn passed quality gate");
                let output_hash = sha256_hex(&canonical_json(&output));
                self.registry.register_return(&run_id, &output_hash)?;
                self.trace.add_event(EventDraft {
                    depth: Some(depth),
                    agent_name: Some(agent_name),
                    child_run_id: Some(run_id.clone()),
                    output_hash: Some(output_hash.clone()),
                    ..EventDraft::new(EventKind::Return)
                })?;
                if let (Some(nonce), Some(hash_proof)) = (nonce, expected_proof) {
                    self.frontier_proofs.push(FrontierProof {
                        run_id: run_id.clone(),
                        nonce,
                        hash_proof,
                    });
                }
                Ok(SpawnOutcome::Completed(CompletedSpawn {
                    run_id,
                    output,
                    output_hash,
                }))
            }
            RetryOutcome::Exhausted { last_errors, attempts, .. } => {
                warn!(%run_id, attempts, errors = ?last_errors, "{}", gate::EXHAUSTED_REASON);
                Ok(SpawnOutcome::Aborted(AbortReason::QualityGateFailed))
            }
        }
    }

    /// Refuse spawns beyond the depth or budget bounds, recording a `limit`
    /// event for each refusal.
    fn spawn_gate(&mut self, params: &SpawnParams) -> Result<Option<AbortReason>> {
        if params.depth >= self.max_depth {
            self.trace.add_event(EventDraft {
                depth: Some(params.depth),
                agent_name: Some(params.agent_name.clone()),
                note: Some("depth_limit".to_string()),
                ..EventDraft::new(EventKind::Limit)
            })?;
            return Ok(Some(AbortReason::DepthLimit));
        }
        if self.registry.total_spawns() >= self.settings.max_spawns as usize {
            self.trace.add_event(EventDraft {
                depth: Some(params.depth),
                agent_name: Some(params.agent_name.clone()),
                note: Some("spawn_limit".to_string()),
                ..EventDraft::new(EventKind::Limit)
            })?;
            return Ok(Some(AbortReason::SpawnLimit));
        }
        Ok(None)
    }

    /// Resolve one execution attempt: adapter, then host capability, then
    /// simulation (non-strict only).
    fn execute(
        &mut self,
        agent_name: &str,
        role: AgentRole,
        run_id: &str,
        depth: u32,
        input: &Value,
        tightening: Option<&str>,
    ) -> Result<Value> {
        if let Some(adapter) = &self.adapter {
            let prompt = self.prompts.render(
                role,
                &PromptContext {
                    agent_name,
                    run_id,
                    depth,
                    input,
                    tightening,
                },
            )?;
            let reply = adapter
                .spawn(&SpawnRequest {
                    agent_name: agent_name.to_string(),
                    prompt,
                    input: input.clone(),
                })
                .with_context(|| format!("spawn adapter failed for '{agent_name}'"))?;
            if !reply.output.is_object() {
                bail!("spawn adapter returned non-object output for '{agent_name}'");
            }
            self.runtime_mode = Some(RuntimeMode::Real);
            return Ok(reply.output);
        }

        if let Some(subagent) = self.subagent.clone() {
            let prompt = self.prompts.render(
                role,
                &PromptContext {
                    agent_name,
                    run_id,
                    depth,
                    input,
                    tightening,
                },
            )?;
            let raw = subagent
                .run_subagent(&prompt)
                .with_context(|| format!("runSubagent capability failed for '{agent_name}'"))?;
            let output = parse_json_reply(&raw)?;
            self.runtime_mode = Some(RuntimeMode::Real);
            return Ok(output);
        }

        if self.settings.strict_mode {
            self.trace.add_event(EventDraft {
                depth: Some(depth),
                agent_name: Some(agent_name.to_string()),
                note: Some("tool_missing_strict".to_string()),
                ..EventDraft::new(EventKind::ToolMissingStrict)
            })?;
            return Err(ToolMissingStrict.into());
        }

        self.runtime_mode = Some(RuntimeMode::Simulated);
        if !self.simulation_warned {
            self.simulation_warned = true;
            warn!("no subagent capability available; falling back to simulated outputs");
            self.trace.add_event(EventDraft {
                depth: Some(depth),
                agent_name: Some(agent_name.to_string()),
                note: Some("simulation_warning".to_string()),
                ..EventDraft::new(EventKind::SimulationWarning)
            })?;
        }
        Ok(simulate::output_for(role, input))
    }

    /// Export everything this orchestrator owned.
    pub fn finish(self, outcome: TaskOutcome) -> OrchestratorRun {
        let trace = self.trace.export();
        let spawns_executed = self.registry.total_spawns() as u32;
        OrchestratorRun {
            outcome,
            trace,
            registry: self.registry,
            frontier_proofs: self.frontier_proofs,
            runtime_mode: self.runtime_mode,
            spawns_executed,
        }
    }
}

fn mint_nonce() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn parse_child_request(value: &Value) -> Result<ChildRequest> {
    let child_name = value
        .get("child_name")
        .and_then(Value::as_str)
        .context("spawn request missing child_name")?
        .to_string();
    let input = value.get("input").cloned().unwrap_or_else(|| json!({}));
    Ok(ChildRequest { child_name, input })
}

fn parse_spawn_requests(output: &Value) -> Result<Vec<ChildRequest>> {
    output
        .get("spawn_requests")
        .and_then(Value::as_array)
        .context("planner output missing spawn_requests array")?
        .iter()
        .map(parse_child_request)
        .collect()
}

fn parse_spawn_request(output: &Value) -> Result<ChildRequest> {
    parse_child_request(
        output
            .get("spawn_request")
            .context("worker output missing spawn_request")?,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::validator::verify_run;
    use crate::spawn::SpawnReply;
    use crate::test_support::{local_settings, test_secret};
    use serde_json::json;
    use std::sync::Mutex;

    fn simulated_orchestrator(settings: RunSettings) -> Orchestrator {
        Orchestrator::new(settings, SignedTrace::new(test_secret()), None, None)
    }

    fn kind_count(trace: &[TraceEvent], kind: EventKind) -> usize {
        trace.iter().filter(|e| e.kind == kind).count()
    }

    /// Adapter that answers each role correctly, computing the real frontier
    /// proof from the injected nonce and run id.
    struct RoleEchoAdapter;

    impl RoleEchoAdapter {
        fn role_output(request: &SpawnRequest) -> Value {
            if let Some(nonce) = request.input.get("nonce").and_then(Value::as_str) {
                let run_id = request.input.get("runId").and_then(Value::as_str).unwrap_or("");
                return json!({
                    "hashProof": sha256_hex(&format!("{nonce}:{run_id}")),
                    "timestamp": 1_700_000_000_000i64,
                });
            }
            if request.prompt.contains("Planner Contract") {
                return json!({
                    "spawn_requests": [
                        { "child_name": DEPTH2_AGENT, "input": { "segment": "alpha" } },
                        { "child_name": DEPTH2_AGENT, "input": { "segment": "beta" } },
                    ]
                });
            }
            json!({
                "metric": 41,
                "computation": "contrast_analysis",
                "spawn_request": { "child_name": DEPTH3_AGENT, "input": {} },
            })
        }
    }

    impl SpawnAdapter for RoleEchoAdapter {
        fn spawn(&self, request: &SpawnRequest) -> Result<SpawnReply> {
            Ok(SpawnReply {
                run_id: format!("host_{}", request.agent_name),
                output: Self::role_output(request),
            })
        }
    }

    /// Verifies the nominal simulated fan-out: five spawns, five returns,
    /// one merge, one simulation warning, and two verified frontier proofs.
    #[test]
    fn simulated_fanout_completes_with_five_spawns() {
        let mut orchestrator = simulated_orchestrator(local_settings(4, 10));
        let outcome = orchestrator.run_task(&json!({})).expect("run");
        assert!(outcome.ok);

        let run = orchestrator.finish(outcome);
        assert_eq!(run.runtime_mode, Some(RuntimeMode::Simulated));
        assert_eq!(run.spawns_executed, 5);
        assert_eq!(kind_count(&run.trace, EventKind::Spawn), 5);
        assert_eq!(kind_count(&run.trace, EventKind::Return), 5);
        assert_eq!(kind_count(&run.trace, EventKind::Merge), 1);
        assert_eq!(kind_count(&run.trace, EventKind::SimulationWarning), 1);
        assert_eq!(kind_count(&run.trace, EventKind::PlanCreated), 1);
        assert_eq!(run.frontier_proofs.len(), 2);

        let report = verify_run(&test_secret(), &run.trace, &run.registry, &run.frontier_proofs);
        assert!(report.ok, "verification errors: {:?}", report.errors);
        assert!(report.depth3_proof_verified);
    }

    #[test]
    fn trace_orders_spawn_before_return_per_run() {
        let mut orchestrator = simulated_orchestrator(local_settings(4, 10));
        let outcome = orchestrator.run_task(&json!({})).expect("run");
        let run = orchestrator.finish(outcome);

        for record in run.registry.all_runs() {
            let spawn_id = run
                .trace
                .iter()
                .find(|e| e.kind == EventKind::Spawn && e.child_run_id.as_deref() == Some(&record.run_id))
                .map(|e| e.event_id)
                .expect("spawn event");
            let return_id = run
                .trace
                .iter()
                .find(|e| e.kind == EventKind::Return && e.child_run_id.as_deref() == Some(&record.run_id))
                .map(|e| e.event_id)
                .expect("return event");
            assert!(spawn_id < return_id);
        }
    }

    #[test]
    fn spawn_budget_refusal_emits_single_limit_event() {
        let mut orchestrator = simulated_orchestrator(local_settings(4, 2));
        let outcome = orchestrator.run_task(&json!({})).expect("run");
        assert!(!outcome.ok);
        assert_eq!(outcome.reason.as_deref(), Some("spawn_limit"));

        let run = orchestrator.finish(outcome);
        assert!(run.spawns_executed <= 2);
        let limits: Vec<&TraceEvent> = run
            .trace
            .iter()
            .filter(|e| e.kind == EventKind::Limit)
            .collect();
        assert_eq!(limits.len(), 1);
        assert_eq!(limits[0].note.as_deref(), Some("spawn_limit"));
    }

    #[test]
    fn zero_spawn_budget_refuses_first_spawn() {
        let mut orchestrator = simulated_orchestrator(local_settings(4, 0));
        let outcome = orchestrator.run_task(&json!({})).expect("run");
        assert_eq!(outcome.reason.as_deref(), Some("spawn_limit"));

        let run = orchestrator.finish(outcome);
        assert_eq!(run.spawns_executed, 0);
        assert_eq!(kind_count(&run.trace, EventKind::Limit), 1);
    }

    #[test]
    fn zero_max_depth_refuses_with_depth_limit() {
        let mut orchestrator = simulated_orchestrator(local_settings(0, 10));
        let outcome = orchestrator.run_task(&json!({})).expect("run");
        assert_eq!(outcome.reason.as_deref(), Some("depth_limit"));

        let run = orchestrator.finish(outcome);
        assert_eq!(run.spawns_executed, 0);
        let limits: Vec<&TraceEvent> = run
            .trace
            .iter()
            .filter(|e| e.kind == EventKind::Limit)
            .collect();
        assert_eq!(limits.len(), 1);
        assert_eq!(limits[0].note.as_deref(), Some("depth_limit"));
    }

    #[test]
    fn task_max_depth_overrides_settings() {
        let mut orchestrator = simulated_orchestrator(local_settings(4, 10));
        let outcome = orchestrator.run_task(&json!({"maxDepth": 0})).expect("run");
        assert_eq!(outcome.reason.as_deref(), Some("depth_limit"));
    }

    #[test]
    fn strict_mode_without_capability_is_fatal() {
        let settings = RunSettings {
            strict_mode: true,
            ..local_settings(4, 10)
        };
        let mut orchestrator = Orchestrator::new(settings, SignedTrace::new(test_secret()), None, None);
        let err = orchestrator.run_task(&json!({})).unwrap_err();
        assert!(err.downcast_ref::<ToolMissingStrict>().is_some());

        let run = orchestrator.finish(TaskOutcome::failed("tool_missing_strict"));
        assert_eq!(kind_count(&run.trace, EventKind::ToolMissingStrict), 1);
        assert_eq!(run.runtime_mode, None);
    }

    #[test]
    fn adapter_execution_yields_real_runtime_and_proofs() {
        let mut orchestrator = Orchestrator::new(
            local_settings(4, 10),
            SignedTrace::new(test_secret()),
            Some(Box::new(RoleEchoAdapter)),
            None,
        );
        let outcome = orchestrator.run_task(&json!({"task": "analyze"})).expect("run");
        assert!(outcome.ok);

        let run = orchestrator.finish(outcome);
        assert_eq!(run.runtime_mode, Some(RuntimeMode::Real));
        assert_eq!(run.spawns_executed, 5);
        assert_eq!(run.frontier_proofs.len(), 2);
        assert_eq!(kind_count(&run.trace, EventKind::SimulationWarning), 0);

        let report = verify_run(&test_secret(), &run.trace, &run.registry, &run.frontier_proofs);
        assert!(report.ok);
        assert!(report.depth3_proof_verified);
    }

    /// Adapter that fails the gate once, then delegates to the correct role
    /// output. Exercises the tightened retry prompt.
    struct FlakyAdapter {
        calls: RefCell<u32>,
        prompts: Arc<Mutex<Vec<String>>>,
    }

    impl SpawnAdapter for FlakyAdapter {
        fn spawn(&self, request: &SpawnRequest) -> Result<SpawnReply> {
            self.prompts.lock().expect("lock").push(request.prompt.clone());
            let call = *self.calls.borrow();
            *self.calls.borrow_mut() = call + 1;
            let output = if call == 0 {
                json!({"noise": true})
            } else {
                RoleEchoAdapter::role_output(request)
            };
            Ok(SpawnReply {
                run_id: format!("host_{call}"),
                output,
            })
        }
    }

    #[test]
    fn failed_attempt_tightens_the_next_prompt() {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let adapter = FlakyAdapter {
            calls: RefCell::new(0),
            prompts: Arc::clone(&prompts),
        };
        let mut orchestrator = Orchestrator::new(
            local_settings(4, 10),
            SignedTrace::new(test_secret()),
            Some(Box::new(adapter)),
            None,
        );

        let outcome = orchestrator
            .supervised_spawn(SpawnParams {
                parent_run_id: None,
                agent_name: DEPTH1_AGENT.to_string(),
                depth: 1,
                input: json!({"task": "plan"}),
                role: AgentRole::Orchestrator,
            })
            .expect("spawn");
        assert!(matches!(outcome, SpawnOutcome::Completed(_)));

        let prompts = prompts.lock().expect("lock");
        assert_eq!(prompts.len(), 2);
        assert!(!prompts[0].contains("Correction"));
        assert!(prompts[1].contains("Correction"));
        assert!(prompts[1].contains("missing_key:spawn_requests"));

        let run = orchestrator.finish(TaskOutcome::failed("unused"));
        assert_eq!(kind_count(&run.trace, EventKind::QualityGateFail), 1);
        assert_eq!(kind_count(&run.trace, EventKind::QualityGatePass), 1);
    }

    struct AlwaysBadAdapter;

    impl SpawnAdapter for AlwaysBadAdapter {
        fn spawn(&self, _request: &SpawnRequest) -> Result<SpawnReply> {
            Ok(SpawnReply {
                run_id: "host_bad".to_string(),
                output: json!({"summary": "probably fine"}),
            })
        }
    }

    #[test]
    fn gate_exhaustion_aborts_the_spawn() {
        let mut orchestrator = Orchestrator::new(
            local_settings(4, 10),
            SignedTrace::new(test_secret()),
            Some(Box::new(AlwaysBadAdapter)),
            None,
        );
        let outcome = orchestrator.run_task(&json!({})).expect("run");
        assert!(!outcome.ok);
        assert_eq!(outcome.reason.as_deref(), Some("quality_gate_failed"));

        let run = orchestrator.finish(outcome);
        assert_eq!(kind_count(&run.trace, EventKind::QualityGateFail), 2);
        assert_eq!(kind_count(&run.trace, EventKind::Return), 0);
    }

    struct WrongProofAdapter;

    impl SpawnAdapter for WrongProofAdapter {
        fn spawn(&self, _request: &SpawnRequest) -> Result<SpawnReply> {
            Ok(SpawnReply {
                run_id: "host_wrong".to_string(),
                output: json!({"hashProof": sha256_hex("forged"), "timestamp": 1i64}),
            })
        }
    }

    #[test]
    fn frontier_hash_mismatch_fails_the_gate() {
        let mut orchestrator = Orchestrator::new(
            local_settings(4, 10),
            SignedTrace::new(test_secret()),
            Some(Box::new(WrongProofAdapter)),
            None,
        );
        let outcome = orchestrator
            .supervised_spawn(SpawnParams {
                parent_run_id: None,
                agent_name: DEPTH3_AGENT.to_string(),
                depth: 3,
                input: json!({}),
                role: AgentRole::Frontier,
            })
            .expect("spawn");
        assert!(matches!(outcome, SpawnOutcome::Aborted(AbortReason::QualityGateFailed)));

        let run = orchestrator.finish(TaskOutcome::failed("unused"));
        assert!(run.frontier_proofs.is_empty());
        let fail_note = run
            .trace
            .iter()
            .find(|e| e.kind == EventKind::QualityGateFail)
            .and_then(|e| e.note.clone())
            .expect("fail event");
        assert!(fail_note.contains("frontier_hash_mismatch"));
    }

    struct NonObjectAdapter;

    impl SpawnAdapter for NonObjectAdapter {
        fn spawn(&self, _request: &SpawnRequest) -> Result<SpawnReply> {
            Ok(SpawnReply {
                run_id: "host_scalar".to_string(),
                output: json!("just a string"),
            })
        }
    }

    #[test]
    fn malformed_adapter_output_is_a_fatal_error() {
        let mut orchestrator = Orchestrator::new(
            local_settings(4, 10),
            SignedTrace::new(test_secret()),
            Some(Box::new(NonObjectAdapter)),
            None,
        );
        let err = orchestrator.run_task(&json!({})).unwrap_err();
        assert!(err.to_string().contains("non-object output"));
    }

    #[test]
    fn frontier_input_gains_nonce_and_run_id() {
        let mut orchestrator = simulated_orchestrator(local_settings(4, 10));
        let outcome = orchestrator
            .supervised_spawn(SpawnParams {
                parent_run_id: None,
                agent_name: DEPTH3_AGENT.to_string(),
                depth: 3,
                input: json!({"carry": "over"}),
                role: AgentRole::Frontier,
            })
            .expect("spawn");

        let SpawnOutcome::Completed(spawn) = outcome else {
            panic!("expected completion");
        };
        let run = orchestrator.finish(TaskOutcome::failed("unused"));
        let record = run.registry.get_run(&spawn.run_id).expect("record");
        let nonce = record.nonce.clone().expect("nonce");
        assert_eq!(nonce.len(), 32);
        assert_eq!(
            spawn.output["hashProof"].as_str().expect("proof"),
            sha256_hex(&format!("{nonce}:{}", spawn.run_id))
        );
    }
}
