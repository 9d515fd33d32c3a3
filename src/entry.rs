//! Engine entry: preflight, orchestration dispatch, verification, and the
//! proof artifact.
//!
//! This is the single entrypoint all agentic work goes through. Preflight
//! events land on the same signed trace the orchestrator later owns, so the
//! exported trace carries them ahead of orchestration events with strictly
//! monotonic ids.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::core::crypto::SupervisorSecret;
use crate::core::detector::{detect_engagement, DetectorInput, EngagementReport};
use crate::core::trace::{EventDraft, SignedTrace};
use crate::core::types::{ContractMode, EventKind, RuntimeMode, TraceEvent};
use crate::core::validator::{verify_run, VerificationReport};
use crate::exit_codes;
use crate::io::config::{resolve_config, ConfigOverrides};
use crate::io::proof::{write_proof, ProofArtifact};
use crate::orchestrator::{
    Orchestrator, OrchestratorRun, RunSettings, TaskOutcome, ToolMissingStrict,
};
use crate::spawn::HostContext;
use crate::worker::{run_in_worker, WorkerFailure, WORKER_ERROR_REASON};

pub const TOOL_MISSING_REASON: &str = "tool_missing_strict";
pub const FORCE_SLEEP_REASON: &str = "force_sleep";
pub const ASLEEP_REASON: &str = "asleep_detected";
pub const VERIFICATION_FAILED_REASON: &str = "verification_failed";
pub const EXECUTION_ERROR_REASON: &str = "execution_error";

/// Full result of one entry invocation, also echoed on stdout by the CLI.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub ok: bool,
    pub reason: Option<String>,
    pub contract_mode: ContractMode,
    pub runtime_mode: Option<RuntimeMode>,
    pub strict_mode: bool,
    pub force_sleep: bool,
    pub spawns_executed: u32,
    pub engagement: EngagementReport,
    pub verification: VerificationReport,
    pub result: Option<Value>,
    pub trace: Vec<TraceEvent>,
}

/// Run `task` under supervision rooted at `root` and persist the proof
/// artifact.
pub fn run(
    root: &Path,
    task: Value,
    overrides: &ConfigOverrides,
    host: &HostContext,
) -> Result<RunReport> {
    let config = resolve_config(root, overrides)?;
    let secret = Arc::new(SupervisorSecret::load_from_env());
    let mut trace = SignedTrace::new(Arc::clone(&secret));

    let capability_present = host.subagent.is_some();
    info!(capability_present, use_worker = config.use_worker, "preflight_start");

    let strict_mode = config.strict_mode.unwrap_or(capability_present);
    let contract_mode = config.contract_mode.unwrap_or(if strict_mode {
        ContractMode::Agentic
    } else {
        ContractMode::Local
    });

    let run = if strict_mode && !capability_present {
        trace.add_event(EventDraft {
            note: Some(TOOL_MISSING_REASON.to_string()),
            ..EventDraft::new(EventKind::ToolMissingStrict)
        })?;
        OrchestratorRun::failed(TOOL_MISSING_REASON, trace.export())
    } else {
        trace.add_event(EventDraft::new(EventKind::PreflightOk))?;
        let settings = RunSettings {
            contract_mode,
            strict_mode,
            max_depth: config.max_depth,
            max_spawns: config.max_spawns,
        };
        if config.use_worker {
            let preflight_events = trace.export();
            match run_in_worker(task, settings, trace, host.subagent.clone()) {
                Ok(run) => run,
                Err(err) => {
                    let (reason, reported) = match err.downcast_ref::<WorkerFailure>() {
                        Some(failure) => (failure.reason.clone(), failure.reported),
                        None => (WORKER_ERROR_REASON.to_string(), false),
                    };
                    warn!(error = %format!("{err:#}"), "worker run failed");
                    // A failure the worker reported cleanly keeps the signed
                    // events recorded before it ran; only channel or thread
                    // breakdown discards the trace.
                    let events = if reported { preflight_events } else { Vec::new() };
                    OrchestratorRun::failed(&reason, events)
                }
            }
        } else {
            let mut orchestrator =
                Orchestrator::new(settings, trace, None, host.subagent.clone());
            match orchestrator.run_task(&task) {
                Ok(outcome) => orchestrator.finish(outcome),
                Err(err) => {
                    let reason = if err.downcast_ref::<ToolMissingStrict>().is_some() {
                        TOOL_MISSING_REASON
                    } else {
                        EXECUTION_ERROR_REASON
                    };
                    warn!(error = %format!("{err:#}"), "orchestration failed");
                    orchestrator.finish(TaskOutcome::failed(reason))
                }
            }
        }
    };

    let verification = verify_run(&secret, &run.trace, &run.registry, &run.frontier_proofs);
    let frontier_ok = verification.depth3_proof_verified && !verification.depth3_proofs.is_empty();
    let engagement = detect_engagement(&DetectorInput {
        events: &run.trace,
        contract_mode,
        verification_ok: verification.ok,
        runtime_mode: run.runtime_mode,
        frontier_proofs_ok: frontier_ok,
        orchestration_ok: run.outcome.ok && !config.force_sleep,
    });

    let (ok, reason) = if config.force_sleep {
        (false, Some(FORCE_SLEEP_REASON.to_string()))
    } else if !run.outcome.ok {
        (false, run.outcome.reason.clone())
    } else if !verification.ok {
        (false, Some(VERIFICATION_FAILED_REASON.to_string()))
    } else if !engagement.contract_satisfied {
        (false, Some(ASLEEP_REASON.to_string()))
    } else {
        (true, None)
    };

    let report = RunReport {
        ok,
        reason,
        contract_mode,
        runtime_mode: run.runtime_mode,
        strict_mode,
        force_sleep: config.force_sleep,
        spawns_executed: run.spawns_executed,
        engagement,
        verification,
        result: run.outcome.result.clone(),
        trace: run.trace,
    };

    let artifact = ProofArtifact::stamped(
        report.ok,
        report.contract_mode,
        report.runtime_mode,
        report.strict_mode,
        report.force_sleep,
        report.engagement.engagement,
        report.verification.clone(),
        report.trace.clone(),
    );
    write_proof(root, &artifact)?;

    Ok(report)
}

/// Map a report onto the exit-code protocol.
///
/// `forceSleep` overrides everything; strict capability loss is 2;
/// orchestration failures are 1; an otherwise-clean run that violated the
/// engagement contract is asleep (5).
pub fn exit_code_for(report: &RunReport) -> i32 {
    if report.force_sleep {
        return exit_codes::ASLEEP;
    }
    if report.reason.as_deref() == Some(TOOL_MISSING_REASON) {
        return exit_codes::CAPABILITY_MISSING;
    }
    if report.ok {
        return exit_codes::OK;
    }
    if report.reason.as_deref() == Some(ASLEEP_REASON) {
        return exit_codes::ASLEEP;
    }
    exit_codes::FAILED
}
