//! Asleep detector: classify a completed run as engaged or asleep.
//!
//! A run is "asleep" when it produced plausible text without evidence of
//! actual work under the active contract. The evidence is read exclusively
//! from the signed trace and the verification outcome, never from the
//! subagent outputs themselves.

use serde::{Deserialize, Serialize};

use crate::core::types::{ContractMode, EventKind, RuntimeMode, TraceEvent};

/// Individual evidence flags extracted from the trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementFlags {
    pub has_preflight_ok: bool,
    pub has_plan_created: bool,
    pub has_proof_verified: bool,
    pub has_spawn_or_request: bool,
    pub has_quality_gate_pass: bool,
}

/// Full engagement assessment for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementReport {
    pub ok: bool,
    pub contract_mode: ContractMode,
    pub contract_satisfied: bool,
    pub engagement: EngagementFlags,
    pub trace_count: usize,
    pub verification_ok: bool,
    pub trace_events: Vec<EventKind>,
}

/// Inputs to the detector, gathered by the entry after orchestration.
#[derive(Debug)]
pub struct DetectorInput<'a> {
    pub events: &'a [TraceEvent],
    pub contract_mode: ContractMode,
    pub verification_ok: bool,
    pub runtime_mode: Option<RuntimeMode>,
    /// True when at least one frontier proof exists and all verified.
    pub frontier_proofs_ok: bool,
    pub orchestration_ok: bool,
}

/// Apply the active contract's engagement rules.
///
/// Agentic: preflight, plan, and at least one spawn must all be present, the
/// trace must verify, and the runtime must have been real. Local: the trace
/// must be non-empty and show at least one work event (spawn, merge, return,
/// or a quality-gate pass).
pub fn detect_engagement(input: &DetectorInput<'_>) -> EngagementReport {
    let has = |kind: EventKind| input.events.iter().any(|e| e.kind == kind);

    let engagement = EngagementFlags {
        has_preflight_ok: has(EventKind::PreflightOk),
        has_plan_created: has(EventKind::PlanCreated),
        has_proof_verified: input.frontier_proofs_ok,
        has_spawn_or_request: has(EventKind::Spawn),
        has_quality_gate_pass: has(EventKind::QualityGatePass),
    };

    let contract_satisfied = match input.contract_mode {
        ContractMode::Agentic => {
            engagement.has_preflight_ok
                && engagement.has_plan_created
                && engagement.has_spawn_or_request
                && input.verification_ok
                && input.runtime_mode == Some(RuntimeMode::Real)
        }
        ContractMode::Local => {
            !input.events.is_empty()
                && (engagement.has_spawn_or_request
                    || has(EventKind::Merge)
                    || has(EventKind::Return)
                    || engagement.has_quality_gate_pass)
        }
    };

    EngagementReport {
        ok: contract_satisfied && input.orchestration_ok,
        contract_mode: input.contract_mode,
        contract_satisfied,
        engagement,
        trace_count: input.events.len(),
        verification_ok: input.verification_ok,
        trace_events: input.events.iter().map(|e| e.kind).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::trace::{EventDraft, SignedTrace};
    use crate::test_support::test_secret;

    fn trace_with(kinds: &[EventKind]) -> Vec<TraceEvent> {
        let mut trace = SignedTrace::new(test_secret());
        for kind in kinds {
            trace.add_event(EventDraft::new(*kind)).expect("add");
        }
        trace.export()
    }

    fn input<'a>(
        events: &'a [TraceEvent],
        contract_mode: ContractMode,
        runtime_mode: Option<RuntimeMode>,
    ) -> DetectorInput<'a> {
        DetectorInput {
            events,
            contract_mode,
            verification_ok: true,
            runtime_mode,
            frontier_proofs_ok: true,
            orchestration_ok: true,
        }
    }

    #[test]
    fn agentic_contract_requires_real_runtime() {
        let events = trace_with(&[
            EventKind::PreflightOk,
            EventKind::PlanCreated,
            EventKind::Spawn,
            EventKind::Return,
        ]);

        let real = detect_engagement(&input(&events, ContractMode::Agentic, Some(RuntimeMode::Real)));
        assert!(real.contract_satisfied);
        assert!(real.ok);

        let simulated = detect_engagement(&input(
            &events,
            ContractMode::Agentic,
            Some(RuntimeMode::Simulated),
        ));
        assert!(!simulated.contract_satisfied);
    }

    #[test]
    fn agentic_contract_requires_plan_and_spawn() {
        let events = trace_with(&[EventKind::PreflightOk]);
        let report =
            detect_engagement(&input(&events, ContractMode::Agentic, Some(RuntimeMode::Real)));
        assert!(!report.contract_satisfied);
        assert!(!report.engagement.has_plan_created);
        assert!(!report.engagement.has_spawn_or_request);
    }

    #[test]
    fn agentic_contract_requires_verification() {
        let events = trace_with(&[EventKind::PreflightOk, EventKind::PlanCreated, EventKind::Spawn]);
        let mut detector_input = input(&events, ContractMode::Agentic, Some(RuntimeMode::Real));
        detector_input.verification_ok = false;
        assert!(!detect_engagement(&detector_input).contract_satisfied);
    }

    #[test]
    fn local_contract_accepts_simulated_work() {
        let events = trace_with(&[EventKind::PreflightOk, EventKind::Spawn, EventKind::Merge]);
        let report = detect_engagement(&input(
            &events,
            ContractMode::Local,
            Some(RuntimeMode::Simulated),
        ));
        assert!(report.contract_satisfied);
    }

    #[test]
    fn local_contract_rejects_empty_or_workless_traces() {
        let empty: Vec<TraceEvent> = Vec::new();
        assert!(!detect_engagement(&input(&empty, ContractMode::Local, None)).contract_satisfied);

        let workless = trace_with(&[EventKind::PreflightOk]);
        assert!(
            !detect_engagement(&input(&workless, ContractMode::Local, None)).contract_satisfied
        );
    }

    #[test]
    fn ok_reflects_orchestration_failure() {
        let events = trace_with(&[EventKind::Spawn, EventKind::Return]);
        let mut detector_input = input(&events, ContractMode::Local, Some(RuntimeMode::Simulated));
        detector_input.orchestration_ok = false;
        let report = detect_engagement(&detector_input);
        assert!(report.contract_satisfied);
        assert!(!report.ok);
    }
}
