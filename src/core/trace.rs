//! Append-only signed event log.
//!
//! Every appended event carries an HMAC over its canonical form, so any
//! later mutation of the exported trace is detectable by the validator.
//! The trace is never truncated or reordered.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde_json::Value;

use crate::core::crypto::{sign_event, SupervisorSecret};
use crate::core::types::{EventKind, TraceEvent};

/// Caller-supplied fields for a new event. Everything absent stays `null`
/// in the signed record.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub kind: EventKind,
    pub depth: Option<u32>,
    pub agent_name: Option<String>,
    pub parent_run_id: Option<String>,
    pub child_run_id: Option<String>,
    pub input_hash: Option<String>,
    pub output_hash: Option<String>,
    pub note: Option<String>,
}

impl EventDraft {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            depth: None,
            agent_name: None,
            parent_run_id: None,
            child_run_id: None,
            input_hash: None,
            output_hash: None,
            note: None,
        }
    }
}

/// Aggregate view over an exported trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceStats {
    pub total: usize,
    pub by_kind: BTreeMap<&'static str, usize>,
    pub deepest_depth: u32,
}

#[derive(Debug)]
pub struct SignedTrace {
    secret: Arc<SupervisorSecret>,
    events: Vec<TraceEvent>,
    seq: u64,
}

impl SignedTrace {
    pub fn new(secret: Arc<SupervisorSecret>) -> Self {
        Self {
            secret,
            events: Vec::new(),
            seq: 0,
        }
    }

    /// Assign the next event id, stamp the current time, sign, and append.
    pub fn add_event(&mut self, draft: EventDraft) -> Result<()> {
        let event_id = self.seq + 1;
        let mut event = TraceEvent {
            event_id,
            ts: Utc::now().timestamp_millis(),
            kind: draft.kind,
            depth: draft.depth,
            agent_name: draft.agent_name,
            parent_run_id: draft.parent_run_id,
            child_run_id: draft.child_run_id,
            input_hash: draft.input_hash,
            output_hash: draft.output_hash,
            note: draft.note,
            supervisor_sig: String::new(),
        };
        let payload = unsigned_payload(&event)?;
        event.supervisor_sig = sign_event(self.secret.bytes(), &payload);
        self.seq = event_id;
        self.events.push(event);
        Ok(())
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Defensive copy of the full trace.
    pub fn export(&self) -> Vec<TraceEvent> {
        self.events.clone()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn stats(&self) -> TraceStats {
        let mut by_kind = BTreeMap::new();
        for event in &self.events {
            *by_kind.entry(event.kind.as_str()).or_insert(0) += 1;
        }
        TraceStats {
            total: self.events.len(),
            by_kind,
            deepest_depth: self.events.iter().filter_map(|e| e.depth).max().unwrap_or(0),
        }
    }
}

/// The event as a JSON value with `supervisorSig` removed: the exact payload
/// that was (or must be) signed.
pub fn unsigned_payload(event: &TraceEvent) -> Result<Value> {
    let mut value = serde_json::to_value(event)?;
    if let Value::Object(map) = &mut value {
        map.remove("supervisorSig");
    }
    Ok(value)
}
