//! Quality gate for subagent outputs, plus retry-with-tightening.
//!
//! The gate is structural and linguistic: required keys, a floor on numeric
//! evidence, and a fixed list of handwave phrases that mark a reply as
//! non-work. It never inspects role semantics; roles are disambiguated by
//! the prompt template that produced the output.

use anyhow::Result;
use serde_json::Value;

use crate::core::canonical::canonical_json;

/// Retry budget for a single supervised spawn.
pub const MAX_GATE_ATTEMPTS: u32 = 2;

/// Reason reported when every attempt failed the gate.
pub const EXHAUSTED_REASON: &str = "quality_gate_failed_all_attempts";

/// Phrases that indicate the agent described work instead of doing it.
/// Matched case-insensitively against the canonical serialization.
const HANDWAVE_PHRASES: &[&str] = &[
    "i guess",
    "seems like",
    "looks like",
    "probably",
    "maybe",
    "not sure",
    "cannot access",
    "no access",
    "i did not",
    "i didn't",
    "placeholder",
    "todo",
    "tbd",
    "coming soon",
    "not implemented",
];

/// Structural requirements for one subagent output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateSpec {
    pub required_keys: Vec<String>,
    pub min_numeric_count: usize,
}

impl GateSpec {
    pub fn new(required_keys: &[&str], min_numeric_count: usize) -> Self {
        Self {
            required_keys: required_keys.iter().map(|k| k.to_string()).collect(),
            min_numeric_count,
        }
    }
}

/// Classify `output` against `spec`. An empty error list means the gate passed.
pub fn evaluate(output: &Value, spec: &GateSpec) -> Vec<String> {
    let Some(map) = output.as_object() else {
        return vec!["output_not_object".to_string()];
    };

    let mut errors = Vec::new();
    for key in &spec.required_keys {
        if !map.contains_key(key) {
            errors.push(format!("missing_key:{key}"));
        }
    }

    let numeric = count_numeric_values(output);
    if numeric < spec.min_numeric_count {
        errors.push(format!(
            "too_few_numeric_values:{numeric}<{}",
            spec.min_numeric_count
        ));
    }

    let canonical = canonical_json(output).to_lowercase();
    for phrase in HANDWAVE_PHRASES {
        if canonical.contains(phrase) {
            errors.push(format!("handwave_phrase:{phrase}"));
        }
    }
    errors
}

/// Count finite numeric values anywhere in the value tree.
pub fn count_numeric_values(value: &Value) -> usize {
    match value {
        Value::Number(n) => usize::from(n.as_f64().is_some_and(f64::is_finite)),
        Value::Array(items) => items.iter().map(count_numeric_values).sum(),
        Value::Object(map) => map.values().map(count_numeric_values).sum(),
        _ => 0,
    }
}

/// Feedback handed to the tighten callback between attempts.
#[derive(Debug)]
pub struct TightenContext<'a> {
    /// 1-indexed attempt that just failed.
    pub attempt: u32,
    pub gate_errors: &'a [String],
}

/// Result of a retried execution.
#[derive(Debug, Clone)]
pub enum RetryOutcome {
    Passed {
        output: Value,
        attempts: u32,
    },
    /// Every attempt failed; reason is [`EXHAUSTED_REASON`].
    Exhausted {
        last_output: Option<Value>,
        last_errors: Vec<String>,
        attempts: u32,
    },
}

/// Run `attempt_fn` up to `max_attempts` times, returning the first
/// gate-passing output.
///
/// Between attempts the tighten callback receives the failed attempt number
/// and its gate errors so the next attempt can adjust its prompt. Execution
/// errors from `attempt_fn` propagate immediately; only gate failures are
/// retried.
pub fn run_with_retry<A, G>(
    mut attempt_fn: A,
    max_attempts: u32,
    gate_fn: G,
    mut tighten_fn: Option<&mut dyn FnMut(&TightenContext<'_>)>,
) -> Result<RetryOutcome>
where
    A: FnMut(u32) -> Result<Value>,
    G: Fn(&Value) -> Vec<String>,
{
    let attempts = max_attempts.max(1);
    let mut last_output = None;
    let mut last_errors = Vec::new();

    for attempt in 1..=attempts {
        let output = attempt_fn(attempt)?;
        let errors = gate_fn(&output);
        if errors.is_empty() {
            return Ok(RetryOutcome::Passed {
                output,
                attempts: attempt,
            });
        }
        if attempt < attempts {
            if let Some(tighten) = tighten_fn.as_mut() {
                tighten(&TightenContext {
                    attempt,
                    gate_errors: &errors,
                });
            }
        }
        last_output = Some(output);
        last_errors = errors;
    }

    Ok(RetryOutcome::Exhausted {
        last_output,
        last_errors,
        attempts,
    })
}
