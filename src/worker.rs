//! Worker isolation: run the orchestrator off the host's execution context.
//!
//! The orchestrator runs on its own thread owning all mutable state; a pair
//! of mpsc channels carries the message protocol between it and the host.
//! Ordering is imposed entirely by the message sequence — there is no shared
//! memory and no locking. Each spawn request carries a fresh correlation id,
//! and a mismatched or dropped reply fails the run.

use std::cell::Cell;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::core::trace::SignedTrace;
use crate::orchestrator::{Orchestrator, OrchestratorRun, RunSettings, ToolMissingStrict};
use crate::spawn::{parse_json_reply, SpawnAdapter, SpawnReply, SpawnRequest, Subagent};

/// Reason reported when the worker dies without a usable result.
pub const WORKER_ERROR_REASON: &str = "worker_error";

/// Messages the worker sends to the host.
#[derive(Debug)]
pub enum WorkerToHost {
    RequestSpawn {
        id: u64,
        agent_name: String,
        prompt: String,
        input: Value,
    },
    Progress {
        message: String,
    },
    Done {
        run: Box<OrchestratorRun>,
    },
    Fail {
        reason: String,
        error: Option<String>,
    },
}

/// Messages the host sends to the worker.
#[derive(Debug)]
pub enum HostToWorker {
    ModelResult {
        id: u64,
        result: Result<Value, String>,
    },
}

/// Worker-side failure surfaced to the entry.
#[derive(Debug, Error)]
#[error("worker failed: {reason}")]
pub struct WorkerFailure {
    pub reason: String,
    pub detail: Option<String>,
    /// True when the worker itself reported the failure over `Fail`;
    /// false when the channel or thread broke down mid-run.
    pub reported: bool,
}

/// Spawn adapter that forwards each request to the host over the channel
/// pair and blocks for the correlated reply. The host chooses the run id;
/// the engine treats it as opaque.
struct ChannelAdapter {
    to_host: Sender<WorkerToHost>,
    from_host: Receiver<HostToWorker>,
    next_id: Cell<u64>,
}

impl SpawnAdapter for ChannelAdapter {
    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnReply> {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.to_host
            .send(WorkerToHost::RequestSpawn {
                id,
                agent_name: request.agent_name.clone(),
                prompt: request.prompt.clone(),
                input: request.input.clone(),
            })
            .map_err(|_| anyhow!("host channel closed before spawn request"))?;

        let HostToWorker::ModelResult { id: got, result } = self
            .from_host
            .recv()
            .context("host closed the reply channel")?;
        if got != id {
            bail!("model result correlation mismatch: expected {id}, got {got}");
        }
        match result {
            Ok(output) => Ok(SpawnReply {
                run_id: format!("host_{id}"),
                output,
            }),
            Err(message) => Err(anyhow!("host spawn failed: {message}")),
        }
    }
}

/// Run the task in an isolated worker thread, delegating spawn requests to
/// the host-provided subagent capability.
///
/// The channel adapter is only installed when the host actually has a
/// capability; otherwise the in-worker orchestrator follows the normal
/// dispatch rules (strict fatal or simulation fallback). Worker termination
/// without a result resolves to [`WorkerFailure`] with reason
/// [`WORKER_ERROR_REASON`].
pub fn run_in_worker(
    task: Value,
    settings: RunSettings,
    trace: SignedTrace,
    subagent: Option<Arc<dyn Subagent>>,
) -> Result<OrchestratorRun> {
    let (to_host_tx, to_host_rx) = mpsc::channel::<WorkerToHost>();
    let (to_worker_tx, to_worker_rx) = mpsc::channel::<HostToWorker>();

    let adapter: Option<Box<dyn SpawnAdapter>> = subagent.is_some().then(|| {
        Box::new(ChannelAdapter {
            to_host: to_host_tx.clone(),
            from_host: to_worker_rx,
            next_id: Cell::new(1),
        }) as Box<dyn SpawnAdapter>
    });

    let worker = thread::spawn(move || {
        let _ = to_host_tx.send(WorkerToHost::Progress {
            message: "orchestrator_started".to_string(),
        });
        let mut orchestrator = Orchestrator::new(settings, trace, adapter, None);
        let message = match orchestrator.run_task(&task) {
            Ok(outcome) => WorkerToHost::Done {
                run: Box::new(orchestrator.finish(outcome)),
            },
            Err(err) => WorkerToHost::Fail {
                reason: classify_worker_error(&err),
                error: Some(format!("{err:#}")),
            },
        };
        let _ = to_host_tx.send(message);
    });

    let result = host_loop(&to_host_rx, &to_worker_tx, subagent.as_deref());
    let _ = worker.join();
    result
}

fn host_loop(
    from_worker: &Receiver<WorkerToHost>,
    to_worker: &Sender<HostToWorker>,
    subagent: Option<&dyn Subagent>,
) -> Result<OrchestratorRun> {
    loop {
        match from_worker.recv() {
            Ok(WorkerToHost::RequestSpawn {
                id, agent_name, prompt, ..
            }) => {
                debug!(id, %agent_name, "delegating spawn request to host capability");
                let result = match subagent {
                    Some(agent) => agent
                        .run_subagent(&prompt)
                        .and_then(|raw| parse_json_reply(&raw))
                        .map_err(|err| format!("{err:#}")),
                    None => Err("no_spawn_capability".to_string()),
                };
                // A send failure means the worker already exited; its final
                // Done/Fail message is still in our queue.
                let _ = to_worker.send(HostToWorker::ModelResult { id, result });
            }
            Ok(WorkerToHost::Progress { message }) => {
                debug!(%message, "worker progress");
            }
            Ok(WorkerToHost::Done { run }) => return Ok(*run),
            Ok(WorkerToHost::Fail { reason, error }) => {
                return Err(WorkerFailure {
                    reason,
                    detail: error,
                    reported: true,
                }
                .into())
            }
            Err(_) => {
                return Err(WorkerFailure {
                    reason: WORKER_ERROR_REASON.to_string(),
                    detail: Some("worker terminated without reporting a result".to_string()),
                    reported: false,
                }
                .into())
            }
        }
    }
}

fn classify_worker_error(err: &anyhow::Error) -> String {
    if err.downcast_ref::<ToolMissingStrict>().is_some() {
        "tool_missing_strict".to_string()
    } else {
        WORKER_ERROR_REASON.to_string()
    }
}
