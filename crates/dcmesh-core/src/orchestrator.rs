//! Orchestrator: the control surface of a batch run.
//!
//! `start_run`, `cancel` and `state` may be called from any thread. The batch
//! itself runs sequentially on one dedicated worker thread per run.
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use chrono::{DateTime, Utc};
use tracing::{error, info};
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::context::ExecutionContext;
use crate::data_model::{PipelineRequest, RunState, RunStatus, RunSummary};
use crate::error::{PipelineError, Result};
use crate::events::{EventSink, EventStream};
use crate::runner::PipelineRunner;

pub struct Orchestrator {
    runner: Arc<PipelineRunner>,
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<RunState>,
    cancel: Mutex<Option<CancellationToken>>,
    last_status: Mutex<Option<RunStatus>>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn cancel_slot(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.cancel.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn finish(&self, status: RunStatus) {
        *self.state() = status.terminal_state();
        self.cancel_slot().take();
        *self.last_status.lock().unwrap_or_else(|p| p.into_inner()) = Some(status);
    }

    /// Back to `Idle` unless a new run has already been started.
    fn settle(&self, status: RunStatus) {
        let mut state = self.state();
        if *state == status.terminal_state() {
            *state = RunState::Idle;
        }
    }
}

impl Orchestrator {
    pub fn new(runner: PipelineRunner) -> Self {
        Self {
            runner: Arc::new(runner),
            shared: Arc::new(Shared {
                state: Mutex::new(RunState::Idle),
                cancel: Mutex::new(None),
                last_status: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> RunState {
        *self.shared.state()
    }

    /// Terminal status of the most recent run, if one has finished.
    pub fn last_status(&self) -> Option<RunStatus> {
        *self.shared.last_status.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn pipeline_id(&self) -> &str {
        self.runner.pipeline_id()
    }

    /// Starts a run on a fresh worker thread.
    ///
    /// Allowed from `Idle` or any terminal state; a second concurrent run on
    /// the same orchestrator is rejected with [`PipelineError::Busy`].
    pub fn start_run(&self, request: PipelineRequest) -> Result<RunHandle> {
        request.validate()?;

        let token = CancellationToken::new();
        {
            let mut state = self.shared.state();
            if state.is_active() {
                return Err(PipelineError::Busy);
            }
            *state = RunState::Running;
            *self.shared.cancel_slot() = Some(token.clone());
        }

        let (sink, events) = EventSink::channel();
        let ctx = ExecutionContext::new(request.device, request.input_dirs.len(), sink, token);
        let (run_id, started_at) = (ctx.run_id, ctx.started_at);

        let runner = Arc::clone(&self.runner);
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("dcmesh-worker".to_string())
            .spawn(move || worker(runner, shared, request, ctx));

        match spawned {
            Ok(join) => Ok(RunHandle {
                run_id,
                started_at,
                events,
                join,
            }),
            Err(err) => {
                *self.shared.state() = RunState::Idle;
                self.shared.cancel_slot().take();
                Err(PipelineError::Io(err))
            }
        }
    }

    /// Requests cancellation of the active run. Returns `false` when there is
    /// nothing to cancel.
    pub fn cancel(&self) -> bool {
        let mut state = self.shared.state();
        if *state != RunState::Running {
            return false;
        }
        *state = RunState::Cancelling;
        if let Some(token) = self.shared.cancel_slot().as_ref() {
            token.cancel();
        }
        info!("cancellation requested");
        true
    }
}

fn worker(
    runner: Arc<PipelineRunner>,
    shared: Arc<Shared>,
    request: PipelineRequest,
    ctx: ExecutionContext,
) -> RunSummary {
    let summary = panic::catch_unwind(AssertUnwindSafe(|| runner.run(&request, &ctx)))
        .unwrap_or_else(|_| {
            error!(run_id = %ctx.run_id, "worker panicked");
            RunSummary {
                run_id: ctx.run_id,
                status: RunStatus::Error,
                message: "error: pipeline worker panicked".to_string(),
                started_at: ctx.started_at,
                finished_at: Utc::now(),
                cases: Vec::new(),
            }
        });

    // state first, so a subscriber reacting to RunFinished can start again
    shared.finish(summary.status);
    ctx.events().finished(summary.status, summary.message.clone());
    shared.settle(summary.status);
    summary
}

/// Handle to one run: its event stream and the worker to join.
pub struct RunHandle {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    events: EventStream,
    join: thread::JoinHandle<RunSummary>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn events(&mut self) -> &mut EventStream {
        &mut self.events
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Blocks until the worker exits.
    pub fn wait(self) -> RunSummary {
        let (run_id, started_at) = (self.run_id, self.started_at);
        self.join.join().unwrap_or_else(|_| RunSummary {
            run_id,
            status: RunStatus::Error,
            message: "error: pipeline worker panicked".to_string(),
            started_at,
            finished_at: Utc::now(),
            cases: Vec::new(),
        })
    }
}
