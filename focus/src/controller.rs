//! Run lifecycle management
//!
//! [`FocusController`] owns the single background worker slot: at most one
//! autofocus or tracking run is active at a time, a second start request is
//! rejected, and cancellation is a flag the worker observes between motor
//! moves. The control surface reads state and score history through the
//! controller without ever touching the worker task directly.

use crate::autofocus::run_autofocus;
use crate::tracker::run_live_track;
use crate::{
    FocusConfig, FocusError, FocusStage, RunState, ScoreHistory, ScoreRecorder, SupervisedStage,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared observable state of the current (or last) run.
pub(crate) struct RunContext {
    state: RwLock<RunState>,
    pub(crate) recorder: ScoreRecorder,
    cancel: Arc<AtomicBool>,
}

impl RunContext {
    fn new() -> Self {
        Self {
            state: RwLock::new(RunState::Idle),
            recorder: ScoreRecorder::default(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn set_state(&self, state: RunState) {
        *self.state.write().unwrap() = state;
        info!(?state, "focus run state");
    }

    pub(crate) fn state(&self) -> RunState {
        *self.state.read().unwrap()
    }

    /// Phase-boundary cancellation check, complementing the per-move checks
    /// in [`SupervisedStage`].
    pub(crate) fn check_cancelled(&self) -> Result<(), FocusError> {
        if self.cancel.load(Ordering::SeqCst) {
            Err(FocusError::Cancelled)
        } else {
            Ok(())
        }
    }
}

enum RunKind {
    Autofocus,
    LiveTrack,
}

/// Entry point for starting, observing and cancelling focus runs.
pub struct FocusController {
    stage: Arc<dyn FocusStage>,
    config: FocusConfig,
    ctx: Arc<RunContext>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FocusController {
    pub fn new(stage: Arc<dyn FocusStage>, config: FocusConfig) -> Self {
        Self {
            stage,
            config,
            ctx: Arc::new(RunContext::new()),
            task: Mutex::new(None),
        }
    }

    /// Start a single converging autofocus run.
    pub fn start_autofocus(&self) -> Result<(), FocusError> {
        self.spawn(RunKind::Autofocus)
    }

    /// Start an autofocus run followed by continuous tracking.
    pub fn start_live_track(&self) -> Result<(), FocusError> {
        self.spawn(RunKind::LiveTrack)
    }

    fn spawn(&self, kind: RunKind) -> Result<(), FocusError> {
        let mut task = self.task.lock().unwrap();
        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() {
                return Err(FocusError::AlreadyRunning);
            }
        }

        self.ctx.cancel.store(false, Ordering::SeqCst);
        self.ctx.recorder.clear();

        let stage = SupervisedStage::new(Arc::clone(&self.stage), Arc::clone(&self.ctx.cancel));
        let config = self.config.clone();
        let ctx = Arc::clone(&self.ctx);

        *task = Some(tokio::spawn(async move {
            let result = match kind {
                RunKind::Autofocus => run_autofocus(&stage, &config, &ctx).await.map(|_| ()),
                RunKind::LiveTrack => run_live_track(&stage, &config, &ctx).await,
            };
            let terminal = match result {
                Ok(()) => RunState::Done,
                Err(FocusError::Cancelled) => RunState::Cancelled,
                Err(err) => {
                    error!(%err, "focus run failed");
                    RunState::Failed
                }
            };
            ctx.set_state(terminal);
        }));
        Ok(())
    }

    /// Request cancellation; the worker stops within one motor move.
    pub fn cancel(&self) {
        self.ctx.cancel.store(true, Ordering::SeqCst);
    }

    pub fn state(&self) -> RunState {
        self.ctx.state()
    }

    pub fn score_history(&self) -> ScoreHistory {
        self.ctx.recorder.snapshot()
    }

    pub fn is_running(&self) -> bool {
        !self.state().is_terminal()
    }
}
