//! Autofocus core
//!
//! Drives the focus stepper toward the lens position that maximizes the
//! wavelet sharpness score of the live frame. One background worker at a time
//! runs either a single converging autofocus (bracket, refine, polish) or a
//! continuous live-tracking loop; the web layer only starts/cancels runs and
//! reads the run state and score history through [`FocusController`].

mod autofocus;
mod controller;
mod error;
mod search;
mod stage;
mod tracker;

pub use controller::*;
pub use error::*;
pub use search::*;
pub use stage::*;

use microstage_motor::Axis;
use serde::{Deserialize, Serialize};

/// State of the focus worker, observable by the control surface.
///
/// `Done`, `Cancelled` and `Failed` are terminal; a new run resets to the
/// first active phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Idle,
    Bracketing,
    Refining,
    Polishing,
    Tracking,
    Done,
    Cancelled,
    Failed,
}

impl RunState {
    /// Whether the worker has stopped (or never started).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Idle | RunState::Done | RunState::Cancelled | RunState::Failed
        )
    }
}

/// Tuning knobs for the autofocus and tracking loops.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FocusConfig {
    /// Axis the focus loop drives.
    pub axis: Axis,
    /// Initial hill-climb step in motor steps.
    pub bracket_step_size: f64,
    /// Half width of the refine interval around the bracket estimate.
    pub refine_half_width: f64,
    /// Step per tracking iteration.
    pub tracking_step: f64,
    /// Rolling window length for the tracking gradient.
    pub tracking_window: usize,
    /// Stop tracking within this many steps of either travel limit.
    pub tracking_margin: i64,
    /// Hard cap on Fibonacci refine iterations.
    pub fibonacci_iteration_cap: u32,
    /// Settling delay after a motor move before scoring, in milliseconds.
    pub settle_ms: u64,
}

impl Default for FocusConfig {
    fn default() -> Self {
        Self {
            axis: Axis::Focus,
            bracket_step_size: 300.0,
            refine_half_width: 400.0,
            tracking_step: 50.0,
            tracking_window: 2,
            tracking_margin: 50,
            fibonacci_iteration_cap: 10,
            settle_ms: 100,
        }
    }
}
