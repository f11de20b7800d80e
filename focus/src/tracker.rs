//! Continuous focus tracking
//!
//! After a full autofocus converges, the tracker keeps nudging the stage and
//! follows the sign of the score gradient over a short rolling window, so
//! slow drift (thermal, specimen settling) is corrected without rerunning
//! the whole search. Runs until cancelled or the stage nears a travel limit.

use crate::autofocus::run_autofocus;
use crate::controller::RunContext;
use crate::search::gradient_sum;
use crate::{FocusConfig, FocusError, FocusSample, FocusStage, RunState};
use std::collections::VecDeque;
use tracing::{debug, info};

/// Small probe step used to seed the gradient window.
const WARMUP_STEP: f64 = 15.0;

pub(crate) async fn run_live_track(
    stage: &dyn FocusStage,
    config: &FocusConfig,
    ctx: &RunContext,
) -> Result<(), FocusError> {
    // the autofocus hands back where it parked the stage, in the same
    // run-relative frame its history samples use
    let mut rel_pos = run_autofocus(stage, config, ctx).await?;
    ctx.check_cancelled()?;
    ctx.set_state(RunState::Tracking);

    let window_len = config.tracking_window.max(1);
    let mut window: VecDeque<f64> = VecDeque::from(vec![0.0; window_len]);
    for _ in 0..window_len {
        let score = stage.step_and_score(WARMUP_STEP).await?;
        rel_pos += WARMUP_STEP;
        window.pop_front();
        window.push_back(score);
    }

    let mut direction = 1.0;
    let mut swings = 0u32;

    loop {
        ctx.check_cancelled()?;

        let status = stage.status().await?;
        if status.position < config.tracking_margin
            || status.max_steps - status.position < config.tracking_margin
        {
            info!(
                position = status.position,
                "tracking stopped near a travel limit"
            );
            break;
        }

        let delta = direction * config.tracking_step;
        let score = stage.step_and_score(delta).await?;
        rel_pos += delta;
        window.pop_front();
        window.push_back(score);

        let gradient = gradient_sum(window.make_contiguous()) / window_len as f64;
        if gradient < 0.0 {
            direction = -direction;
            swings += 1;
            debug!(gradient, swings, "score falling, reversing tracking direction");
        } else {
            swings = 0;
        }

        ctx.recorder.push(FocusSample {
            position: rel_pos,
            score,
        });
    }
    Ok(())
}
