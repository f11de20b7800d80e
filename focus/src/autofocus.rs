//! Single-shot autofocus orchestration
//!
//! Three phases: a coarse bracket scan to straddle the peak, a Fibonacci
//! interval refinement around a Gaussian estimate of the peak, and a final
//! parabolic polish over the last probes. Each estimator failure degrades to
//! the best measured sample rather than aborting the run.

use crate::controller::RunContext;
use crate::search::{bracket_search, fibonacci_search, gaussian_fit, parabola_fit, Bracket};
use crate::{FocusConfig, FocusError, FocusSample, FocusStage, RunState};
use tracing::{info, warn};

/// Keep at least this many steps of travel before the bracket scan starts,
/// recentering the axis if the stage sits closer to either limit.
const EDGE_CLEARANCE: i64 = 200;

/// Returns the position the stage was parked at, in the run-relative frame
/// shared by every history sample of the run.
pub(crate) async fn run_autofocus(
    stage: &dyn FocusStage,
    config: &FocusConfig,
    ctx: &RunContext,
) -> Result<f64, FocusError> {
    ctx.set_state(RunState::Bracketing);

    let status = stage.status().await?;
    if status.position < EDGE_CLEARANCE || status.max_steps - status.position < EDGE_CLEARANCE {
        let center = status.max_steps / 2;
        info!(
            position = status.position,
            center, "stage near a travel limit, recentering before the scan"
        );
        stage.step((center - status.position) as f64).await?;
    }

    // All positions below are relative to the stage position at this point.
    let bracket = bracket_search(stage, config.bracket_step_size, &ctx.recorder).await?;
    ctx.check_cancelled()?;

    ctx.set_state(RunState::Refining);
    let coarse_peak = match gaussian_fit(&bracket) {
        Ok(mu) => mu,
        Err(err) => {
            warn!(%err, "gaussian fit failed, refining around the best bracket sample");
            bracket.best_position()
        }
    };

    // the bracket leaves the stage parked at its last sample
    stage.step(coarse_peak - bracket.z[2]).await?;
    let interval = (
        coarse_peak - config.refine_half_width,
        coarse_peak + config.refine_half_width,
    );
    let refined = fibonacci_search(
        stage,
        interval,
        config.fibonacci_iteration_cap,
        &ctx.recorder,
    )
    .await?;
    ctx.check_cancelled()?;

    ctx.set_state(RunState::Polishing);
    let mut probes = refined.last_three;
    probes.sort_by(|a, b| {
        a.position
            .partial_cmp(&b.position)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let polish = Bracket {
        z: [probes[0].position, probes[1].position, probes[2].position],
        f: [probes[0].score, probes[1].score, probes[2].score],
    };

    let (lo, hi) = refined.bounds;
    let target = match parabola_fit(&polish) {
        Ok(peak) if peak >= lo && peak <= hi => peak,
        Ok(peak) => {
            warn!(peak, lo, hi, "parabolic peak outside the refined interval");
            refined.best
        }
        Err(err) => {
            warn!(%err, "parabola fit failed, settling on the best probe");
            refined.best
        }
    };

    stage.step(target - refined.parked).await?;
    let score = stage.step_and_score(0.0).await?;
    ctx.recorder.push(FocusSample {
        position: target,
        score,
    });
    info!(target, score, "autofocus converged");
    Ok(target)
}
