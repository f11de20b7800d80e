//! Focus search numerics
//!
//! Bracket (hill-climb) search, Fibonacci interval narrowing, and the two
//! peak-interpolation estimators. The estimators and helpers are pure
//! functions of (position, score) samples; the two searches only talk to the
//! stage through the [`FocusStage`] seam, so they run unchanged against
//! simulated hardware.
//!
//! The fitting formulas follow eq. 16.5 in "Microscope Image Processing"
//! (Q. Wu et al.); the interval narrowing follows "Autofocusing for tissue
//! microscopy" (T.T.E. Yeo et al.).

use crate::{FitError, FocusError, FocusStage};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use tracing::info;

/// Golden ratio, used by the closed-form Fibonacci evaluation.
const PHI: f64 = 1.618033988749895;

/// Give up after this many direction reversals in the bracket search. Normal
/// operation needs at most one.
const MAX_REVERSALS: u32 = 8;

/// One measured point of the focus curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FocusSample {
    /// Stage position in run-relative steps.
    pub position: f64,
    /// Wavelet sharpness score at that position.
    pub score: f64,
}

/// Ordered samples accumulated over one focus run.
pub type ScoreHistory = Vec<FocusSample>;

/// Shared, append-only view of the running score history.
///
/// Cloneable handle; the worker appends live so the control surface can show
/// progress mid-run.
#[derive(Clone, Default)]
pub struct ScoreRecorder {
    inner: Arc<RwLock<ScoreHistory>>,
}

impl ScoreRecorder {
    pub fn push(&self, sample: FocusSample) {
        self.inner.write().unwrap().push(sample);
    }

    pub fn clear(&self) {
        self.inner.write().unwrap().clear();
    }

    pub fn snapshot(&self) -> ScoreHistory {
        self.inner.read().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Three sampled positions with a provisional maximum in the middle.
///
/// Positions run in scan order, so they are descending when the bracket was
/// found while scanning backward.
#[derive(Debug, Clone, Copy)]
pub struct Bracket {
    pub z: [f64; 3],
    pub f: [f64; 3],
}

impl Bracket {
    /// Position of the best-scoring sample in the triple.
    pub fn best_position(&self) -> f64 {
        let mut best = 0;
        for i in 1..3 {
            if self.f[i] > self.f[best] {
                best = i;
            }
        }
        self.z[best]
    }

    /// The triple sorted by ascending position.
    fn sorted(&self) -> ([f64; 3], [f64; 3]) {
        let mut pairs = [
            (self.z[0], self.f[0]),
            (self.z[1], self.f[1]),
            (self.z[2], self.f[2]),
        ];
        pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        (
            [pairs[0].0, pairs[1].0, pairs[2].0],
            [pairs[0].1, pairs[1].1, pairs[2].1],
        )
    }
}

/// Evaluate the n'th Fibonacci number via the closed (Binet) form, O(1).
pub fn fib(n: i32) -> f64 {
    (PHI.powi(n) - (-PHI).powi(-n)) / 5.0_f64.sqrt()
}

/// Smallest N such that fib(N) >= m.
pub fn smallest_fib_index(m: f64) -> i32 {
    if m <= 0.0 {
        return 0;
    }
    let (mut a, mut b) = (0.0_f64, 1.0_f64);
    let mut n = 0;
    while a < m {
        let next = a + b;
        a = b;
        b = next;
        n += 1;
    }
    n
}

const DEGENERACY_EPS: f64 = 1e-12;

/// Peak estimate from a Gaussian model of the focus curve.
///
/// `B = (ln f2 - ln f1) / (ln f3 - ln f2)`; the closed branch applies when
/// the outer spacings are equal, the general weighted branch otherwise.
/// Division by zero and non-positive scores are rejected up front.
pub fn gaussian_fit(bracket: &Bracket) -> Result<f64, FitError> {
    let (z, f) = bracket.sorted();

    if f.iter().any(|&v| v <= 0.0) {
        return Err(FitError::NonPositiveScore);
    }

    let (lf1, lf2, lf3) = (f[0].ln(), f[1].ln(), f[2].ln());
    let denom_b = lf3 - lf2;
    if denom_b.abs() < DEGENERACY_EPS {
        return Err(FitError::Degenerate("equal scores on the high side"));
    }
    let b = (lf2 - lf1) / denom_b;

    interpolate_peak(&z, b)
}

/// Peak estimate from a parabolic model of the focus curve.
///
/// Same structure as [`gaussian_fit`] with linear score differences
/// `E = (f2 - f1) / (f3 - f2)` in place of log differences.
pub fn parabola_fit(bracket: &Bracket) -> Result<f64, FitError> {
    let (z, f) = bracket.sorted();

    let denom_e = f[2] - f[1];
    if denom_e.abs() < DEGENERACY_EPS {
        return Err(FitError::Degenerate("equal scores on the high side"));
    }
    let e = (f[1] - f[0]) / denom_e;

    interpolate_peak(&z, e)
}

/// Shared stationary-point formula for both estimators, `r` being the
/// (log- or linear-) difference ratio.
fn interpolate_peak(z: &[f64; 3], r: f64) -> Result<f64, FitError> {
    let (z1, z2, z3) = (z[0], z[1], z[2]);

    let peak = if ((z3 - z2) - (z2 - z1)).abs() < 1e-9 {
        let denom = r - 1.0;
        if denom.abs() < DEGENERACY_EPS {
            return Err(FitError::Degenerate("difference ratio is one"));
        }
        0.5 * (r * (z3 + z2) - (z2 + z1)) / denom
    } else {
        let denom = r * (z3 - z2) - (z2 - z1);
        if denom.abs() < DEGENERACY_EPS {
            return Err(FitError::Degenerate("vanishing denominator"));
        }
        0.5 * (r * (z3 * z3 - z2 * z2) - (z2 * z2 - z1 * z1)) / denom
    };

    if !peak.is_finite() {
        return Err(FitError::Degenerate("non-finite estimate"));
    }
    Ok(peak)
}

/// Discrete gradient summed over a rolling score window.
///
/// Central differences in the interior, one-sided at the ends.
pub fn gradient_sum(window: &[f64]) -> f64 {
    match window.len() {
        0 | 1 => 0.0,
        n => {
            let mut sum = window[1] - window[0];
            sum += window[n - 1] - window[n - 2];
            for i in 1..n - 1 {
                sum += (window[i + 1] - window[i - 1]) / 2.0;
            }
            sum
        }
    }
}

/// Hill-climb until the score curve turns over, returning a bracket triple
/// around the provisional maximum.
///
/// Starting at the stage's current position, steps of `step_size` are taken
/// while the score keeps rising. The first dip within the first two
/// iterations is treated as sensor noise and stepped through once; a dip
/// that persists after two iterations reverses the scan with half the step.
/// A dip after at least three advances is accepted as the far side of the
/// peak. The 1-then-2 thresholds are load-bearing noise tolerance and are
/// kept exactly. Assumes the score curve is unimodal over the scanned range;
/// noisy non-unimodal curves can still mislead it.
pub async fn bracket_search(
    stage: &dyn FocusStage,
    step_size: f64,
    recorder: &ScoreRecorder,
) -> Result<Bracket, FocusError> {
    let mut step = step_size;
    // run-relative coordinate of the stage at the start of the current pass
    let mut origin = 0.0;
    let mut reversals = 0u32;

    loop {
        let mut f1 = stage.step_and_score(0.0).await?;
        recorder.push(FocusSample {
            position: origin,
            score: f1,
        });

        let mut f2 = stage.step_and_score(step).await?;
        let mut z2 = origin + step;
        recorder.push(FocusSample {
            position: z2,
            score: f2,
        });

        let mut f0 = f1;
        let mut iterations = 0u32;

        loop {
            if f2 > f1 {
                f0 = f1;
                f1 = f2;
                f2 = stage.step_and_score(step).await?;
                z2 += step;
                recorder.push(FocusSample {
                    position: z2,
                    score: f2,
                });
                iterations += 1;
            } else if iterations <= 1 {
                info!("score dipped early, assuming noise and continuing");
                f0 = f1;
                f1 = f2;
                f2 = stage.step_and_score(step).await?;
                z2 += step;
                recorder.push(FocusSample {
                    position: z2,
                    score: f2,
                });
                iterations += 1;
            } else if iterations <= 2 {
                reversals += 1;
                if reversals > MAX_REVERSALS {
                    return Err(FocusError::BracketFailed(format!(
                        "no peak after {MAX_REVERSALS} reversals"
                    )));
                }
                info!(reversals, "reversing scan direction with half the step");
                step = -step / 2.0;
                origin = z2;
                break;
            } else {
                info!(z2, "bracket complete");
                return Ok(Bracket {
                    z: [z2 - 2.0 * step, z2 - step, z2],
                    f: [f0, f1, f2],
                });
            }
        }
    }
}

/// Outcome of a Fibonacci interval search.
#[derive(Debug, Clone, Copy)]
pub struct IntervalSearchResult {
    /// Narrowed bounds; never wider than the input interval.
    pub bounds: (f64, f64),
    /// Best-scoring probe position seen.
    pub best: f64,
    /// Where the stage was left parked (the last measured probe).
    pub parked: f64,
    /// The three most recently visited probes, for downstream interpolation.
    pub last_three: [FocusSample; 3],
}

/// Narrow `interval` around the score maximum with Fibonacci-ratio probes.
///
/// The stage is assumed parked at the interval midpoint. Each iteration
/// replaces the worse bound with the better interior probe and measures one
/// new probe; iteration stops after `iteration_cap` rounds regardless of the
/// Fibonacci index, trading final accuracy for speed. The interval only ever
/// shrinks.
pub async fn fibonacci_search(
    stage: &dyn FocusStage,
    interval: (f64, f64),
    iteration_cap: u32,
    recorder: &ScoreRecorder,
) -> Result<IntervalSearchResult, FocusError> {
    let (mut a, mut b) = interval;
    let midpoint = 0.5 * (a + b);

    // a collapsed interval has nothing to narrow; score in place and return
    if b - a <= 0.0 {
        let score = stage.step_and_score(0.0).await?;
        let sample = FocusSample {
            position: midpoint,
            score,
        };
        recorder.push(sample);
        return Ok(IntervalSearchResult {
            bounds: (a, b),
            best: midpoint,
            parked: midpoint,
            last_three: [sample; 3],
        });
    }

    let n0 = smallest_fib_index(b - a);
    let delta = (fib(n0 - 2) / fib(n0)) * (b - a);

    let mut x1 = a + delta;
    let mut x2 = b - delta;

    let mut y1 = stage.step_and_score(x1 - midpoint).await?;
    recorder.push(FocusSample {
        position: x1,
        score: y1,
    });
    let mut y2 = stage.step_and_score(x2 - x1).await?;
    recorder.push(FocusSample {
        position: x2,
        score: y2,
    });

    let mut visited = vec![
        FocusSample {
            position: x1,
            score: y1,
        },
        FocusSample {
            position: x2,
            score: y2,
        },
    ];
    let mut parked = x2;
    let mut iterations = 1u32;
    let mut n = n0 - 1;

    while n > 1 {
        if iterations > iteration_cap {
            break;
        }
        let ratio = fib(n - 2) / fib(n);
        if y1 < y2 {
            a = x1;
            x1 = x2;
            y1 = y2;
            x2 = b - ratio * (b - a);
            y2 = stage.step_and_score(x2 - parked).await?;
            let sample = FocusSample {
                position: x2,
                score: y2,
            };
            recorder.push(sample);
            visited.push(sample);
            parked = x2;
        } else {
            b = x2;
            x2 = x1;
            y2 = y1;
            x1 = a + ratio * (b - a);
            y1 = stage.step_and_score(x1 - parked).await?;
            let sample = FocusSample {
                position: x1,
                score: y1,
            };
            recorder.push(sample);
            visited.push(sample);
            parked = x1;
        }
        iterations += 1;
        n -= 1;
    }

    let best = if y1 > y2 { x1 } else { x2 };
    let k = visited.len();
    let last_three = [
        visited[k.saturating_sub(3).min(k - 1)],
        visited[k.saturating_sub(2).min(k - 1)],
        visited[k - 1],
    ];

    Ok(IntervalSearchResult {
        bounds: (a, b),
        best,
        parked,
        last_three,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use microstage_motor::MotorStatus;
    use std::sync::Mutex;

    /// Stage simulator with a quadratic score curve peaking at `peak`.
    struct QuadStage {
        pos: Mutex<f64>,
        peak: f64,
        max_steps: i64,
    }

    impl QuadStage {
        fn new(start: f64, peak: f64) -> Self {
            Self {
                pos: Mutex::new(start),
                peak,
                max_steps: 100_000,
            }
        }

        fn score_at(&self, p: f64) -> f64 {
            100.0 - (p - self.peak).powi(2)
        }
    }

    #[async_trait]
    impl FocusStage for QuadStage {
        async fn step(&self, delta: f64) -> Result<i64, FocusError> {
            let mut pos = self.pos.lock().unwrap();
            *pos += delta;
            Ok(*pos as i64)
        }

        async fn step_and_score(&self, delta: f64) -> Result<f64, FocusError> {
            let mut pos = self.pos.lock().unwrap();
            *pos += delta;
            Ok(self.score_at(*pos))
        }

        async fn status(&self) -> Result<MotorStatus, FocusError> {
            Ok(MotorStatus {
                position: *self.pos.lock().unwrap() as i64,
                max_steps: self.max_steps,
                calibrated: true,
            })
        }
    }

    #[test]
    fn closed_form_fibonacci_matches_recurrence() {
        let (mut a, mut b) = (0.0_f64, 1.0_f64);
        for n in 0..40 {
            assert!(
                (fib(n) - a).abs() < 1e-6,
                "fib({n}) = {} expected {a}",
                fib(n)
            );
            let next = a + b;
            a = b;
            b = next;
        }
    }

    #[test]
    fn smallest_index_brackets_the_target() {
        assert_eq!(smallest_fib_index(0.0), 0);
        assert_eq!(smallest_fib_index(1.0), 1);
        assert_eq!(smallest_fib_index(800.0), 16); // fib(16) = 987
        for m in [2.0, 13.0, 100.0, 4181.0] {
            let n = smallest_fib_index(m);
            assert!(fib(n) >= m - 1e-6);
            assert!(fib(n - 1) < m);
        }
    }

    #[test]
    fn parabola_fit_recovers_quadratic_vertex() {
        let vertex = 123.456;
        let f = |z: f64| 50.0 - 0.02 * (z - vertex).powi(2);
        // unequal spacing exercises the general branch
        let bracket = Bracket {
            z: [100.0, 120.0, 150.0],
            f: [f(100.0), f(120.0), f(150.0)],
        };
        let peak = parabola_fit(&bracket).unwrap();
        assert!((peak - vertex).abs() < 1e-9, "peak {peak} vs {vertex}");
    }

    #[test]
    fn gaussian_fit_recovers_gaussian_peak() {
        let mu = 510.0;
        let f = |z: f64| 80.0 * (-(z - mu).powi(2) / 9000.0).exp();
        let bracket = Bracket {
            z: [400.0, 500.0, 630.0],
            f: [f(400.0), f(500.0), f(630.0)],
        };
        let peak = gaussian_fit(&bracket).unwrap();
        assert!((peak - mu).abs() < 1e-6, "peak {peak} vs {mu}");
    }

    #[test]
    fn equal_and_general_branches_agree() {
        let f = |z: f64| 90.0 - 0.5 * (z - 42.0).powi(2);
        let even = Bracket {
            z: [30.0, 40.0, 50.0],
            f: [f(30.0), f(40.0), f(50.0)],
        };
        // nudge the middle point so spacing is no longer equal
        let uneven = Bracket {
            z: [30.0, 40.000001, 50.0],
            f: [f(30.0), f(40.000001), f(50.0)],
        };
        let p_even = parabola_fit(&even).unwrap();
        let p_uneven = parabola_fit(&uneven).unwrap();
        assert!((p_even - 42.0).abs() < 1e-9);
        assert!((p_even - p_uneven).abs() < 1e-5);
    }

    #[test]
    fn fits_reject_degenerate_samples() {
        let flat = Bracket {
            z: [0.0, 10.0, 20.0],
            f: [5.0, 5.0, 5.0],
        };
        assert!(parabola_fit(&flat).is_err());
        assert!(gaussian_fit(&flat).is_err());

        let negative = Bracket {
            z: [0.0, 10.0, 20.0],
            f: [-1.0, 4.0, 2.0],
        };
        assert_eq!(gaussian_fit(&negative), Err(FitError::NonPositiveScore));
        // the parabola fit has no positivity requirement
        assert!(parabola_fit(&negative).is_ok());
    }

    #[test]
    fn gradient_sum_matches_central_differences() {
        assert_eq!(gradient_sum(&[]), 0.0);
        assert_eq!(gradient_sum(&[3.0]), 0.0);
        // two entries: the one-sided difference counts at both ends
        assert_eq!(gradient_sum(&[1.0, 4.0]), 6.0);
        // rising then falling
        let g = gradient_sum(&[0.0, 2.0, 1.0]);
        assert!((g - (2.0 + 0.5 - 1.0)).abs() < 1e-12);
    }

    #[tokio::test]
    async fn bracket_straddles_the_peak() {
        let stage = QuadStage::new(0.0, 500.0);
        let recorder = ScoreRecorder::default();

        let bracket = bracket_search(&stage, 300.0, &recorder).await.unwrap();

        let (z, f) = {
            let mut pairs: Vec<(f64, f64)> = bracket.z.iter().copied().zip(bracket.f).collect();
            pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
            (
                [pairs[0].0, pairs[1].0, pairs[2].0],
                [pairs[0].1, pairs[1].1, pairs[2].1],
            )
        };
        assert!(z[0] <= 500.0 + 300.0 && z[2] >= 500.0 - 300.0, "triple {z:?}");
        assert!(f[1] >= f[0], "middle score must be the provisional max");
        assert!(f[1] >= f[2], "middle score must be the provisional max");
        assert!(!recorder.is_empty());
    }

    #[tokio::test]
    async fn interval_search_never_widens() {
        let stage = QuadStage::new(500.0, 300.0);
        let recorder = ScoreRecorder::default();

        let interval = (100.0, 900.0);
        let result = fibonacci_search(&stage, interval, 10, &recorder)
            .await
            .unwrap();

        let (a, b) = result.bounds;
        assert!(a >= interval.0 - 1e-9);
        assert!(b <= interval.1 + 1e-9);
        assert!(b - a <= interval.1 - interval.0);
        assert!(result.best >= a - 1e-9 && result.best <= b + 1e-9);
        // unimodal curve: ten iterations land close to the true peak
        assert!((result.best - 300.0).abs() < 20.0, "best {}", result.best);
    }

    #[tokio::test]
    async fn collapsed_interval_returns_the_midpoint() {
        let stage = QuadStage::new(100.0, 300.0);
        let recorder = ScoreRecorder::default();

        let result = fibonacci_search(&stage, (100.0, 100.0), 10, &recorder)
            .await
            .unwrap();

        assert_eq!(result.best, 100.0);
        assert_eq!(result.parked, 100.0);
        assert_eq!(result.bounds, (100.0, 100.0));
        for sample in result.last_three {
            assert!(sample.position.is_finite());
            assert!(sample.score.is_finite());
        }
        // one in-place measurement, no moves
        assert_eq!(recorder.len(), 1);
    }

    #[tokio::test]
    async fn interval_search_respects_iteration_cap() {
        let stage = QuadStage::new(0.0, 0.0);
        let recorder = ScoreRecorder::default();

        // enormous interval, tiny cap: must still terminate promptly
        let result = fibonacci_search(&stage, (-50_000.0, 50_000.0), 3, &recorder)
            .await
            .unwrap();

        // two seed probes plus at most `cap` refinement probes
        assert!(recorder.len() <= 2 + 3);
        let (a, b) = result.bounds;
        assert!(b - a <= 100_000.0);
    }
}
