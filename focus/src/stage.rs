//! Stage abstraction between the search algorithms and the hardware
//!
//! The searches only ever need three verbs: move by a signed delta, move and
//! score the resulting frame, and read the axis status. [`MotorStage`] wires
//! those to the real motor controller and frame slot; tests substitute a
//! simulator. [`SupervisedStage`] wraps any stage with cooperative
//! cancellation so a cancel request lands between moves instead of waiting
//! for a whole phase to finish.

use crate::FocusError;
use async_trait::async_trait;
use microstage_imaging::{FrameSlot, WaveletScorer};
use microstage_motor::{Axis, MotorClient, MotorStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Minimal surface the focus searches drive.
#[async_trait]
pub trait FocusStage: Send + Sync {
    /// Move the axis by a signed delta in steps. Returns the absolute
    /// position reported by the controller.
    async fn step(&self, delta: f64) -> Result<i64, FocusError>;

    /// Move by a signed delta, wait for the stage to settle, then score the
    /// latest frame. A zero delta scores in place without touching the motor.
    async fn step_and_score(&self, delta: f64) -> Result<f64, FocusError>;

    /// Current axis status from the controller.
    async fn status(&self) -> Result<MotorStatus, FocusError>;
}

#[async_trait]
impl<T: FocusStage + ?Sized> FocusStage for Arc<T> {
    async fn step(&self, delta: f64) -> Result<i64, FocusError> {
        (**self).step(delta).await
    }

    async fn step_and_score(&self, delta: f64) -> Result<f64, FocusError> {
        (**self).step_and_score(delta).await
    }

    async fn status(&self) -> Result<MotorStatus, FocusError> {
        (**self).status().await
    }
}

/// The real stage: motor over HTTP, frames from the shared slot.
pub struct MotorStage {
    motor: Arc<MotorClient>,
    frames: FrameSlot,
    scorer: WaveletScorer,
    axis: Axis,
    settle: Duration,
}

impl MotorStage {
    pub fn new(
        motor: Arc<MotorClient>,
        frames: FrameSlot,
        axis: Axis,
        settle: Duration,
    ) -> Self {
        Self {
            motor,
            frames,
            scorer: WaveletScorer::default(),
            axis,
            settle,
        }
    }

    fn score_latest(&self) -> Result<f64, FocusError> {
        let frame = self.frames.latest().ok_or(FocusError::NoFrame)?;
        Ok(self.scorer.score(&frame))
    }
}

#[async_trait]
impl FocusStage for MotorStage {
    async fn step(&self, delta: f64) -> Result<i64, FocusError> {
        let position = self.motor.step(self.axis, delta).await?;
        debug!(delta, position, "stage moved");
        Ok(position)
    }

    async fn step_and_score(&self, delta: f64) -> Result<f64, FocusError> {
        if delta != 0.0 {
            self.step(delta).await?;
            tokio::time::sleep(self.settle).await;
        }
        let score = self.score_latest()?;
        debug!(delta, score, "frame scored");
        Ok(score)
    }

    async fn status(&self) -> Result<MotorStatus, FocusError> {
        Ok(self.motor.status(self.axis).await?)
    }
}

/// Wraps a stage with a cancellation flag checked around every motor
/// interaction, so a run aborts within one move of the request.
pub struct SupervisedStage<S> {
    inner: S,
    cancel: Arc<AtomicBool>,
}

impl<S: FocusStage> SupervisedStage<S> {
    pub fn new(inner: S, cancel: Arc<AtomicBool>) -> Self {
        Self { inner, cancel }
    }

    fn check(&self) -> Result<(), FocusError> {
        if self.cancel.load(Ordering::SeqCst) {
            Err(FocusError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl<S: FocusStage> FocusStage for SupervisedStage<S> {
    async fn step(&self, delta: f64) -> Result<i64, FocusError> {
        self.check()?;
        let position = self.inner.step(delta).await?;
        self.check()?;
        Ok(position)
    }

    async fn step_and_score(&self, delta: f64) -> Result<f64, FocusError> {
        self.check()?;
        let score = self.inner.step_and_score(delta).await?;
        self.check()?;
        Ok(score)
    }

    async fn status(&self) -> Result<MotorStatus, FocusError> {
        self.inner.status().await
    }
}
