//! Stepper Motor Actuator Client
//!
//! HTTP client for the stage controller firmware that drives the focus and
//! aperture stepper motors. The controller exposes a tiny REST surface:
//! relative moves and a per-axis status query. The motor is the source of
//! truth for its own position, so status is always polled, never cached.

mod client;

pub use client::*;

use serde::{Deserialize, Serialize};

/// A motor degree of freedom on the stage controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Focus,
    Aperture,
}

impl Axis {
    pub fn as_str(&self) -> &'static str {
        match self {
            Axis::Focus => "focus",
            Axis::Aperture => "aperture",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "focus" => Some(Axis::Focus),
            "aperture" => Some(Axis::Aperture),
            _ => None,
        }
    }
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Direction of a relative move, matching the firmware's `{0,1}` encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDirection {
    Backward,
    Forward,
}

impl MoveDirection {
    pub fn as_u8(&self) -> u8 {
        match self {
            MoveDirection::Backward => 0,
            MoveDirection::Forward => 1,
        }
    }

    /// Direction implied by a signed step delta.
    pub fn from_delta(delta: f64) -> Self {
        if delta < 0.0 {
            MoveDirection::Backward
        } else {
            MoveDirection::Forward
        }
    }
}

/// Per-axis status reported by the stage controller.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct MotorStatus {
    pub position: i64,
    pub max_steps: i64,
    pub calibrated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_round_trip() {
        assert_eq!(Axis::Focus.as_str(), "focus");
        assert_eq!(Axis::Aperture.as_str(), "aperture");
        assert_eq!(Axis::from_str("FOCUS"), Some(Axis::Focus));
        assert_eq!(Axis::from_str("aperture"), Some(Axis::Aperture));
        assert_eq!(Axis::from_str("zoom"), None);
    }

    #[test]
    fn direction_from_delta() {
        assert_eq!(MoveDirection::from_delta(-1.5), MoveDirection::Backward);
        assert_eq!(MoveDirection::from_delta(0.0), MoveDirection::Forward);
        assert_eq!(MoveDirection::from_delta(42.0), MoveDirection::Forward);
        assert_eq!(MoveDirection::Backward.as_u8(), 0);
        assert_eq!(MoveDirection::Forward.as_u8(), 1);
    }

    #[test]
    fn status_parses_wire_json() {
        let status: MotorStatus =
            serde_json::from_str(r#"{"position": 512, "max_steps": 4096, "calibrated": true}"#)
                .unwrap();
        assert_eq!(status.position, 512);
        assert_eq!(status.max_steps, 4096);
        assert!(status.calibrated);
    }
}
