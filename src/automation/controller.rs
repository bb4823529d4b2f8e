//! PD controller turning indicator samples into hold/release decisions.
//!
//! error  = distance from the indicator to the nearest zone edge
//!          (0 inside the zone, positive below it, negative above it)
//! signal = kp * error + kd * d(error)/dt
//!
//! A signal above `+band` holds, below `-band` releases, and anything in
//! between leaves the actuator as it is. Only a swing across the whole band
//! can flip the output, which keeps the input from chattering.

use std::time::{Duration, Instant};

use crate::automation::detection::{IndicatorSample, Reading, TargetZone};

/// What the actuator should do this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Hold,
    Release,
    /// Keep the current actuator state
    NoOp,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlDecision {
    pub action: Action,
    /// Magnitude of the control signal
    pub intensity: f32,
}

impl ControlDecision {
    pub fn no_op() -> Self {
        Self {
            action: Action::NoOp,
            intensity: 0.0,
        }
    }
}

/// Controller gains and thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PdGains {
    pub kp: f32,
    /// Derivative gain, per second
    pub kd: f32,
    pub hysteresis_band: f32,
    /// Floor for dt so that back-to-back samples cannot blow up the derivative
    pub min_dt: Duration,
    pub confidence_threshold: f32,
}

/// Controller memory between ticks. Reset at the start of every episode.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ControllerState {
    /// None until a trusted sample has been seen
    pub previous_error: Option<f32>,
    /// Last derivative estimate (error units per second)
    pub derivative: f32,
    pub last_tick: Option<Instant>,
}

/// Signed distance from `position` to the nearest edge of `zone`.
pub fn tracking_error(position: f32, zone: TargetZone) -> f32 {
    if position < zone.low {
        zone.low - position
    } else if position > zone.high {
        zone.high - position
    } else {
        0.0
    }
}

/// Maps a control signal onto an action using the hysteresis band.
pub fn decide(signal: f32, band: f32) -> ControlDecision {
    let action = if signal > band {
        Action::Hold
    } else if signal < -band {
        Action::Release
    } else {
        Action::NoOp
    };
    ControlDecision {
        action,
        intensity: signal.abs(),
    }
}

/// One controller step as a pure function.
///
/// Untrusted samples (low confidence, zone unknown, nothing found) force
/// `NoOp` and return a fresh state, so a stale error never feeds the next
/// derivative.
pub fn pd_tick(
    gains: &PdGains,
    sample: &IndicatorSample,
    state: ControllerState,
) -> (ControlDecision, ControllerState) {
    let (position, zone) = match sample.reading {
        Reading::Found { position, zone } if sample.confidence >= gains.confidence_threshold => {
            (position, zone)
        }
        _ => return (ControlDecision::no_op(), ControllerState::default()),
    };

    let error = tracking_error(position, zone);
    let derivative = match (state.previous_error, state.last_tick) {
        (Some(previous), Some(last)) => {
            let dt = sample
                .timestamp
                .saturating_duration_since(last)
                .max(gains.min_dt)
                .as_secs_f32();
            (error - previous) / dt
        }
        _ => 0.0,
    };

    let signal = gains.kp * error + gains.kd * derivative;
    let decision = decide(signal, gains.hysteresis_band);

    (
        decision,
        ControllerState {
            previous_error: Some(error),
            derivative,
            last_tick: Some(sample.timestamp),
        },
    )
}

/// Stateful wrapper owned by the control loop.
#[derive(Debug, Clone)]
pub struct PdController {
    gains: PdGains,
    state: ControllerState,
}

impl PdController {
    pub fn new(gains: PdGains) -> Self {
        Self {
            gains,
            state: ControllerState::default(),
        }
    }

    pub fn tick(&mut self, sample: &IndicatorSample) -> ControlDecision {
        let (decision, state) = pd_tick(&self.gains, sample, self.state);
        self.state = state;
        decision
    }

    pub fn reset(&mut self) {
        self.state = ControllerState::default();
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }
}
