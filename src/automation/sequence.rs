//! Multi-step input routines (cast, sell, recovery) as data.
//!
//! A `SequenceRun` executes at most one input step per call and turns waits
//! into deadlines, so the control loop keeps ticking (and keeps honouring
//! pause/stop) while a routine is in progress.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::automation::config::AutoSellConfig;
use crate::automation::input::{ActuatorFault, Actuator, InputBackend, MouseButton};

/// Delay between cursor move, button down and button up of a click.
const CLICK_SETTLE_MS: u64 = 50;

/// A single input step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Step {
    /// Press the action button
    Hold,
    /// Release the action button
    Release,
    Key { key: char },
    Click { x: i32, y: i32 },
    RightClick { x: i32, y: i32 },
    Type { text: String },
    Wait { ms: u64 },
    MoveTo { x: i32, y: i32 },
    ButtonDown { button: MouseButton },
    ButtonUp { button: MouseButton },
}

/// Which routine a run belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceKind {
    Cast,
    Sell,
    Recovery,
}

/// Hold the action button for `hold`, then let go.
pub fn cast_steps(hold: Duration) -> Vec<Step> {
    vec![
        Step::Hold,
        Step::Wait {
            ms: hold.as_millis() as u64,
        },
        Step::Release,
    ]
}

/// Post-catch routine: settle, then run the shop purchase when `purchase` is set.
///
/// Purchase order: shop key, point 1, point 2, amount, point 1, point 3,
/// point 2, right-click point 4 to close.
pub fn sell_steps(wait_after_catch: Duration, auto_sell: &AutoSellConfig, purchase: bool) -> Vec<Step> {
    let mut steps = vec![
        Step::Release,
        Step::Wait {
            ms: wait_after_catch.as_millis() as u64,
        },
    ];
    if !purchase {
        return steps;
    }
    let [Some(p1), Some(p2), Some(p3), Some(p4)] = auto_sell.points else {
        log::warn!(
            "Auto sell skipped: points {:?} not set",
            auto_sell.missing_points()
        );
        return steps;
    };

    let click_wait = Step::Wait {
        ms: auto_sell.click_delay_ms,
    };
    steps.push(Step::Key { key: 'e' });
    steps.push(Step::Wait {
        ms: auto_sell.key_delay_ms,
    });
    for point in [p1, p2] {
        steps.push(Step::Click { x: point.x, y: point.y });
        steps.push(click_wait.clone());
    }
    steps.push(Step::Type {
        text: auto_sell.amount.to_string(),
    });
    steps.push(Step::Wait {
        ms: auto_sell.after_type_delay_ms,
    });
    for point in [p1, p3, p2] {
        steps.push(Step::Click { x: point.x, y: point.y });
        steps.push(click_wait.clone());
    }
    steps.push(Step::RightClick { x: p4.x, y: p4.y });
    steps.push(click_wait);
    steps
}

/// Rewrites clicks into move / down / up with settle waits in between.
fn expand(steps: Vec<Step>) -> VecDeque<Step> {
    let settle = Step::Wait {
        ms: CLICK_SETTLE_MS,
    };
    let mut out = VecDeque::with_capacity(steps.len());
    for step in steps {
        let (x, y, button) = match step {
            Step::Click { x, y } => (x, y, MouseButton::Left),
            Step::RightClick { x, y } => (x, y, MouseButton::Right),
            other => {
                out.push_back(other);
                continue;
            }
        };
        out.push_back(Step::MoveTo { x, y });
        out.push_back(settle.clone());
        out.push_back(Step::ButtonDown { button });
        out.push_back(settle.clone());
        out.push_back(Step::ButtonUp { button });
    }
    out
}

/// An in-progress routine.
#[derive(Debug, Clone)]
pub struct SequenceRun {
    kind: SequenceKind,
    steps: VecDeque<Step>,
    resume_at: Option<Instant>,
}

impl SequenceRun {
    pub fn new(kind: SequenceKind, steps: Vec<Step>) -> Self {
        Self {
            kind,
            steps: expand(steps),
            resume_at: None,
        }
    }

    pub fn kind(&self) -> SequenceKind {
        self.kind
    }

    /// Runs whatever is due at `now`. Returns `Ok(true)` once every step is done.
    pub fn advance<B: InputBackend>(
        &mut self,
        actuator: &mut Actuator<B>,
        now: Instant,
    ) -> Result<bool, ActuatorFault> {
        if let Some(at) = self.resume_at {
            if now < at {
                return Ok(false);
            }
            self.resume_at = None;
        }

        // Skip through zero-length waits to the next real step
        let step = loop {
            match self.steps.pop_front() {
                None => return Ok(true),
                Some(Step::Wait { ms: 0 }) => continue,
                Some(Step::Wait { ms }) => {
                    self.resume_at = Some(now + Duration::from_millis(ms));
                    return Ok(false);
                }
                Some(step) => break step,
            }
        };

        perform(actuator, &step)?;

        // A wait right after a step starts counting now, not on the next tick
        if let Some(Step::Wait { ms }) = self.steps.front() {
            self.resume_at = Some(now + Duration::from_millis(*ms));
            self.steps.pop_front();
        }
        Ok(self.steps.is_empty() && self.resume_at.is_none())
    }
}

fn perform<B: InputBackend>(actuator: &mut Actuator<B>, step: &Step) -> Result<(), ActuatorFault> {
    match step {
        Step::Hold => actuator.hold_action(),
        Step::Release => actuator.release_action(),
        Step::Key { key } => actuator.tap_key(*key),
        Step::Type { text } => actuator.type_text(text),
        Step::MoveTo { x, y } => actuator.move_to(*x, *y),
        Step::ButtonDown { button } => actuator.press(*button),
        Step::ButtonUp { button } => actuator.release(*button),
        // Expanded or consumed before reaching here
        Step::Click { .. } | Step::RightClick { .. } | Step::Wait { .. } => Ok(()),
    }
}
