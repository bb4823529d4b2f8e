//! Session state machine for the fishing loop.
//!
//! The machine sequences Idle → Casting → Reeling → Selling → Idle, with
//! Recovering, Paused and Stopped reachable from the working states.
//! `SessionMachine::handle` is a pure transition function: it consumes one
//! event and returns the effects the control loop must carry out. It never
//! touches the screen or the input devices itself.

use serde_json::json;
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::automation::controller::ControlDecision;
use crate::automation::detection::{IndicatorSample, Reading};
use crate::automation::input::ActuatorFault;
use crate::automation::notifier::NotifierKind;
use crate::automation::sequence::SequenceKind;
use crate::automation::stats::{format_uptime, SessionStats};
use crate::ocr::RewardEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not started, or waiting for the next cast
    Idle,
    /// Cast issued, waiting for the bar to appear
    Casting,
    /// Bar on screen, controller in charge of the action button
    Reeling,
    /// Catch landed, drop scan and optional purchase
    Selling,
    /// Running corrective steps after a missing cue
    Recovering,
    Paused,
    /// Terminal
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "Idle",
            SessionState::Casting => "Casting",
            SessionState::Reeling => "Reeling",
            SessionState::Selling => "Selling",
            SessionState::Recovering => "Recovering",
            SessionState::Paused => "Paused",
            SessionState::Stopped => "Stopped",
        };
        f.write_str(name)
    }
}

/// External commands accepted by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Pause,
    Resume,
    Stop,
    /// Switches the overlay layout; never changes the session state
    ToggleLayout,
}

/// Session-terminating failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    #[error("recovery failed {attempts} time(s), giving up")]
    RecoveryExhausted { attempts: u32 },
    #[error(transparent)]
    Actuator(#[from] ActuatorFault),
}

/// Timing and policy values the machine decides with.
#[derive(Debug, Clone, PartialEq)]
pub struct MachineConfig {
    pub confidence_threshold: f32,
    pub cast_timeout: Duration,
    pub max_recasts: u32,
    /// Idle time between the end of an episode and the next cast
    pub recast_delay: Duration,
    /// Longest a reeling episode may take before it counts as failed
    pub episode_timeout: Duration,
    /// Consecutive missing-bar samples that confirm a catch
    pub loss_confirm_ticks: u32,
    /// Consecutive capture failures that trigger recovery
    pub capture_error_limit: u32,
    pub sell_timeout: Duration,
    /// Catches between purchases, 0 disables purchasing
    pub sell_every: u32,
    /// Items bought per purchase, reported in the purchase notification
    pub purchase_amount: u32,
    pub recovery_max_retries: u32,
    pub recovery_timeout: Duration,
    /// Progress notification interval in catches, 0 disables
    pub notify_every_catches: u32,
}

impl Default for MachineConfig {
    fn default() -> Self {
        crate::automation::config::FishingConfig::default().machine()
    }
}

/// Why a session entered recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryReason {
    /// The bar never appeared after every recast
    CastExhausted,
    EpisodeTimeout,
    CaptureErrors,
    SellTimeout,
}

impl RecoveryReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryReason::CastExhausted => "cast_exhausted",
            RecoveryReason::EpisodeTimeout => "episode_timeout",
            RecoveryReason::CaptureErrors => "capture_errors",
            RecoveryReason::SellTimeout => "sell_timeout",
        }
    }
}

impl fmt::Display for RecoveryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to the transition function.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Command(Command),
    /// Time has passed; checks timeouts and the recast delay
    Tick,
    /// Locator output, with the controller's decision while reeling
    Observed {
        sample: IndicatorSample,
        decision: Option<ControlDecision>,
    },
    CaptureFailed,
    SequenceFinished(SequenceKind),
    /// Result of checking the screen after recovery steps
    RecoveryVerified(bool),
    ActuatorFault(ActuatorFault),
    Reward(RewardEvent),
}

/// Work the control loop carries out on behalf of the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Start the cast sequence
    Cast,
    ResetController,
    Apply(ControlDecision),
    /// Abort any running sequence and release every held button
    ReleaseInput,
    Sell { purchase: bool },
    /// Shop purchase with no catch to settle first
    Purchase,
    /// Hand the drop region to the recognizer once the catch has settled
    ScanDrops,
    RunRecovery { attempt: u32 },
    VerifyRecovery,
    Notify(NotifierKind, serde_json::Value),
}

pub struct SessionMachine {
    state: SessionState,
    /// State to return to on resume
    paused_from: Option<SessionState>,
    entered_at: Instant,
    started: bool,
    recasts: u32,
    capture_errors: u32,
    lost_ticks: u32,
    recovery_failures: u32,
    catches_since_sell: u32,
    purchasing: bool,
    stats: SessionStats,
    error: Option<SessionError>,
    config: MachineConfig,
}

impl SessionMachine {
    pub fn new(config: MachineConfig, now: Instant) -> Self {
        Self {
            state: SessionState::Idle,
            paused_from: None,
            entered_at: now,
            started: false,
            recasts: 0,
            capture_errors: 0,
            lost_ticks: 0,
            recovery_failures: 0,
            catches_since_sell: 0,
            purchasing: false,
            stats: SessionStats::default(),
            error: None,
            config,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// The failure that stopped the session, if any.
    pub fn error(&self) -> Option<&SessionError> {
        self.error.as_ref()
    }

    /// What a single start/pause/resume toggle means right now.
    pub fn toggle_command(&self) -> Option<Command> {
        match self.state {
            SessionState::Stopped => None,
            SessionState::Paused => Some(Command::Resume),
            SessionState::Idle if !self.started => Some(Command::Start),
            _ => Some(Command::Pause),
        }
    }

    /// Applies one event and returns the resulting effects, in order.
    pub fn handle(&mut self, event: Event, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.state == SessionState::Stopped {
            return effects;
        }

        match event {
            Event::Command(command) => self.on_command(command, now, &mut effects),
            Event::ActuatorFault(fault) => {
                log::error!("Input fault: {}", fault);
                self.fail(SessionError::from(fault), now, &mut effects);
            }
            Event::Reward(reward) => self.on_reward(reward, &mut effects),
            _ if self.state == SessionState::Paused => {}
            Event::Tick => self.on_tick(now, &mut effects),
            Event::Observed { sample, decision } => {
                self.on_observed(&sample, decision, now, &mut effects)
            }
            Event::CaptureFailed => self.on_capture_failed(now, &mut effects),
            Event::SequenceFinished(kind) => self.on_sequence_finished(kind, now, &mut effects),
            Event::RecoveryVerified(ok) => self.on_recovery_verified(ok, now, &mut effects),
        }
        effects
    }

    fn on_command(&mut self, command: Command, now: Instant, effects: &mut Vec<Effect>) {
        match command {
            Command::Start => {
                if self.state == SessionState::Idle && !self.started {
                    self.started = true;
                    self.stats.start_clock(now);
                    if self.config.sell_every > 0 {
                        log::info!("Session started, purchasing before the first cast");
                        self.purchasing = true;
                        self.catches_since_sell = 0;
                        self.transition(SessionState::Selling, now, effects);
                        effects.push(Effect::Purchase);
                    } else {
                        log::info!("Session started");
                        self.begin_cast(now, effects);
                    }
                }
            }
            Command::Pause => {
                if self.state != SessionState::Paused {
                    self.paused_from = Some(self.state);
                    self.stats.stop_clock(now);
                    effects.push(Effect::ReleaseInput);
                    self.transition(SessionState::Paused, now, effects);
                }
            }
            Command::Resume => {
                if let (SessionState::Paused, Some(from)) = (self.state, self.paused_from.take()) {
                    if self.started {
                        self.stats.start_clock(now);
                    }
                    self.resume_into(from, now, effects);
                }
            }
            Command::Stop => {
                log::info!("Stop requested");
                self.stats.stop_clock(now);
                effects.push(Effect::ReleaseInput);
                self.transition(SessionState::Stopped, now, effects);
            }
            Command::ToggleLayout => {}
        }
    }

    /// Re-enters `from` after a pause, re-issuing its entry work.
    fn resume_into(&mut self, from: SessionState, now: Instant, effects: &mut Vec<Effect>) {
        self.capture_errors = 0;
        self.lost_ticks = 0;
        match from {
            // Indicator data is stale after a pause
            SessionState::Reeling | SessionState::Casting => {
                effects.push(Effect::ResetController);
                self.transition(SessionState::Casting, now, effects);
                effects.push(Effect::Cast);
            }
            SessionState::Selling => {
                self.transition(SessionState::Selling, now, effects);
                effects.push(Effect::Sell {
                    purchase: self.purchasing,
                });
            }
            SessionState::Recovering => {
                self.transition(SessionState::Recovering, now, effects);
                effects.push(Effect::RunRecovery {
                    attempt: self.recovery_failures + 1,
                });
            }
            other => self.transition(other, now, effects),
        }
    }

    fn on_tick(&mut self, now: Instant, effects: &mut Vec<Effect>) {
        let elapsed = now.saturating_duration_since(self.entered_at);
        match self.state {
            SessionState::Idle => {
                if self.started && elapsed >= self.config.recast_delay {
                    self.begin_cast(now, effects);
                }
            }
            SessionState::Casting => {
                if elapsed < self.config.cast_timeout {
                    return;
                }
                if self.recasts < self.config.max_recasts {
                    self.recasts += 1;
                    self.stats.recasts += 1;
                    log::info!(
                        "No bite within {:?}, recasting ({}/{})",
                        self.config.cast_timeout,
                        self.recasts,
                        self.config.max_recasts
                    );
                    effects.push(Effect::ReleaseInput);
                    self.transition(SessionState::Idle, now, effects);
                } else {
                    log::warn!("Bar never appeared after {} recast(s)", self.recasts);
                    self.begin_recovery(RecoveryReason::CastExhausted, now, effects);
                }
            }
            SessionState::Reeling => {
                if elapsed >= self.config.episode_timeout {
                    log::warn!("Reeling exceeded {:?}, treating as failure", self.config.episode_timeout);
                    self.begin_recovery(RecoveryReason::EpisodeTimeout, now, effects);
                }
            }
            SessionState::Selling => {
                if elapsed >= self.config.sell_timeout {
                    log::warn!("Selling exceeded {:?}", self.config.sell_timeout);
                    self.begin_recovery(RecoveryReason::SellTimeout, now, effects);
                }
            }
            SessionState::Recovering => {
                if elapsed >= self.config.recovery_timeout {
                    log::warn!("Recovery attempt timed out");
                    self.on_recovery_verified(false, now, effects);
                }
            }
            SessionState::Paused | SessionState::Stopped => {}
        }
    }

    fn on_observed(
        &mut self,
        sample: &IndicatorSample,
        decision: Option<ControlDecision>,
        now: Instant,
        effects: &mut Vec<Effect>,
    ) {
        match self.state {
            SessionState::Casting => {
                self.capture_errors = 0;
                if sample.is_valid(self.config.confidence_threshold) {
                    log::info!("Bar appeared, reeling");
                    self.recasts = 0;
                    self.lost_ticks = 0;
                    effects.push(Effect::ReleaseInput);
                    effects.push(Effect::ResetController);
                    self.transition(SessionState::Reeling, now, effects);
                }
            }
            SessionState::Reeling => {
                self.capture_errors = 0;
                match sample.reading {
                    Reading::NotFound => {
                        self.lost_ticks += 1;
                        if self.lost_ticks >= self.config.loss_confirm_ticks {
                            self.land_catch(now, effects);
                            return;
                        }
                    }
                    Reading::Found { .. } => self.lost_ticks = 0,
                    Reading::ZoneUnknown => {}
                }
                if let Some(decision) = decision {
                    effects.push(Effect::Apply(decision));
                }
            }
            _ => {}
        }
    }

    fn on_capture_failed(&mut self, now: Instant, effects: &mut Vec<Effect>) {
        if !matches!(self.state, SessionState::Casting | SessionState::Reeling) {
            return;
        }
        self.capture_errors += 1;
        if self.capture_errors >= self.config.capture_error_limit {
            log::warn!("{} consecutive capture failures", self.capture_errors);
            self.begin_recovery(RecoveryReason::CaptureErrors, now, effects);
        }
    }

    fn on_sequence_finished(&mut self, kind: SequenceKind, now: Instant, effects: &mut Vec<Effect>) {
        match (self.state, kind) {
            (SessionState::Selling, SequenceKind::Sell) => {
                if self.purchasing {
                    self.stats.sells += 1;
                    self.purchasing = false;
                    log::info!("Purchased {} item(s)", self.config.purchase_amount);
                    effects.push(Effect::Notify(
                        NotifierKind::StateChanged,
                        json!({
                            "purchase": {
                                "amount": self.config.purchase_amount,
                                "sells": self.stats.sells,
                            }
                        }),
                    ));
                }
                self.transition(SessionState::Idle, now, effects);
            }
            (SessionState::Recovering, SequenceKind::Recovery) => {
                effects.push(Effect::VerifyRecovery);
            }
            _ => {}
        }
    }

    fn on_recovery_verified(&mut self, ok: bool, now: Instant, effects: &mut Vec<Effect>) {
        if self.state != SessionState::Recovering {
            return;
        }
        if ok {
            log::info!("Recovery verified");
            self.recovery_failures = 0;
            self.capture_errors = 0;
            self.recasts = 0;
            self.transition(SessionState::Idle, now, effects);
            return;
        }

        self.recovery_failures += 1;
        if self.recovery_failures >= self.config.recovery_max_retries {
            let attempts = self.recovery_failures;
            self.fail(SessionError::RecoveryExhausted { attempts }, now, effects);
            return;
        }
        log::warn!(
            "Recovery verification failed ({}/{}), retrying",
            self.recovery_failures,
            self.config.recovery_max_retries
        );
        self.entered_at = now;
        effects.push(Effect::ReleaseInput);
        effects.push(Effect::RunRecovery {
            attempt: self.recovery_failures + 1,
        });
    }

    fn on_reward(&mut self, reward: RewardEvent, effects: &mut Vec<Effect>) {
        match reward.classified_tier {
            Some(tier) => {
                self.stats.drops += 1;
                log::info!("Drop detected: {} ({:?})", tier, reward.recognized_text);
                effects.push(Effect::Notify(
                    NotifierKind::DropDetected,
                    json!({
                        "tier": tier.to_string(),
                        "text": reward.recognized_text,
                        "drops": self.stats.drops,
                    }),
                ));
            }
            None => log::info!("Unclassified reward text: {:?}", reward.recognized_text),
        }
    }

    fn begin_cast(&mut self, now: Instant, effects: &mut Vec<Effect>) {
        self.stats.casts += 1;
        self.capture_errors = 0;
        effects.push(Effect::ResetController);
        self.transition(SessionState::Casting, now, effects);
        effects.push(Effect::Cast);
    }

    fn land_catch(&mut self, now: Instant, effects: &mut Vec<Effect>) {
        self.stats.catches += 1;
        self.catches_since_sell += 1;
        self.purchasing =
            self.config.sell_every > 0 && self.catches_since_sell >= self.config.sell_every;
        if self.purchasing {
            self.catches_since_sell = 0;
        }
        log::info!("Catch #{} landed", self.stats.catches);

        effects.push(Effect::ReleaseInput);
        effects.push(Effect::ResetController);
        self.transition(SessionState::Selling, now, effects);
        effects.push(Effect::ScanDrops);
        effects.push(Effect::Sell {
            purchase: self.purchasing,
        });

        let every = self.config.notify_every_catches;
        if every > 0 && self.stats.catches % every == 0 {
            effects.push(Effect::Notify(
                NotifierKind::StateChanged,
                json!({
                    "progress": {
                        "casts": self.stats.casts,
                        "catches": self.stats.catches,
                        "drops": self.stats.drops,
                        "uptime": format_uptime(self.stats.uptime(now)),
                    }
                }),
            ));
        }
    }

    /// Every route into recovery counts as one error.
    fn begin_recovery(&mut self, reason: RecoveryReason, now: Instant, effects: &mut Vec<Effect>) {
        let stuck_state = self.state;
        let stuck_for = now.saturating_duration_since(self.entered_at);
        self.stats.recoveries += 1;
        self.stats.errors += 1;
        self.recovery_failures = 0;
        self.capture_errors = 0;
        self.purchasing = false;
        log::warn!(
            "Recovery #{} ({}): stuck in {} for {:?}",
            self.stats.recoveries,
            reason,
            stuck_state,
            stuck_for
        );
        effects.push(Effect::ReleaseInput);
        effects.push(Effect::ResetController);
        self.transition(SessionState::Recovering, now, effects);
        effects.push(Effect::RunRecovery { attempt: 1 });
        effects.push(Effect::Notify(
            NotifierKind::StateChanged,
            json!({
                "recovery": {
                    "reason": reason.as_str(),
                    "stuck_state": stuck_state.to_string(),
                    "stuck_duration_ms": stuck_for.as_millis() as u64,
                    "recovery_number": self.stats.recoveries,
                }
            }),
        ));
    }

    fn fail(&mut self, error: SessionError, now: Instant, effects: &mut Vec<Effect>) {
        log::error!("Session stopped: {}", error);
        self.stats.errors += 1;
        self.stats.stop_clock(now);
        effects.push(Effect::ReleaseInput);
        effects.push(Effect::Notify(
            NotifierKind::SessionError,
            json!({ "error": error.to_string(), "state": self.state.to_string() }),
        ));
        self.error = Some(error);
        self.transition(SessionState::Stopped, now, effects);
    }

    fn transition(&mut self, to: SessionState, now: Instant, effects: &mut Vec<Effect>) {
        let from = self.state;
        self.state = to;
        self.entered_at = now;
        if from != to {
            log::debug!("State: {} -> {}", from, to);
            effects.push(Effect::Notify(
                NotifierKind::StateChanged,
                json!({ "from": from.to_string(), "to": to.to_string() }),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::controller::Action;
    use crate::automation::detection::TargetZone;
    use crate::ocr::{RewardEvent, RewardTier};

    const TICK: Duration = Duration::from_millis(50);

    fn found(at: Instant) -> IndicatorSample {
        IndicatorSample {
            reading: Reading::Found {
                position: 0.5,
                zone: TargetZone { low: 0.4, high: 0.6 },
            },
            confidence: 1.0,
            timestamp: at,
            bar: None,
        }
    }

    fn hold() -> Option<ControlDecision> {
        Some(ControlDecision {
            action: Action::Hold,
            intensity: 1.0,
        })
    }

    fn has(effects: &[Effect], wanted: &Effect) -> bool {
        effects.iter().any(|e| e == wanted)
    }

    /// Machine that has just entered Reeling at `start`. With purchasing on,
    /// the start-up purchase finishes and the cast goes out at `start` too.
    fn reeling(config: MachineConfig, start: Instant) -> SessionMachine {
        let mut machine = SessionMachine::new(config, start);
        machine.handle(Event::Command(Command::Start), start);
        if machine.state() == SessionState::Selling {
            machine.handle(Event::SequenceFinished(SequenceKind::Sell), start);
            machine.handle(Event::Tick, start);
        }
        machine.handle(
            Event::Observed {
                sample: found(start),
                decision: None,
            },
            start,
        );
        assert_eq!(machine.state(), SessionState::Reeling);
        machine
    }

    fn recovering(config: MachineConfig, start: Instant) -> SessionMachine {
        let mut machine = reeling(config, start);
        let effects = machine.handle(Event::Tick, start + Duration::from_secs(3600));
        assert!(has(&effects, &Effect::RunRecovery { attempt: 1 }));
        assert_eq!(machine.state(), SessionState::Recovering);
        machine
    }

    #[test]
    fn test_start_casts() {
        let now = Instant::now();
        let mut machine = SessionMachine::new(MachineConfig::default(), now);
        assert_eq!(machine.toggle_command(), Some(Command::Start));

        let effects = machine.handle(Event::Command(Command::Start), now);

        assert_eq!(machine.state(), SessionState::Casting);
        assert!(has(&effects, &Effect::Cast));
        assert_eq!(machine.stats().casts, 1);
    }

    #[test]
    fn test_idle_before_start_ignores_ticks() {
        let now = Instant::now();
        let mut machine = SessionMachine::new(MachineConfig::default(), now);
        let effects = machine.handle(Event::Tick, now + Duration::from_secs(60));
        assert!(effects.is_empty());
        assert_eq!(machine.state(), SessionState::Idle);
    }

    #[test]
    fn test_valid_indicator_starts_reeling_with_fresh_controller() {
        let now = Instant::now();
        let mut machine = SessionMachine::new(MachineConfig::default(), now);
        machine.handle(Event::Command(Command::Start), now);

        let mut weak = found(now);
        weak.confidence = 0.1;
        machine.handle(
            Event::Observed {
                sample: weak,
                decision: None,
            },
            now,
        );
        assert_eq!(machine.state(), SessionState::Casting);

        let effects = machine.handle(
            Event::Observed {
                sample: found(now),
                decision: None,
            },
            now,
        );
        assert_eq!(machine.state(), SessionState::Reeling);
        assert!(has(&effects, &Effect::ResetController));
    }

    #[test]
    fn test_reeling_applies_controller_decisions() {
        let now = Instant::now();
        let mut machine = reeling(MachineConfig::default(), now);
        let effects = machine.handle(
            Event::Observed {
                sample: found(now + TICK),
                decision: hold(),
            },
            now + TICK,
        );
        assert_eq!(effects, vec![Effect::Apply(hold().unwrap())]);
    }

    #[test]
    fn test_bar_disappearing_lands_catch() {
        let now = Instant::now();
        let config = MachineConfig {
            loss_confirm_ticks: 3,
            ..MachineConfig::default()
        };
        let mut machine = reeling(config, now);

        for i in 1..3 {
            let at = now + TICK * i;
            machine.handle(
                Event::Observed {
                    sample: IndicatorSample::not_found(at, None),
                    decision: None,
                },
                at,
            );
            assert_eq!(machine.state(), SessionState::Reeling);
        }
        let at = now + TICK * 3;
        let effects = machine.handle(
            Event::Observed {
                sample: IndicatorSample::not_found(at, None),
                decision: None,
            },
            at,
        );

        assert_eq!(machine.state(), SessionState::Selling);
        assert_eq!(effects[0], Effect::ReleaseInput);
        assert!(has(&effects, &Effect::ScanDrops));
        assert!(has(&effects, &Effect::Sell { purchase: false }));
        assert_eq!(machine.stats().catches, 1);

        machine.handle(Event::SequenceFinished(SequenceKind::Sell), at + TICK);
        assert_eq!(machine.state(), SessionState::Idle);
        assert_eq!(machine.stats().sells, 0);
    }

    #[test]
    fn test_single_lost_sample_does_not_end_episode() {
        let now = Instant::now();
        let mut machine = reeling(MachineConfig::default(), now);

        machine.handle(
            Event::Observed {
                sample: IndicatorSample::not_found(now + TICK, None),
                decision: None,
            },
            now + TICK,
        );
        machine.handle(
            Event::Observed {
                sample: found(now + TICK * 2),
                decision: None,
            },
            now + TICK * 2,
        );
        for i in 3..5 {
            machine.handle(
                Event::Observed {
                    sample: IndicatorSample::not_found(now + TICK * i, None),
                    decision: None,
                },
                now + TICK * i,
            );
        }
        assert_eq!(machine.state(), SessionState::Reeling);
    }

    #[test]
    fn test_purchase_every_n_catches() {
        let now = Instant::now();
        let config = MachineConfig {
            sell_every: 2,
            loss_confirm_ticks: 1,
            recast_delay: Duration::ZERO,
            ..MachineConfig::default()
        };
        let mut machine = reeling(config, now);
        let mut purchases = Vec::new();

        for round in 0..4u32 {
            let at = now + Duration::from_secs(round as u64 + 1);
            let effects = machine.handle(
                Event::Observed {
                    sample: IndicatorSample::not_found(at, None),
                    decision: None,
                },
                at,
            );
            purchases.push(has(&effects, &Effect::Sell { purchase: true }));
            machine.handle(Event::SequenceFinished(SequenceKind::Sell), at);
            machine.handle(Event::Tick, at);
            machine.handle(
                Event::Observed {
                    sample: found(at),
                    decision: None,
                },
                at,
            );
        }

        assert_eq!(purchases, vec![false, true, false, true]);
        // Two from catches plus the one at start
        assert_eq!(machine.stats().sells, 3);
    }

    #[test]
    fn test_start_purchases_before_first_cast() {
        let now = Instant::now();
        let config = MachineConfig {
            sell_every: 3,
            purchase_amount: 40,
            recast_delay: Duration::ZERO,
            ..MachineConfig::default()
        };
        let mut machine = SessionMachine::new(config, now);

        let effects = machine.handle(Event::Command(Command::Start), now);
        assert_eq!(machine.state(), SessionState::Selling);
        assert!(has(&effects, &Effect::Purchase));
        assert!(!has(&effects, &Effect::Cast));
        assert_eq!(machine.stats().casts, 0);

        let effects = machine.handle(Event::SequenceFinished(SequenceKind::Sell), now + TICK);
        assert_eq!(machine.state(), SessionState::Idle);
        assert_eq!(machine.stats().sells, 1);
        let purchase = effects.iter().find_map(|e| match e {
            Effect::Notify(NotifierKind::StateChanged, payload) => payload.get("purchase"),
            _ => None,
        });
        assert_eq!(purchase.and_then(|p| p["amount"].as_u64()), Some(40));

        let effects = machine.handle(Event::Tick, now + TICK);
        assert_eq!(machine.state(), SessionState::Casting);
        assert!(has(&effects, &Effect::Cast));
    }

    #[test]
    fn test_start_without_purchasing_casts_immediately() {
        let now = Instant::now();
        let mut machine = SessionMachine::new(MachineConfig::default(), now);
        let effects = machine.handle(Event::Command(Command::Start), now);
        assert!(!has(&effects, &Effect::Purchase));
        assert!(has(&effects, &Effect::Cast));
    }

    fn recovery_payload(effects: &[Effect]) -> Option<serde_json::Value> {
        effects.iter().find_map(|e| match e {
            Effect::Notify(NotifierKind::StateChanged, payload) => payload.get("recovery").cloned(),
            _ => None,
        })
    }

    #[test]
    fn test_recovery_notification_names_reason_and_stuck_state() {
        let now = Instant::now();
        let config = MachineConfig {
            episode_timeout: Duration::from_secs(50),
            ..MachineConfig::default()
        };
        let mut machine = reeling(config, now);

        let effects = machine.handle(Event::Tick, now + Duration::from_secs(50));
        let payload = recovery_payload(&effects).unwrap();
        assert_eq!(payload["reason"], "episode_timeout");
        assert_eq!(payload["stuck_state"], "Reeling");
        assert_eq!(payload["stuck_duration_ms"], 50_000);
        assert_eq!(payload["recovery_number"], 1);
    }

    #[test]
    fn test_every_recovery_route_counts_one_error() {
        let now = Instant::now();
        let late = now + Duration::from_secs(3600);

        // Episode timeout
        let mut machine = reeling(MachineConfig::default(), now);
        machine.handle(Event::Tick, late);
        assert_eq!(machine.stats().errors, 1);

        // Capture errors
        let config = MachineConfig {
            capture_error_limit: 2,
            ..MachineConfig::default()
        };
        let mut machine = reeling(config, now);
        machine.handle(Event::CaptureFailed, now);
        let effects = machine.handle(Event::CaptureFailed, now);
        assert_eq!(recovery_payload(&effects).unwrap()["reason"], "capture_errors");
        assert_eq!(machine.stats().errors, 1);

        // Cast exhaustion
        let config = MachineConfig {
            max_recasts: 0,
            ..MachineConfig::default()
        };
        let mut machine = SessionMachine::new(config, now);
        machine.handle(Event::Command(Command::Start), now);
        let effects = machine.handle(Event::Tick, late);
        assert_eq!(machine.state(), SessionState::Recovering);
        assert_eq!(recovery_payload(&effects).unwrap()["reason"], "cast_exhausted");
        assert_eq!(machine.stats().errors, 1);

        // Sell timeout
        let config = MachineConfig {
            loss_confirm_ticks: 1,
            ..MachineConfig::default()
        };
        let mut machine = reeling(config, now);
        machine.handle(
            Event::Observed {
                sample: IndicatorSample::not_found(now, None),
                decision: None,
            },
            now,
        );
        assert_eq!(machine.state(), SessionState::Selling);
        let effects = machine.handle(Event::Tick, late);
        assert_eq!(recovery_payload(&effects).unwrap()["stuck_state"], "Selling");
        assert_eq!(machine.stats().errors, 1);
        assert_eq!(machine.stats().recoveries, 1);
    }

    #[test]
    fn test_episode_timeout_routes_to_recovering() {
        let now = Instant::now();
        let config = MachineConfig {
            episode_timeout: Duration::from_secs(50),
            ..MachineConfig::default()
        };
        let mut machine = reeling(config, now);

        machine.handle(Event::Tick, now + Duration::from_secs(49));
        assert_eq!(machine.state(), SessionState::Reeling);

        let effects = machine.handle(Event::Tick, now + Duration::from_secs(50));
        assert_eq!(machine.state(), SessionState::Recovering);
        assert_eq!(effects[0], Effect::ReleaseInput);
        assert_eq!(machine.stats().catches, 0);
    }

    #[test]
    fn test_cast_timeout_recasts_then_recovers() {
        let now = Instant::now();
        let config = MachineConfig {
            cast_timeout: Duration::from_secs(15),
            max_recasts: 2,
            recast_delay: Duration::ZERO,
            ..MachineConfig::default()
        };
        let mut machine = SessionMachine::new(config, now);
        machine.handle(Event::Command(Command::Start), now);

        let mut at = now;
        for _ in 0..2 {
            at += Duration::from_secs(15);
            machine.handle(Event::Tick, at);
            assert_eq!(machine.state(), SessionState::Idle);
            machine.handle(Event::Tick, at);
            assert_eq!(machine.state(), SessionState::Casting);
        }
        at += Duration::from_secs(15);
        machine.handle(Event::Tick, at);

        assert_eq!(machine.state(), SessionState::Recovering);
        assert_eq!(machine.stats().recasts, 2);
        assert_eq!(machine.stats().casts, 3);
    }

    #[test]
    fn test_ten_capture_errors_while_reeling_trigger_recovery() {
        let now = Instant::now();
        let config = MachineConfig {
            capture_error_limit: 10,
            ..MachineConfig::default()
        };
        let mut machine = reeling(config, now);

        let mut entered_recovery_at = None;
        for tick in 1..=10u32 {
            machine.handle(Event::CaptureFailed, now + TICK * tick);
            if machine.state() == SessionState::Recovering && entered_recovery_at.is_none() {
                entered_recovery_at = Some(tick);
            }
        }
        assert_eq!(entered_recovery_at, Some(10));
    }

    #[test]
    fn test_capture_error_streak_is_reset_by_a_good_frame() {
        let now = Instant::now();
        let config = MachineConfig {
            capture_error_limit: 3,
            ..MachineConfig::default()
        };
        let mut machine = reeling(config, now);

        machine.handle(Event::CaptureFailed, now);
        machine.handle(Event::CaptureFailed, now);
        machine.handle(
            Event::Observed {
                sample: found(now),
                decision: None,
            },
            now,
        );
        machine.handle(Event::CaptureFailed, now);
        machine.handle(Event::CaptureFailed, now);
        assert_eq!(machine.state(), SessionState::Reeling);
    }

    #[test]
    fn test_recovery_success_returns_to_idle() {
        let now = Instant::now();
        let mut machine = recovering(MachineConfig::default(), now);
        let at = now + Duration::from_secs(3601);

        let effects = machine.handle(Event::SequenceFinished(SequenceKind::Recovery), at);
        assert_eq!(effects, vec![Effect::VerifyRecovery]);

        machine.handle(Event::RecoveryVerified(true), at);
        assert_eq!(machine.state(), SessionState::Idle);
    }

    #[test]
    fn test_recovery_stops_after_exactly_max_retries() {
        for max in 1..=4u32 {
            let now = Instant::now();
            let config = MachineConfig {
                recovery_max_retries: max,
                ..MachineConfig::default()
            };
            let mut machine = recovering(config, now);
            let at = now + Duration::from_secs(3601);

            for failure in 1..=max {
                assert_eq!(machine.state(), SessionState::Recovering, "failure {}", failure);
                machine.handle(Event::SequenceFinished(SequenceKind::Recovery), at);
                let effects = machine.handle(Event::RecoveryVerified(false), at);
                if failure < max {
                    assert!(has(&effects, &Effect::RunRecovery { attempt: failure + 1 }));
                }
            }

            assert_eq!(machine.state(), SessionState::Stopped);
            assert_eq!(
                machine.error(),
                Some(&SessionError::RecoveryExhausted { attempts: max })
            );
        }
    }

    #[test]
    fn test_recovery_exhaustion_notifies_session_error() {
        let now = Instant::now();
        let config = MachineConfig {
            recovery_max_retries: 1,
            ..MachineConfig::default()
        };
        let mut machine = recovering(config, now);
        let effects = machine.handle(Event::RecoveryVerified(false), now);

        assert_eq!(effects[0], Effect::ReleaseInput);
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Notify(NotifierKind::SessionError, _))));
    }

    #[test]
    fn test_recovery_timeout_counts_as_failure() {
        let now = Instant::now();
        let config = MachineConfig {
            recovery_max_retries: 2,
            recovery_timeout: Duration::from_secs(30),
            ..MachineConfig::default()
        };
        let mut machine = recovering(config, now);
        let entered = now + Duration::from_secs(3600);

        machine.handle(Event::Tick, entered + Duration::from_secs(30));
        assert_eq!(machine.state(), SessionState::Recovering);
        machine.handle(Event::Tick, entered + Duration::from_secs(60));
        assert_eq!(machine.state(), SessionState::Stopped);
    }

    #[test]
    fn test_pause_resume_from_reeling_recasts() {
        let now = Instant::now();
        let mut machine = reeling(MachineConfig::default(), now);

        let effects = machine.handle(Event::Command(Command::Pause), now + TICK);
        assert_eq!(machine.state(), SessionState::Paused);
        assert_eq!(effects[0], Effect::ReleaseInput);
        assert_eq!(machine.toggle_command(), Some(Command::Resume));

        // Events while paused are ignored
        let effects = machine.handle(
            Event::Observed {
                sample: found(now),
                decision: hold(),
            },
            now + TICK * 2,
        );
        assert!(effects.is_empty());

        let effects = machine.handle(Event::Command(Command::Resume), now + Duration::from_secs(600));
        assert_eq!(machine.state(), SessionState::Casting);
        assert!(has(&effects, &Effect::Cast));
        assert!(has(&effects, &Effect::ResetController));
    }

    #[test]
    fn test_pause_resume_preserves_other_states() {
        let now = Instant::now();
        let mut machine = recovering(MachineConfig::default(), now);

        machine.handle(Event::Command(Command::Pause), now);
        let effects = machine.handle(Event::Command(Command::Resume), now);

        assert_eq!(machine.state(), SessionState::Recovering);
        assert!(has(&effects, &Effect::RunRecovery { attempt: 1 }));
    }

    #[test]
    fn test_resume_resets_state_timer() {
        let now = Instant::now();
        let config = MachineConfig {
            episode_timeout: Duration::from_secs(50),
            cast_timeout: Duration::from_secs(15),
            ..MachineConfig::default()
        };
        let mut machine = reeling(config, now);
        machine.handle(Event::Command(Command::Pause), now);
        machine.handle(Event::Command(Command::Resume), now + Duration::from_secs(100));

        machine.handle(Event::Tick, now + Duration::from_secs(110));
        assert_eq!(machine.state(), SessionState::Casting);
    }

    #[test]
    fn test_uptime_excludes_pause() {
        let now = Instant::now();
        let mut machine = SessionMachine::new(MachineConfig::default(), now);
        machine.handle(Event::Command(Command::Start), now);
        machine.handle(Event::Command(Command::Pause), now + Duration::from_secs(10));
        machine.handle(Event::Command(Command::Resume), now + Duration::from_secs(70));

        assert_eq!(
            machine.stats().uptime(now + Duration::from_secs(80)),
            Duration::from_secs(20)
        );
    }

    #[test]
    fn test_stop_is_terminal() {
        let now = Instant::now();
        let mut machine = reeling(MachineConfig::default(), now);

        let effects = machine.handle(Event::Command(Command::Stop), now);
        assert_eq!(effects[0], Effect::ReleaseInput);
        assert_eq!(machine.state(), SessionState::Stopped);
        assert_eq!(machine.toggle_command(), None);

        for event in [
            Event::Command(Command::Start),
            Event::Command(Command::Resume),
            Event::Tick,
            Event::CaptureFailed,
        ] {
            assert!(machine.handle(event, now).is_empty());
            assert_eq!(machine.state(), SessionState::Stopped);
        }
    }

    #[test]
    fn test_actuator_fault_stops_session() {
        let now = Instant::now();
        let mut machine = reeling(MachineConfig::default(), now);

        let effects = machine.handle(
            Event::ActuatorFault(ActuatorFault("SendInput blocked".to_string())),
            now,
        );

        assert_eq!(machine.state(), SessionState::Stopped);
        assert_eq!(effects[0], Effect::ReleaseInput);
        assert!(matches!(machine.error(), Some(SessionError::Actuator(_))));
    }

    #[test]
    fn test_toggle_layout_never_changes_state() {
        let now = Instant::now();
        let mut machine = reeling(MachineConfig::default(), now);
        let effects = machine.handle(Event::Command(Command::ToggleLayout), now);
        assert!(effects.is_empty());
        assert_eq!(machine.state(), SessionState::Reeling);
    }

    #[test]
    fn test_classified_reward_notifies_drop() {
        let now = Instant::now();
        let mut machine = reeling(MachineConfig::default(), now);

        let effects = machine.handle(
            Event::Reward(RewardEvent::new(
                "Legendary Fish".to_string(),
                Some(RewardTier::Legendary),
            )),
            now,
        );
        assert!(matches!(
            effects.as_slice(),
            [Effect::Notify(NotifierKind::DropDetected, _)]
        ));
        assert_eq!(machine.stats().drops, 1);

        let effects = machine.handle(
            Event::Reward(RewardEvent::new("Old Boot".to_string(), None)),
            now,
        );
        assert!(effects.is_empty());
        assert_eq!(machine.state(), SessionState::Reeling);
    }
}
