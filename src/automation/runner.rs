//! Control loop runner.
//!
//! `ControlLoop` owns every per-session component (frame source, locator
//! hint, controller, actuator, state machine, notifier) and executes one
//! fixed-period tick at a time: drain recognizer results, check timeouts,
//! advance the running input sequence, then capture → locate → control.
//! `spawn_session` runs it on its own thread and hands back a command
//! channel plus a shared status snapshot.

use anyhow::Result;
use std::collections::VecDeque;
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::automation::config::FishingConfig;
use crate::automation::controller::PdController;
use crate::automation::detection::{locate, IndicatorSample, LocatorSettings};
use crate::automation::input::{Actuator, ActuatorFault, InputBackend, MouseButton};
use crate::automation::notifier::{Notifier, NotifierEvent};
use crate::automation::queue::RecognizerLink;
use crate::automation::sequence::{cast_steps, sell_steps, SequenceKind, SequenceRun, Step};
use crate::automation::state::{Command, Effect, Event, SessionMachine, SessionState};
use crate::automation::stats::SessionStats;
use crate::capture::FrameSource;
use crate::ocr::RewardEvent;

/// Which overlay layout a collaborator UI should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayoutMode {
    /// Fishing bar region
    #[default]
    Bar,
    /// Drop notification region
    Drop,
}

impl LayoutMode {
    pub fn toggled(self) -> Self {
        match self {
            LayoutMode::Bar => LayoutMode::Drop,
            LayoutMode::Drop => LayoutMode::Bar,
        }
    }
}

/// Snapshot published after every tick for display.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub stats: SessionStats,
    /// Running time excluding pauses
    pub uptime: Duration,
    pub layout: LayoutMode,
    pub last_reward: Option<RewardEvent>,
    pub error: Option<String>,
    /// What the start/pause hotkey should send next
    pub toggle: Option<Command>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            stats: SessionStats::default(),
            uptime: Duration::ZERO,
            layout: LayoutMode::default(),
            last_reward: None,
            error: None,
            toggle: Some(Command::Start),
        }
    }
}

pub type SharedStatus = Arc<Mutex<SessionStatus>>;

pub struct ControlLoop<S: FrameSource, B: InputBackend, N: Notifier> {
    config: FishingConfig,
    source: S,
    actuator: Actuator<B>,
    notifier: N,
    locator: LocatorSettings,
    controller: PdController,
    machine: SessionMachine,
    /// Last locator result, used as the search hint
    previous: Option<IndicatorSample>,
    sequence: Option<SequenceRun>,
    /// When to hand the drop region to the recognizer
    pending_scan: Option<Instant>,
    recognizer: Option<RecognizerLink>,
    layout: LayoutMode,
    last_reward: Option<RewardEvent>,
    refused: Option<String>,
    status: SharedStatus,
}

impl<S: FrameSource, B: InputBackend, N: Notifier> ControlLoop<S, B, N> {
    pub fn new(
        config: FishingConfig,
        source: S,
        backend: B,
        notifier: N,
        recognizer: Option<RecognizerLink>,
        now: Instant,
    ) -> Self {
        Self {
            locator: config.locator(),
            controller: PdController::new(config.gains()),
            machine: SessionMachine::new(config.machine(), now),
            actuator: Actuator::new(backend, MouseButton::Left),
            config,
            source,
            notifier,
            previous: None,
            sequence: None,
            pending_scan: None,
            recognizer,
            layout: LayoutMode::default(),
            last_reward: None,
            refused: None,
            status: Arc::new(Mutex::new(SessionStatus::default())),
        }
    }

    pub fn status(&self) -> SharedStatus {
        Arc::clone(&self.status)
    }

    pub fn state(&self) -> SessionState {
        self.machine.state()
    }

    pub fn machine(&self) -> &SessionMachine {
        &self.machine
    }

    pub fn actuator(&self) -> &Actuator<B> {
        &self.actuator
    }

    /// Handles an external command. Called at the top of a tick.
    pub fn command(&mut self, command: Command, now: Instant) {
        match command {
            Command::ToggleLayout => {
                self.layout = self.layout.toggled();
                log::info!("Layout switched to {:?}", self.layout);
            }
            Command::Start => match self.config.validate() {
                Ok(()) => {
                    self.refused = None;
                    self.dispatch(Event::Command(command), now);
                }
                Err(e) => {
                    log::error!("Start refused: {}", e);
                    self.refused = Some(e.to_string());
                }
            },
            other => self.dispatch(Event::Command(other), now),
        }
        self.publish(now);
    }

    /// Runs one control tick. Returns false once the session has stopped.
    pub fn tick(&mut self, now: Instant) -> bool {
        let rewards = self
            .recognizer
            .as_ref()
            .map(RecognizerLink::drain)
            .unwrap_or_default();
        for reward in rewards {
            self.last_reward = Some(reward.clone());
            self.dispatch(Event::Reward(reward), now);
        }

        self.dispatch(Event::Tick, now);
        self.advance_sequence(now);
        self.observe(now);
        self.scan_drops(now);
        self.publish(now);

        self.machine.state() != SessionState::Stopped
    }

    /// Releases all input. Called when the loop exits for any reason.
    pub fn shutdown(&mut self, now: Instant) {
        self.sequence = None;
        if let Err(e) = self.actuator.release_all() {
            log::error!("Failed to release input on shutdown: {}", e);
        }
        self.publish(now);
    }

    /// Feeds an event to the machine and carries out the effects, including
    /// any follow-up events they produce.
    fn dispatch(&mut self, event: Event, now: Instant) {
        let mut pending = VecDeque::from([event]);
        while let Some(event) = pending.pop_front() {
            for effect in self.machine.handle(event, now) {
                match self.execute(effect, now) {
                    Ok(Some(next)) => pending.push_back(next),
                    Ok(None) => {}
                    Err(fault) => {
                        pending.push_back(Event::ActuatorFault(fault));
                        break;
                    }
                }
            }
        }
    }

    fn execute(&mut self, effect: Effect, now: Instant) -> Result<Option<Event>, ActuatorFault> {
        match effect {
            Effect::Cast => {
                log::info!("Casting (#{})", self.machine.stats().casts);
                self.start_sequence(
                    SequenceKind::Cast,
                    cast_steps(Duration::from_millis(self.config.cast_hold_ms)),
                );
            }
            Effect::ResetController => self.controller.reset(),
            Effect::Apply(decision) => self.actuator.apply(&decision)?,
            Effect::ReleaseInput => {
                self.sequence = None;
                self.actuator.release_all()?;
            }
            Effect::Sell { purchase } => {
                let wait = Duration::from_millis(self.config.wait_after_catch_ms);
                self.start_sequence(
                    SequenceKind::Sell,
                    sell_steps(wait, &self.config.auto_sell, purchase),
                );
            }
            Effect::Purchase => {
                log::info!("Buying {} item(s)", self.config.auto_sell.amount);
                self.start_sequence(
                    SequenceKind::Sell,
                    sell_steps(Duration::ZERO, &self.config.auto_sell, true),
                );
            }
            Effect::ScanDrops => {
                if self.recognizer.is_some() {
                    self.pending_scan =
                        Some(now + Duration::from_millis(self.config.wait_after_catch_ms));
                }
            }
            Effect::RunRecovery { attempt } => {
                log::info!(
                    "Recovery attempt {}/{}",
                    attempt,
                    self.config.recovery_max_retries
                );
                self.start_sequence(SequenceKind::Recovery, self.config.recovery_steps.clone());
            }
            Effect::VerifyRecovery => {
                let verified = match self.source.capture(&self.config.capture_region) {
                    Ok(frame) => locate(&frame, None, &self.locator).bar.is_none(),
                    Err(e) => {
                        log::warn!("Recovery check capture failed: {}", e);
                        false
                    }
                };
                return Ok(Some(Event::RecoveryVerified(verified)));
            }
            Effect::Notify(kind, payload) => {
                self.notifier.notify(&NotifierEvent::new(kind, payload));
            }
        }
        Ok(None)
    }

    fn start_sequence(&mut self, kind: SequenceKind, steps: Vec<Step>) {
        log::debug!("Starting {:?} sequence ({} steps)", kind, steps.len());
        self.sequence = Some(SequenceRun::new(kind, steps));
    }

    fn advance_sequence(&mut self, now: Instant) {
        let Some(run) = self.sequence.as_mut() else {
            return;
        };
        match run.advance(&mut self.actuator, now) {
            Ok(false) => {}
            Ok(true) => {
                let kind = run.kind();
                self.sequence = None;
                self.dispatch(Event::SequenceFinished(kind), now);
            }
            Err(fault) => {
                self.sequence = None;
                self.dispatch(Event::ActuatorFault(fault), now);
            }
        }
    }

    /// Capture → locate → control, in the states that watch the bar.
    fn observe(&mut self, now: Instant) {
        let state = self.machine.state();
        let watching = match state {
            // Only look for a bite once the cast itself is done
            SessionState::Casting => self.sequence.is_none(),
            SessionState::Reeling => true,
            _ => false,
        };
        if !watching {
            return;
        }

        let frame = match self.source.capture(&self.config.capture_region) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("Capture failed: {}", e);
                self.dispatch(Event::CaptureFailed, now);
                return;
            }
        };

        let sample = locate(&frame, self.previous.as_ref(), &self.locator);
        let decision = if state == SessionState::Reeling {
            let decision = self.controller.tick(&sample);
            log::debug!(
                "{:?} conf={:.2} -> {:?} ({:.3})",
                sample.reading,
                sample.confidence,
                decision.action,
                decision.intensity
            );
            Some(decision)
        } else {
            None
        };
        self.previous = Some(sample);
        self.dispatch(Event::Observed { sample, decision }, now);
    }

    fn scan_drops(&mut self, now: Instant) {
        match self.pending_scan {
            Some(due) if now >= due => self.pending_scan = None,
            _ => return,
        }
        let Some(link) = &self.recognizer else {
            return;
        };
        match self.source.capture(&self.config.drop_region) {
            Ok(frame) => {
                link.submit(frame);
            }
            Err(e) => log::warn!("Drop region capture failed: {}", e),
        }
    }

    fn publish(&self, now: Instant) {
        if let Ok(mut status) = self.status.lock() {
            status.state = self.machine.state();
            status.stats = self.machine.stats().clone();
            status.uptime = self.machine.stats().uptime(now);
            status.layout = self.layout;
            status.last_reward = self.last_reward.clone();
            status.error = self
                .machine
                .error()
                .map(|e| e.to_string())
                .or_else(|| self.refused.clone());
            status.toggle = self.machine.toggle_command();
        }
    }
}

/// Runs the loop on a fixed period until the session stops or the command
/// channel closes.
///
/// Commands are read at the top of each tick, before any input is sent. A
/// tick that overruns its period skips the missed ticks instead of running
/// them late.
pub fn run_session<S, B, N>(mut control: ControlLoop<S, B, N>, commands: Receiver<Command>, period: Duration)
where
    S: FrameSource,
    B: InputBackend,
    N: Notifier,
{
    let period = period.max(Duration::from_millis(1));
    let mut next_tick = Instant::now();

    loop {
        let now = Instant::now();
        loop {
            match commands.try_recv() {
                Ok(command) => control.command(command, now),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    control.command(Command::Stop, now);
                    break;
                }
            }
        }

        if !control.tick(now) {
            break;
        }

        next_tick += period;
        let finished = Instant::now();
        if finished > next_tick {
            let behind = finished - next_tick;
            let skipped = (behind.as_nanos() / period.as_nanos()) as u32 + 1;
            log::debug!("Tick overran by {:?}, skipping {} tick(s)", behind, skipped);
            next_tick += period * skipped;
        }
        thread::sleep(next_tick.saturating_duration_since(Instant::now()));
    }

    control.shutdown(Instant::now());
    log::info!("Session loop finished");
}

/// A running session.
pub struct SessionHandle {
    commands: Sender<Command>,
    status: SharedStatus,
    thread: JoinHandle<()>,
}

impl SessionHandle {
    /// Queues a command. Returns false if the session thread has exited.
    pub fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Copy of the latest published status.
    pub fn status(&self) -> SessionStatus {
        self.status
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Waits for the session thread to exit and returns its final status.
    pub fn join(self) -> SessionStatus {
        drop(self.commands);
        if self.thread.join().is_err() {
            log::error!("Session thread panicked");
        }
        self.status
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

/// Starts the control loop on its own thread.
pub fn spawn_session<S, B, N>(control: ControlLoop<S, B, N>, period: Duration) -> Result<SessionHandle>
where
    S: FrameSource + Send + 'static,
    B: InputBackend + Send + 'static,
    N: Notifier + Send + 'static,
{
    let (commands, receiver) = channel();
    let status = control.status();
    let thread = thread::Builder::new()
        .name("control-loop".to_string())
        .spawn(move || run_session(control, receiver, period))?;
    log::info!("Session thread started (tick period {:?})", period);

    Ok(SessionHandle {
        commands,
        status,
        thread,
    })
}
