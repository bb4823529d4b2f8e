//! Fishing automation: locating the bar, steering the indicator, and the
//! session state machine that ties casting, reeling and selling together.
//!
//! This module provides:
//! - Bar and indicator detection on captured frames
//! - PD control of the hold/release input
//! - Input simulation and scripted input sequences
//! - The session state machine and the fixed-period control loop
//! - The recognizer worker that reads drop notifications

pub mod config;
pub mod controller;
pub mod detection;
pub mod input;
pub mod notifier;
pub mod ocr_worker;
pub mod queue;
pub mod runner;
pub mod sequence;
pub mod state;
pub mod stats;

pub use config::{get_config, init_config, FishingConfig};
pub use notifier::LogNotifier;
pub use queue::create_recognizer_queues;
pub use runner::{spawn_session, ControlLoop, SessionHandle};
pub use state::{Command, SessionState};
