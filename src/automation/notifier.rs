//! Structured events for out-of-band delivery.
//!
//! The session only produces `NotifierEvent`s; where they end up (a log, a
//! webhook, a tray balloon) is up to the `Notifier` implementation.

use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NotifierKind {
    DropDetected,
    SessionError,
    StateChanged,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotifierEvent {
    pub kind: NotifierKind,
    pub payload: Value,
    pub timestamp: DateTime<Local>,
}

impl NotifierEvent {
    /// Stamps an event with the current local time.
    pub fn new(kind: NotifierKind, payload: Value) -> Self {
        Self {
            kind,
            payload,
            timestamp: Local::now(),
        }
    }
}

pub trait Notifier {
    fn notify(&mut self, event: &NotifierEvent);
}

/// Writes each event to the log as one JSON line.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&mut self, event: &NotifierEvent) {
        let line = serde_json::to_string(event)
            .unwrap_or_else(|e| format!("{:?} (unserialisable: {})", event, e));
        match event.kind {
            NotifierKind::SessionError => log::error!("[notify] {}", line),
            NotifierKind::DropDetected => log::info!("[notify] {}", line),
            NotifierKind::StateChanged => log::debug!("[notify] {}", line),
        }
    }
}
