//! Session counters and the running-time clock.

use std::time::{Duration, Instant};

/// Counters updated by the state machine on transitions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStats {
    pub casts: u32,
    pub catches: u32,
    /// Casts retried because no bar appeared in time
    pub recasts: u32,
    /// Classified reward notifications
    pub drops: u32,
    /// Completed auto-purchase runs
    pub sells: u32,
    pub errors: u32,
    pub recoveries: u32,
    active: Duration,
    running_since: Option<Instant>,
}

impl SessionStats {
    /// Starts (or resumes) the uptime clock.
    pub fn start_clock(&mut self, now: Instant) {
        if self.running_since.is_none() {
            self.running_since = Some(now);
        }
    }

    /// Stops the uptime clock, keeping the time accumulated so far.
    pub fn stop_clock(&mut self, now: Instant) {
        if let Some(since) = self.running_since.take() {
            self.active += now.saturating_duration_since(since);
        }
    }

    /// Time spent running, excluding pauses.
    pub fn uptime(&self, now: Instant) -> Duration {
        let current = self
            .running_since
            .map(|since| now.saturating_duration_since(since))
            .unwrap_or_default();
        self.active + current
    }
}

/// Formats a duration as `H:MM:SS`.
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uptime_excludes_paused_time() {
        let start = Instant::now();
        let mut stats = SessionStats::default();

        stats.start_clock(start);
        stats.stop_clock(start + Duration::from_secs(10));
        assert_eq!(stats.uptime(start + Duration::from_secs(100)), Duration::from_secs(10));

        stats.start_clock(start + Duration::from_secs(100));
        assert_eq!(stats.uptime(start + Duration::from_secs(105)), Duration::from_secs(15));
    }

    #[test]
    fn test_start_clock_twice_keeps_first_start() {
        let start = Instant::now();
        let mut stats = SessionStats::default();
        stats.start_clock(start);
        stats.start_clock(start + Duration::from_secs(5));
        assert_eq!(stats.uptime(start + Duration::from_secs(6)), Duration::from_secs(6));
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::from_secs(3725)), "1:02:05");
        assert_eq!(format_uptime(Duration::ZERO), "0:00:00");
    }
}
