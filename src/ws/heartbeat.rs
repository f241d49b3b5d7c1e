//! Application-level liveness probing.
//!
//! Some transports never report a half-open connection as an error. The monitor sends
//! a `ping` envelope every interval and counts probes left unanswered when the next one
//! is due; once `missed_limit` probes in a row go unanswered the connection is declared
//! dead and the connection loop treats it like an abnormal closure.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

/// What the connection loop must do after a heartbeat tick.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Write a `ping` probe
    SendPing,
    /// Too many consecutive probes went unanswered; force-close the transport
    Expired {
        /// Consecutive unanswered probes
        missed: u32,
    },
}

/// Per-connection heartbeat state. Created on entering `Connected`, dropped on exit.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    interval: Duration,
    missed_limit: u32,
    awaiting_pong: bool,
    missed: u32,
    last_ping: Option<Instant>,
    last_pong: Option<Instant>,
}

impl HeartbeatMonitor {
    /// A `missed_limit` of zero is treated as one.
    #[must_use]
    pub fn new(interval: Duration, missed_limit: u32) -> Self {
        Self {
            interval,
            missed_limit: missed_limit.max(1),
            awaiting_pong: false,
            missed: 0,
            last_ping: None,
            last_pong: None,
        }
    }

    /// Tick source whose first tick fires one full interval after the connection opened.
    #[must_use]
    pub fn ticker(&self) -> Interval {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    /// Advance one interval.
    pub fn on_tick(&mut self) -> HeartbeatAction {
        if self.awaiting_pong {
            self.missed = self.missed.saturating_add(1);
            if self.missed >= self.missed_limit {
                return HeartbeatAction::Expired {
                    missed: self.missed,
                };
            }
        }

        self.awaiting_pong = true;
        self.last_ping = Some(Instant::now());
        HeartbeatAction::SendPing
    }

    /// Record an acknowledgment. Clears the outstanding probe and the miss streak.
    pub fn on_pong(&mut self) {
        self.awaiting_pong = false;
        self.missed = 0;
        self.last_pong = Some(Instant::now());
    }

    /// Consecutive unanswered probes so far.
    #[must_use]
    pub fn missed(&self) -> u32 {
        self.missed
    }

    #[must_use]
    pub fn last_pong(&self) -> Option<Instant> {
        self.last_pong
    }

    /// Latency of the most recent probe, when its acknowledgment has arrived.
    #[must_use]
    pub fn round_trip(&self) -> Option<Duration> {
        match (self.last_ping, self.last_pong) {
            (Some(ping), Some(pong)) if pong >= ping => Some(pong - ping),
            _ => None,
        }
    }
}
