//! Client-side friction detection.
//!
//! [`FrictionDetector`] is a pure state machine over [`RawSignal`]s: it owns
//! the four pattern detectors and a logical clock driven by signal
//! timestamps and [`FrictionDetector::expire`]. [`FrictionDispatcher`]
//! enriches fired events and hands them to telemetry and the observer, and
//! [`DetectorHandle`] runs both on a tokio task.

mod dispatch;
mod patterns;
mod runtime;
mod scheduler;

pub use dispatch::{FrictionDispatcher, FrictionObserver, ReadySignal, ReporterHandle};
pub use runtime::{replay_signals, DetectorHandle};
pub use scheduler::DelayedTasks;

pub(crate) use patterns::normalize_message as normalize_error_message;

use tracing::debug;

use crate::config::DetectorConfig;
use crate::events::{FrictionEvent, RawSignal};
use patterns::{BacktrackDetector, DeadClickDetector, ErrorLoopDetector, RageClickDetector};

/// The four pattern detectors behind one signal entry point.
#[derive(Debug)]
pub struct FrictionDetector {
    rage: RageClickDetector,
    dead: DeadClickDetector,
    errors: ErrorLoopDetector,
    backtrack: BacktrackDetector,
}

impl FrictionDetector {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            rage: RageClickDetector::new(config),
            dead: DeadClickDetector::new(config),
            errors: ErrorLoopDetector::new(config),
            backtrack: BacktrackDetector::new(config),
        }
    }

    /// Feed one signal, returning every friction event it fired.
    ///
    /// Dead-click deadlines that passed before the signal's timestamp fire
    /// first, so late delivery never turns a dead click into a cancelled one.
    pub fn handle(&mut self, signal: &RawSignal) -> Vec<FrictionEvent> {
        let mut fired = self.expire(signal.ts().saturating_sub(1));

        match signal {
            RawSignal::Click { ts, x, y, target } => {
                fired.extend(self.rage.on_click(*ts, *x, *y, target.as_ref()));
                self.dead.on_click(*ts, *x, *y, target.as_ref());
            }
            RawSignal::DomActivity { .. } => {
                self.dead.on_activity();
            }
            RawSignal::Navigation { ts, path } => {
                self.dead.on_activity();
                fired.extend(self.backtrack.on_navigation(*ts, path));
            }
            RawSignal::Error { ts, message } | RawSignal::Rejection { ts, message } => {
                fired.extend(self.errors.on_error(*ts, message));
            }
        }

        for event in &fired {
            debug!(trigger = %event.trigger_type, selector = ?event.selector, "Friction fired");
        }
        fired
    }

    /// Fire dead clicks whose deadline is `<= now`.
    pub fn expire(&mut self, now: i64) -> Vec<FrictionEvent> {
        self.dead.expire(now)
    }

    /// Earliest pending dead-click deadline.
    pub fn next_deadline(&self) -> Option<i64> {
        self.dead.next_deadline()
    }

    /// Drop all histories and pending timers.
    pub fn teardown(&mut self) {
        self.rage.clear();
        self.dead.on_activity();
        self.errors.clear();
        self.backtrack.clear();
    }

    /// Total retained history entries and pending timers.
    pub fn retained(&self) -> usize {
        self.rage.len() + self.dead.len() + self.errors.len() + self.backtrack.len()
    }
}
