//! The four friction pattern detectors.
//!
//! Each detector owns a private time-windowed history and clears it when it
//! fires, so one pattern match produces exactly one event.

use std::collections::VecDeque;

use super::scheduler::DelayedTasks;
use crate::config::DetectorConfig;
use crate::events::{ElementInfo, FrictionEvent, TriggerType};

pub(crate) const RAGE_CLICK_CONFIDENCE: f64 = 0.9;
pub(crate) const DEAD_CLICK_CONFIDENCE: f64 = 0.75;
pub(crate) const ERROR_LOOP_CONFIDENCE: f64 = 0.85;
pub(crate) const BACKTRACK_CONFIDENCE: f64 = 0.8;

const ERROR_SELECTOR_MAX_CHARS: usize = 100;

// ============================================================================
// Rage click
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct ClickPoint {
    x: f64,
    y: f64,
    ts: i64,
}

/// Rapid repeated clicks within a small radius.
#[derive(Debug)]
pub(crate) struct RageClickDetector {
    clicks: VecDeque<ClickPoint>,
    window_ms: i64,
    radius_px: f64,
    threshold: usize,
}

impl RageClickDetector {
    pub(crate) fn new(config: &DetectorConfig) -> Self {
        Self {
            clicks: VecDeque::new(),
            window_ms: config.rage_window_ms,
            radius_px: config.rage_radius_px,
            threshold: config.rage_threshold.max(1),
        }
    }

    pub(crate) fn on_click(
        &mut self,
        ts: i64,
        x: f64,
        y: f64,
        target: Option<&ElementInfo>,
    ) -> Option<FrictionEvent> {
        while self
            .clicks
            .front()
            .is_some_and(|c| ts.saturating_sub(c.ts) >= self.window_ms)
        {
            self.clicks.pop_front();
        }
        self.clicks.push_back(ClickPoint { x, y, ts });

        let near = self
            .clicks
            .iter()
            .filter(|c| (c.x - x).hypot(c.y - y) < self.radius_px)
            .count();

        if near < self.threshold {
            return None;
        }

        self.clicks.clear();
        let selector = target.map(ElementInfo::selector).unwrap_or_default();
        Some(
            FrictionEvent::new(TriggerType::RageClick, RAGE_CLICK_CONFIDENCE)
                .with_selector(selector)
                .with_position(x, y),
        )
    }

    pub(crate) fn len(&self) -> usize {
        self.clicks.len()
    }

    pub(crate) fn clear(&mut self) {
        self.clicks.clear();
    }
}

// ============================================================================
// Dead click
// ============================================================================

#[derive(Debug, Clone)]
struct PendingClick {
    selector: String,
    x: f64,
    y: f64,
}

/// Clicks followed by no DOM activity or navigation.
#[derive(Debug)]
pub(crate) struct DeadClickDetector {
    pending: DelayedTasks<u64, PendingClick>,
    delay_ms: i64,
}

impl DeadClickDetector {
    pub(crate) fn new(config: &DetectorConfig) -> Self {
        Self {
            pending: DelayedTasks::new(),
            delay_ms: config.dead_click_delay_ms,
        }
    }

    /// Arm (or re-arm) the check for the clicked element.
    pub(crate) fn on_click(&mut self, ts: i64, x: f64, y: f64, target: Option<&ElementInfo>) {
        let Some(target) = target else {
            return;
        };
        if target.disabled {
            return;
        }
        self.pending.schedule(
            target.node,
            ts.saturating_add(self.delay_ms),
            PendingClick {
                selector: target.selector(),
                x,
                y,
            },
        );
    }

    /// Any observed activity resolves every outstanding click.
    pub(crate) fn on_activity(&mut self) -> usize {
        self.pending.cancel_all()
    }

    pub(crate) fn expire(&mut self, now: i64) -> Vec<FrictionEvent> {
        self.pending
            .expire(now)
            .into_iter()
            .map(|(_, click)| {
                FrictionEvent::new(TriggerType::DeadClick, DEAD_CLICK_CONFIDENCE)
                    .with_selector(click.selector)
                    .with_position(click.x, click.y)
            })
            .collect()
    }

    pub(crate) fn next_deadline(&self) -> Option<i64> {
        self.pending.next_deadline()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}

// ============================================================================
// Error loop
// ============================================================================

#[derive(Debug, Clone)]
struct RecordedError {
    needle: String,
    ts: i64,
}

/// Collapse whitespace; blank messages become a fixed placeholder so they do
/// not match everything by substring.
pub(crate) fn normalize_message(message: &str) -> String {
    let collapsed = message.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        "Unknown error".to_string()
    } else {
        collapsed
    }
}

/// Repeated similar uncaught errors or rejections.
#[derive(Debug)]
pub(crate) struct ErrorLoopDetector {
    errors: VecDeque<RecordedError>,
    window_ms: i64,
    threshold: usize,
}

impl ErrorLoopDetector {
    pub(crate) fn new(config: &DetectorConfig) -> Self {
        Self {
            errors: VecDeque::new(),
            window_ms: config.error_window_ms,
            threshold: config.error_threshold.max(1),
        }
    }

    pub(crate) fn on_error(&mut self, ts: i64, message: &str) -> Option<FrictionEvent> {
        while self
            .errors
            .front()
            .is_some_and(|e| ts.saturating_sub(e.ts) >= self.window_ms)
        {
            self.errors.pop_front();
        }

        let normalized = normalize_message(message);
        let needle = normalized.to_lowercase();
        self.errors.push_back(RecordedError {
            needle: needle.clone(),
            ts,
        });

        let matches = self
            .errors
            .iter()
            .filter(|e| e.needle.contains(&needle) || needle.contains(&e.needle))
            .count();

        if matches < self.threshold {
            return None;
        }

        self.errors.clear();
        let selector: String = normalized.chars().take(ERROR_SELECTOR_MAX_CHARS).collect();
        Some(FrictionEvent::new(TriggerType::ErrorLoop, ERROR_LOOP_CONFIDENCE).with_selector(selector))
    }

    pub(crate) fn len(&self) -> usize {
        self.errors.len()
    }

    pub(crate) fn clear(&mut self) {
        self.errors.clear();
    }
}

// ============================================================================
// Backtrack loop
// ============================================================================

/// A,B,A,B oscillation between two paths.
#[derive(Debug)]
pub(crate) struct BacktrackDetector {
    navigations: VecDeque<(String, i64)>,
    window_ms: i64,
}

impl BacktrackDetector {
    pub(crate) fn new(config: &DetectorConfig) -> Self {
        Self {
            navigations: VecDeque::new(),
            window_ms: config.backtrack_window_ms,
        }
    }

    pub(crate) fn on_navigation(&mut self, ts: i64, path: &str) -> Option<FrictionEvent> {
        while self
            .navigations
            .front()
            .is_some_and(|(_, at)| ts.saturating_sub(*at) >= self.window_ms)
        {
            self.navigations.pop_front();
        }
        self.navigations.push_back((path.to_string(), ts));

        let n = self.navigations.len();
        if n < 4 {
            return None;
        }
        let a = &self.navigations[n - 4].0;
        let b = &self.navigations[n - 3].0;
        let c = &self.navigations[n - 2].0;
        let d = &self.navigations[n - 1].0;
        if a != c || b != d || a == b {
            return None;
        }

        let selector = format!("{} ↔ {}", a, b);
        self.navigations.clear();
        Some(FrictionEvent::new(TriggerType::BacktrackLoop, BACKTRACK_CONFIDENCE).with_selector(selector))
    }

    pub(crate) fn len(&self) -> usize {
        self.navigations.len()
    }

    pub(crate) fn clear(&mut self) {
        self.navigations.clear();
    }
}
