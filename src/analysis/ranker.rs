//! Heuristic root-cause ranking.
//!
//! Candidates accumulate additive evidence from the trigger, the session's
//! event history and the external error record. Scores are capped at 1.0,
//! reasons are deduplicated, and ties keep first-seen order.

use serde::{Deserialize, Serialize};

use crate::detector::normalize_error_message;
use crate::events::{EventPayload, TelemetryEvent, TriggerType};
use crate::external::ExternalErrorRecord;

/// Clicks inspected before a rage/dead click firing.
const CLICK_LOOKBACK: usize = 5;

/// Navigations inspected for a backtrack loop.
const NAV_LOOKBACK: usize = 4;

/// A component suspected of causing the friction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootCauseCandidate {
    pub component: String,
    /// Accumulated evidence, 0.0-1.0.
    pub score: f64,
    pub reasons: Vec<String>,
}

#[derive(Default)]
struct Scoreboard {
    candidates: Vec<RootCauseCandidate>,
}

impl Scoreboard {
    fn add(&mut self, component: &str, points: f64, reason: impl Into<String>) {
        if component.is_empty() {
            return;
        }
        let reason = reason.into();
        let idx = match self.candidates.iter().position(|c| c.component == component) {
            Some(idx) => idx,
            None => {
                self.candidates.push(RootCauseCandidate {
                    component: component.to_string(),
                    score: 0.0,
                    reasons: Vec::new(),
                });
                self.candidates.len() - 1
            }
        };
        let candidate = &mut self.candidates[idx];
        candidate.score = (candidate.score + points).min(1.0);
        if !candidate.reasons.contains(&reason) {
            candidate.reasons.push(reason);
        }
    }

    fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    fn into_ranked(mut self) -> Vec<RootCauseCandidate> {
        // sort_by is stable, so equal scores keep insertion order
        self.candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        self.candidates
    }
}

/// Rank likely root causes for a friction incident.
///
/// `trigger` is `None` when the incident's trigger could not be determined;
/// only external evidence and the generic fallback apply then.
pub fn rank_root_causes(
    trigger: Option<TriggerType>,
    events: &[TelemetryEvent],
    external: Option<&ExternalErrorRecord>,
) -> Vec<RootCauseCandidate> {
    let mut board = Scoreboard::default();

    match trigger {
        Some(t @ (TriggerType::RageClick | TriggerType::DeadClick)) => score_clicks(&mut board, t, events),
        Some(TriggerType::ErrorLoop) => score_errors(&mut board, events),
        Some(TriggerType::BacktrackLoop) => score_navigation(&mut board, events),
        None => {}
    }

    if let Some(record) = external {
        score_external(&mut board, record);
    }

    if board.is_empty() {
        match trigger {
            Some(TriggerType::RageClick) => {
                board.add("UnknownUIElement", 0.3, "Repeated clicks without clear target")
            }
            Some(TriggerType::DeadClick) => {
                board.add("EventHandler", 0.3, "Element not responding to user interaction")
            }
            Some(TriggerType::ErrorLoop) => {
                board.add("ErrorHandling", 0.3, "Repeated errors without clear source")
            }
            Some(TriggerType::BacktrackLoop) => {
                board.add("Navigation", 0.3, "Confusing navigation flow")
            }
            None => board.add("NetworkLayer", 0.2, "Potential connectivity issue"),
        }
    }

    board.into_ranked()
}

fn score_clicks(board: &mut Scoreboard, trigger: TriggerType, events: &[TelemetryEvent]) {
    let firing = events
        .iter()
        .rposition(|e| e.friction().is_some_and(|f| f.trigger_type == trigger));
    let history = match firing {
        Some(idx) => &events[..idx],
        None => events,
    };

    let clicks: Vec<_> = history
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::Click(meta) => Some(meta),
            _ => None,
        })
        .collect();
    let skip = clicks.len().saturating_sub(CLICK_LOOKBACK);

    for click in &clicks[skip..] {
        let test_id = click.test_id.as_deref().map(str::trim).filter(|t| !t.is_empty());
        let text = click.text.as_deref().map(str::trim).filter(|t| !t.is_empty());

        if let Some(test_id) = test_id {
            let reason = match trigger {
                TriggerType::RageClick => "Rage clicks detected on this element",
                _ => "Dead click - element not responding",
            };
            board.add(test_id, 0.6, reason);
        } else if let Some(text) = text {
            let component = format!("{}Button", text.split_whitespace().collect::<String>());
            let reason = match trigger {
                TriggerType::RageClick => format!("Interaction with \"{}\" caused friction", text),
                _ => format!("\"{}\" button not responding to clicks", text),
            };
            board.add(&component, 0.5, reason);
        }
    }

    if trigger == TriggerType::DeadClick {
        let selector = firing
            .and_then(|idx| events[idx].friction())
            .and_then(|f| f.selector.as_deref());
        if let Some(selector) = selector {
            board.add(selector, 0.7, "Element clicked but no response detected");
        }
    }
}

fn score_errors(board: &mut Scoreboard, events: &[TelemetryEvent]) {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for event in events {
        if let EventPayload::ErrorSignal(meta) = &event.payload {
            let message = normalize_error_message(&meta.message);
            match counts.iter_mut().find(|(m, _)| *m == message) {
                Some((_, n)) => *n += 1,
                None => counts.push((message, 1)),
            }
        }
    }

    // First-seen message wins ties
    let Some((message, count)) = counts
        .into_iter()
        .reduce(|best, next| if next.1 > best.1 { next } else { best })
    else {
        return;
    };

    board.add(
        "ErrorHandling",
        0.8,
        format!("Repeated error: \"{}\" ({} times)", message, count),
    );

    let lower = message.to_lowercase();
    if ["fetch", "network", "api"].iter().any(|k| lower.contains(k)) {
        board.add("ApiClient", 0.7, "Network/API error loop detected");
    }
}

fn score_navigation(board: &mut Scoreboard, events: &[TelemetryEvent]) {
    let paths: Vec<&str> = events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::Nav(meta) => Some(meta.path.as_deref().unwrap_or(&e.page)),
            _ => None,
        })
        .collect();
    let skip = paths.len().saturating_sub(NAV_LOOKBACK);

    let mut unique: Vec<&str> = Vec::new();
    for &path in &paths[skip..] {
        if !unique.contains(&path) {
            unique.push(path);
        }
    }

    let reason = format!("User confused between pages: {}", unique.join(" ↔ "));
    for path in &unique {
        let name = path.split('/').filter(|s| !s.is_empty()).last().unwrap_or("home");
        board.add(&format!("{}Page", name), 0.6, reason.clone());
    }
    board.add("Navigation", 0.7, "User stuck in navigation loop - confusing UX flow");
}

/// Title tokens that look like identifiers: capitalized words or paths.
fn identifier_tokens(title: &str) -> Vec<String> {
    title
        .split_whitespace()
        .filter(|w| {
            w.chars().next().is_some_and(char::is_uppercase)
                || w.contains('/')
                || [".ts", ".tsx", ".js", ".jsx"].iter().any(|ext| w.contains(ext))
        })
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '/' | '_'))
                .collect::<String>()
                .trim_matches('.')
                .to_string()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

fn score_external(board: &mut Scoreboard, record: &ExternalErrorRecord) {
    if let Some(title) = &record.title {
        for token in identifier_tokens(title) {
            board.add(&token, 0.4, "Referenced in external error title");
        }
    }
    if let Some(flow) = record.tag("flow") {
        board.add(&format!("{}Flow", flow), 0.3, "Active flow during error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ClickMeta, ErrorMeta, FrictionEvent, NavMeta};

    fn event(ts: i64, payload: EventPayload) -> TelemetryEvent {
        TelemetryEvent::new(ts, "s", "/cart", payload)
    }

    fn click_test_id(id: &str) -> EventPayload {
        EventPayload::Click(ClickMeta {
            test_id: Some(id.into()),
            ..Default::default()
        })
    }

    fn click_text(text: &str) -> EventPayload {
        EventPayload::Click(ClickMeta {
            text: Some(text.into()),
            ..Default::default()
        })
    }

    fn friction(trigger: TriggerType, selector: Option<&str>) -> EventPayload {
        let mut f = FrictionEvent::new(trigger, 0.9);
        f.selector = selector.map(str::to_string);
        EventPayload::FrictionDetected(f)
    }

    fn error(message: &str) -> EventPayload {
        EventPayload::ErrorSignal(ErrorMeta {
            message: message.into(),
            source: None,
        })
    }

    fn nav(path: &str) -> EventPayload {
        EventPayload::Nav(NavMeta {
            path: Some(path.into()),
        })
    }

    #[test]
    fn test_rage_clicks_score_capped() {
        let mut events: Vec<_> = (0..5).map(|i| event(i, click_test_id("apply-coupon"))).collect();
        events.push(event(6, friction(TriggerType::RageClick, None)));

        let ranked = rank_root_causes(Some(TriggerType::RageClick), &events, None);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].component, "apply-coupon");
        assert_eq!(ranked[0].score, 1.0);
        assert_eq!(ranked[0].reasons, vec!["Rage clicks detected on this element"]);
    }

    #[test]
    fn test_only_clicks_before_firing_count() {
        let events = vec![
            event(1, click_text("Pay now")),
            event(2, friction(TriggerType::RageClick, None)),
            event(3, click_test_id("after")),
        ];
        let ranked = rank_root_causes(Some(TriggerType::RageClick), &events, None);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].component, "PaynowButton");
        assert_eq!(ranked[0].score, 0.5);
    }

    #[test]
    fn test_click_lookback_is_five() {
        let mut events: Vec<_> = (0..6)
            .map(|i| event(i, click_test_id(&format!("btn-{}", i))))
            .collect();
        events.push(event(10, friction(TriggerType::RageClick, None)));
        let ranked = rank_root_causes(Some(TriggerType::RageClick), &events, None);
        assert_eq!(ranked.len(), 5);
        assert!(ranked.iter().all(|c| c.component != "btn-0"));
        // Ties keep first-seen order
        assert_eq!(ranked[0].component, "btn-1");
    }

    #[test]
    fn test_dead_click_selector_ranks_first() {
        let events = vec![
            event(1, click_test_id("save")),
            event(2, friction(TriggerType::DeadClick, Some("#save"))),
        ];
        let ranked = rank_root_causes(Some(TriggerType::DeadClick), &events, None);
        assert_eq!(ranked[0].component, "#save");
        assert_eq!(ranked[0].score, 0.7);
        assert_eq!(ranked[1].component, "save");
        assert_eq!(ranked[1].reasons, vec!["Dead click - element not responding"]);
    }

    #[test]
    fn test_error_loop_most_frequent_and_network() {
        let events = vec![
            event(1, error("Failed to fetch")),
            event(2, error("boom")),
            event(3, error("Failed  to fetch")),
        ];
        let ranked = rank_root_causes(Some(TriggerType::ErrorLoop), &events, None);
        assert_eq!(ranked[0].component, "ErrorHandling");
        assert_eq!(ranked[0].score, 0.8);
        assert_eq!(ranked[0].reasons, vec!["Repeated error: \"Failed to fetch\" (2 times)"]);
        assert_eq!(ranked[1].component, "ApiClient");
    }

    #[test]
    fn test_backtrack_pages() {
        let events = vec![
            event(1, nav("/")),
            event(2, nav("/cart")),
            event(3, nav("/checkout/shipping")),
            event(4, nav("/cart")),
            event(5, nav("/checkout/shipping")),
        ];
        let ranked = rank_root_causes(Some(TriggerType::BacktrackLoop), &events, None);
        let names: Vec<_> = ranked.iter().map(|c| c.component.as_str()).collect();
        assert_eq!(names, vec!["Navigation", "cartPage", "shippingPage"]);
        assert_eq!(
            ranked[1].reasons,
            vec!["User confused between pages: /cart ↔ /checkout/shipping"]
        );
    }

    #[test]
    fn test_root_path_is_home_page() {
        let events = vec![event(1, nav("/")), event(2, nav("/about"))];
        let ranked = rank_root_causes(Some(TriggerType::BacktrackLoop), &events, None);
        assert!(ranked.iter().any(|c| c.component == "homePage"));
    }

    #[test]
    fn test_external_title_and_flow_tag() {
        let record = ExternalErrorRecord::new("e1")
            .with_title("TypeError in CouponService.apply at src/cart/total.ts")
            .with_tag("flow", "checkout");
        let ranked = rank_root_causes(None, &[], Some(&record));
        let names: Vec<_> = ranked.iter().map(|c| c.component.as_str()).collect();
        assert_eq!(
            names,
            vec!["TypeError", "CouponService.apply", "src/cart/total.ts", "checkoutFlow"]
        );
        assert_eq!(ranked[0].score, 0.4);
        assert_eq!(ranked[3].score, 0.3);
    }

    #[test]
    fn test_fallbacks() {
        let cases = [
            (Some(TriggerType::RageClick), "UnknownUIElement", 0.3),
            (Some(TriggerType::DeadClick), "EventHandler", 0.3),
            (Some(TriggerType::ErrorLoop), "ErrorHandling", 0.3),
            (Some(TriggerType::BacktrackLoop), "Navigation", 0.7),
            (None, "NetworkLayer", 0.2),
        ];
        for (trigger, component, score) in cases {
            let ranked = rank_root_causes(trigger, &[], None);
            assert_eq!(ranked[0].component, component);
            assert_eq!(ranked[0].score, score);
        }
    }

    #[test]
    fn test_scores_never_exceed_one() {
        let mut events: Vec<_> = (0..20).map(|i| event(i, click_text("Go"))).collect();
        events.extend((20..40).map(|i| event(i, error("api down"))));
        events.extend((40..60).map(|i| event(i, nav(if i % 2 == 0 { "/a" } else { "/b" }))));
        let record = ExternalErrorRecord::new("e").with_title("GoButton GoButton GoButton");

        for trigger in [
            Some(TriggerType::RageClick),
            Some(TriggerType::DeadClick),
            Some(TriggerType::ErrorLoop),
            Some(TriggerType::BacktrackLoop),
            None,
        ] {
            for c in rank_root_causes(trigger, &events, Some(&record)) {
                assert!(c.score <= 1.0 && c.score >= 0.0, "{:?}", c);
                let mut reasons = c.reasons.clone();
                reasons.dedup();
                assert_eq!(reasons.len(), c.reasons.len());
            }
        }
    }
}
