use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{FrictionDetector, FrictionDispatcher};
use crate::config::DetectorConfig;
use crate::events::{FrictionEvent, RawSignal};

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// A detector running on its own task. Signals are processed strictly in
/// arrival order; dead-click timers fire from the same loop.
pub struct DetectorHandle {
    signals: mpsc::UnboundedSender<RawSignal>,
    task: JoinHandle<()>,
}

impl DetectorHandle {
    /// Spawn the detector loop. Signal timestamps are expected to be wall
    /// clock epoch milliseconds.
    pub fn spawn(config: &DetectorConfig, dispatcher: FrictionDispatcher) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let detector = FrictionDetector::new(config);
        let task = tokio::spawn(run(detector, rx, dispatcher));
        info!("Friction detector started");
        Self { signals: tx, task }
    }

    /// Queue a signal. Returns `false` once the loop has stopped.
    pub fn emit(&self, signal: RawSignal) -> bool {
        self.signals.send(signal).is_ok()
    }

    /// Stop the loop, discarding histories and pending timers. Signals
    /// already queued are still processed.
    pub async fn teardown(self) {
        drop(self.signals);
        let _ = self.task.await;
        info!("Friction detector stopped");
    }
}

async fn run(
    mut detector: FrictionDetector,
    mut signals: mpsc::UnboundedReceiver<RawSignal>,
    dispatcher: FrictionDispatcher,
) {
    loop {
        let wait = detector
            .next_deadline()
            .map(|deadline| Duration::from_millis(deadline.saturating_sub(now_ms()).max(0) as u64));

        tokio::select! {
            signal = signals.recv() => match signal {
                Some(signal) => {
                    dispatcher.tracker().observe_signal(&signal);
                    for event in detector.handle(&signal) {
                        dispatcher.dispatch(event).await;
                    }
                }
                None => break,
            },
            _ = tokio::time::sleep(wait.unwrap_or_default()), if wait.is_some() => {
                for event in detector.expire(now_ms()) {
                    dispatcher.dispatch(event).await;
                }
            }
        }
    }

    detector.teardown();
    debug!("Detector loop exited");
}

/// Run recorded signals through a fresh detector on their own timeline and
/// return every delivered friction event. Pending dead clicks are resolved
/// as if the session stayed idle after the last signal.
pub async fn replay_signals(
    config: &DetectorConfig,
    signals: impl IntoIterator<Item = RawSignal>,
    dispatcher: &FrictionDispatcher,
) -> Vec<FrictionEvent> {
    let mut detector = FrictionDetector::new(config);
    let mut delivered = Vec::new();
    let mut last_ts = None;

    for signal in signals {
        dispatcher.tracker().observe_signal(&signal);
        last_ts = Some(signal.ts());
        for event in detector.handle(&signal) {
            delivered.push(dispatcher.dispatch(event).await);
        }
    }

    if let Some(ts) = last_ts {
        for event in detector.expire(ts.saturating_add(config.dead_click_delay_ms)) {
            delivered.push(dispatcher.dispatch(event).await);
        }
    }

    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::TrackerConfig;
    use crate::events::{ElementInfo, TriggerType};
    use crate::ingest::{CollectResponse, MockIngestSink};
    use crate::session::SessionIdentity;
    use crate::tracker::EventTracker;

    fn dispatcher(tx: mpsc::UnboundedSender<FrictionEvent>) -> FrictionDispatcher {
        let mut sink = MockIngestSink::new();
        sink.expect_send()
            .returning(|_| Ok(CollectResponse::default()));
        let tracker = EventTracker::new(
            TrackerConfig::default(),
            SessionIdentity::in_memory(),
            Arc::new(sink),
        );
        FrictionDispatcher::new(tracker).with_observer(Arc::new(move |e: &FrictionEvent| {
            let _ = tx.send(e.clone());
        }))
    }

    fn fast_config() -> DetectorConfig {
        DetectorConfig {
            dead_click_delay_ms: 50,
            ..Default::default()
        }
    }

    fn button() -> Option<ElementInfo> {
        Some(ElementInfo::new(9, "button").with_test_id("save"))
    }

    #[tokio::test]
    async fn test_dead_click_timer_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = DetectorHandle::spawn(&fast_config(), dispatcher(tx));
        assert!(handle.emit(RawSignal::click(now_ms(), 1.0, 1.0, button())));

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.trigger_type, TriggerType::DeadClick);
        assert_eq!(event.selector.as_deref(), Some("[data-testid=\"save\"]"));
        handle.teardown().await;
    }

    #[tokio::test]
    async fn test_teardown_clears_pending_timers() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = DetectorHandle::spawn(
            &DetectorConfig {
                dead_click_delay_ms: 200,
                ..Default::default()
            },
            dispatcher(tx),
        );
        handle.emit(RawSignal::click(now_ms(), 1.0, 1.0, button()));
        handle.teardown().await;

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_activity_cancels_in_runtime() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = DetectorHandle::spawn(&fast_config(), dispatcher(tx));
        let start = now_ms();
        handle.emit(RawSignal::click(start, 1.0, 1.0, button()));
        handle.emit(RawSignal::DomActivity { ts: start + 1 });

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(rx.try_recv().is_err());
        handle.teardown().await;
    }

    #[tokio::test]
    async fn test_replay_resolves_trailing_dead_click() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let d = dispatcher(tx);
        let signals = vec![
            RawSignal::navigation(0, "/cart"),
            RawSignal::click(1_000, 5.0, 5.0, button()),
        ];
        let delivered = replay_signals(&DetectorConfig::default(), signals, &d).await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].trigger_type, TriggerType::DeadClick);
        assert_eq!(d.tracker().page(), "/cart");
    }

    #[tokio::test]
    async fn test_replay_rage_sequence() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let d = dispatcher(tx);
        let mut signals: Vec<RawSignal> = (0..5)
            .map(|i| RawSignal::click(i * 100, 40.0, 40.0, button()))
            .collect();
        signals.push(RawSignal::DomActivity { ts: 600 });

        let delivered = replay_signals(&DetectorConfig::default(), signals, &d).await;
        let kinds: Vec<_> = delivered.iter().map(|e| e.trigger_type).collect();
        assert_eq!(kinds, vec![TriggerType::RageClick]);
    }
}
