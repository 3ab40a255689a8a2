use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::events::{EventPayload, FrictionEvent};
use crate::external::FrictionReporter;
use crate::tracker::EventTracker;

/// Callback receiving every dispatched friction event.
pub type FrictionObserver = Arc<dyn Fn(&FrictionEvent) + Send + Sync>;

/// Marks the reporter ready. Marking twice is harmless.
#[derive(Clone)]
pub struct ReadySignal(Arc<watch::Sender<bool>>);

impl ReadySignal {
    pub fn mark_ready(&self) {
        self.0.send_replace(true);
    }
}

/// Error tracker reporter plus its readiness gate.
#[derive(Clone)]
pub struct ReporterHandle {
    reporter: Arc<dyn FrictionReporter>,
    ready: watch::Receiver<bool>,
    ready_timeout: Duration,
}

impl ReporterHandle {
    /// Reporter that must be marked ready through the returned signal.
    pub fn new(reporter: Arc<dyn FrictionReporter>, ready_timeout: Duration) -> (Self, ReadySignal) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                reporter,
                ready: rx,
                ready_timeout,
            },
            ReadySignal(Arc::new(tx)),
        )
    }

    /// Reporter that is usable immediately.
    pub fn ready(reporter: Arc<dyn FrictionReporter>) -> Self {
        let (handle, signal) = Self::new(reporter, Duration::ZERO);
        signal.mark_ready();
        handle
    }

    async fn wait_ready(&self) -> bool {
        let mut rx = self.ready.clone();
        if *rx.borrow() {
            return true;
        }
        let ready = matches!(
            tokio::time::timeout(self.ready_timeout, rx.wait_for(|ready| *ready)).await,
            Ok(Ok(_))
        );
        ready
    }

    /// Capture `event` and attach the returned id. Any failure leaves the
    /// event without an id.
    pub async fn attach(&self, mut event: FrictionEvent, session_id: &str) -> FrictionEvent {
        if !self.wait_ready().await {
            warn!(trigger = %event.trigger_type, "Reporter not ready, dispatching without capture");
            return event;
        }
        match self.reporter.capture(&event, session_id).await {
            Ok(id) => event.external_error_id = Some(id),
            Err(e) => warn!(trigger = %event.trigger_type, error = %e, "Friction capture failed"),
        }
        event
    }
}

/// Delivers detected friction to the error tracker, telemetry and the
/// observer, in that order.
#[derive(Clone)]
pub struct FrictionDispatcher {
    tracker: EventTracker,
    reporter: Option<ReporterHandle>,
    observer: Option<FrictionObserver>,
}

impl FrictionDispatcher {
    pub fn new(tracker: EventTracker) -> Self {
        Self {
            tracker,
            reporter: None,
            observer: None,
        }
    }

    pub fn with_reporter(mut self, reporter: ReporterHandle) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn with_observer(mut self, observer: FrictionObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn tracker(&self) -> &EventTracker {
        &self.tracker
    }

    /// Enrich and deliver one event, returning what was delivered.
    pub async fn dispatch(&self, event: FrictionEvent) -> FrictionEvent {
        let session_id = self.tracker.session_id();
        let event = match &self.reporter {
            Some(reporter) => reporter.attach(event, &session_id).await,
            None => event,
        };

        info!(
            session_id = %session_id,
            trigger = %event.trigger_type,
            confidence = event.confidence,
            external_error_id = ?event.external_error_id,
            "Friction detected"
        );

        self.tracker
            .track(EventPayload::FrictionDetected(event.clone()));
        let tracker = self.tracker.clone();
        tokio::spawn(async move {
            tracker.flush().await;
        });

        if let Some(observer) = &self.observer {
            if catch_unwind(AssertUnwindSafe(|| observer(&event))).is_err() {
                warn!(trigger = %event.trigger_type, "Friction observer panicked");
            }
        }
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::config::TrackerConfig;
    use crate::error::ExternalError;
    use crate::events::TriggerType;
    use crate::external::MockFrictionReporter;
    use crate::ingest::{CollectResponse, MockIngestSink};
    use crate::session::SessionIdentity;

    fn tracker() -> EventTracker {
        let mut sink = MockIngestSink::new();
        sink.expect_send()
            .returning(|_| Ok(CollectResponse::default()));
        EventTracker::new(
            TrackerConfig::default(),
            SessionIdentity::in_memory(),
            Arc::new(sink),
        )
    }

    fn rage() -> FrictionEvent {
        FrictionEvent::new(TriggerType::RageClick, 0.9)
    }

    #[tokio::test]
    async fn test_dispatch_attaches_external_id() {
        let mut reporter = MockFrictionReporter::new();
        reporter
            .expect_capture()
            .times(1)
            .returning(|_, _| Ok("evt-123".to_string()));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let dispatcher = FrictionDispatcher::new(tracker())
            .with_reporter(ReporterHandle::ready(Arc::new(reporter)))
            .with_observer(Arc::new(move |e: &FrictionEvent| {
                sink.lock().unwrap().push(e.clone())
            }));

        let delivered = dispatcher.dispatch(rage()).await;
        assert_eq!(delivered.external_error_id.as_deref(), Some("evt-123"));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].external_error_id.as_deref(), Some("evt-123"));
    }

    #[tokio::test]
    async fn test_capture_failure_still_delivers() {
        let mut reporter = MockFrictionReporter::new();
        reporter.expect_capture().returning(|_, _| {
            Err(ExternalError::Api {
                status: 503,
                message: "busy".into(),
            })
        });

        let dispatcher = FrictionDispatcher::new(tracker())
            .with_reporter(ReporterHandle::ready(Arc::new(reporter)));
        let delivered = dispatcher.dispatch(rage()).await;
        assert!(delivered.external_error_id.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unready_reporter_times_out() {
        let mut reporter = MockFrictionReporter::new();
        reporter.expect_capture().times(0);

        let (handle, _signal) =
            ReporterHandle::new(Arc::new(reporter), Duration::from_millis(2000));
        let dispatcher = FrictionDispatcher::new(tracker()).with_reporter(handle);
        let delivered = dispatcher.dispatch(rage()).await;
        assert!(delivered.external_error_id.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reporter_ready_while_waiting() {
        let mut reporter = MockFrictionReporter::new();
        reporter
            .expect_capture()
            .times(1)
            .returning(|_, _| Ok("late".to_string()));

        let (handle, signal) =
            ReporterHandle::new(Arc::new(reporter), Duration::from_millis(2000));
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            signal.mark_ready();
        });

        let delivered = handle.attach(rage(), "sess").await;
        assert_eq!(delivered.external_error_id.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn test_friction_tracked_and_flushed() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut sink = MockIngestSink::new();
        sink.expect_send().returning(move |req| {
            let kinds: Vec<String> = req.events.iter().map(|e| e.kind.clone()).collect();
            let _ = tx.send(kinds);
            Ok(CollectResponse::default())
        });
        let tracker = EventTracker::new(
            TrackerConfig::default(),
            SessionIdentity::in_memory(),
            Arc::new(sink),
        );

        let dispatcher = FrictionDispatcher::new(tracker);
        dispatcher.dispatch(rage()).await;

        let kinds = rx.recv().await.unwrap();
        assert_eq!(kinds, vec!["friction_detected".to_string()]);
    }

    #[tokio::test]
    async fn test_observer_panic_is_contained() {
        let dispatcher = FrictionDispatcher::new(tracker())
            .with_observer(Arc::new(|_: &FrictionEvent| panic!("observer bug")));
        let delivered = dispatcher.dispatch(rage()).await;
        assert_eq!(delivered.trigger_type, TriggerType::RageClick);
    }
}
