//! Buffered telemetry tracker.
//!
//! Events are buffered in memory and shipped as one [`CollectRequest`] when
//! the buffer reaches `max_batch`, on every flush interval, and at shutdown.
//! A flush failure is logged and the batch is dropped; at most one flush is
//! in flight at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::{RequestConfig, TrackerConfig};
use crate::error::{AppResult, ExternalError};
use crate::events::{ClickMeta, ErrorMeta, EventPayload, NavMeta, RawSignal, TelemetryEvent};
use crate::external::{check_status, http_client, send_error};
use crate::ingest::{CollectRequest, CollectResponse, IngestSink};
use crate::session::SessionIdentity;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Ships batches to a remote ingestion endpoint.
#[derive(Clone)]
pub struct HttpIngestClient {
    client: Client,
    endpoint: String,
    timeout_ms: u64,
}

impl HttpIngestClient {
    pub fn new(endpoint: impl Into<String>, request_config: &RequestConfig) -> AppResult<Self> {
        Ok(Self {
            client: http_client(request_config)?,
            endpoint: endpoint.into(),
            timeout_ms: request_config.timeout_ms,
        })
    }
}

#[async_trait]
impl IngestSink for HttpIngestClient {
    async fn send(&self, request: CollectRequest) -> AppResult<CollectResponse> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| send_error(e, self.timeout_ms))?;
        let body = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ExternalError::InvalidResponse {
                message: format!("Failed to parse collect response: {}", e),
            })?;
        Ok(body)
    }
}

struct Inner {
    buffer: Mutex<Vec<TelemetryEvent>>,
    in_flight: AtomicBool,
    page: Mutex<String>,
    timer: Mutex<Option<JoinHandle<()>>>,
    sink: Arc<dyn IngestSink>,
    identity: SessionIdentity,
    config: TrackerConfig,
}

/// Clears the in-flight flag when a flush ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Cloneable handle to a shared event buffer.
#[derive(Clone)]
pub struct EventTracker {
    inner: Arc<Inner>,
}

impl EventTracker {
    pub fn new(config: TrackerConfig, identity: SessionIdentity, sink: Arc<dyn IngestSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                buffer: Mutex::new(Vec::new()),
                in_flight: AtomicBool::new(false),
                page: Mutex::new("/".to_string()),
                timer: Mutex::new(None),
                sink,
                identity,
                config,
            }),
        }
    }

    pub fn session_id(&self) -> String {
        self.inner.identity.session_id()
    }

    /// Current page path attached to new events.
    pub fn page(&self) -> String {
        lock(&self.inner.page).clone()
    }

    pub fn set_page(&self, page: impl Into<String>) {
        *lock(&self.inner.page) = page.into();
    }

    /// Number of buffered events.
    pub fn buffered(&self) -> usize {
        lock(&self.inner.buffer).len()
    }

    /// Buffer an event stamped with the current time.
    pub fn track(&self, payload: EventPayload) {
        self.track_at(Utc::now().timestamp_millis(), payload);
    }

    /// Buffer an event; a full buffer triggers a background flush.
    pub fn track_at(&self, ts: i64, payload: EventPayload) {
        let event = TelemetryEvent::new(
            ts,
            self.session_id(),
            self.page(),
            payload,
        )
        .with_variant(self.inner.identity.variant().as_str());

        let len = {
            let mut buffer = lock(&self.inner.buffer);
            buffer.push(event);
            buffer.len()
        };

        if len >= self.inner.config.max_batch {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let tracker = self.clone();
                    handle.spawn(async move {
                        tracker.flush().await;
                    });
                }
                Err(_) => debug!(buffered = len, "No runtime for size-triggered flush"),
            }
        }
    }

    /// Auto-capture the raw signals worth recording as telemetry, stamped
    /// with the signal's own time.
    pub fn observe_signal(&self, signal: &RawSignal) {
        let ts = signal.ts();
        match signal {
            RawSignal::Click { x, y, target, .. } => {
                self.track_at(
                    ts,
                    EventPayload::Click(ClickMeta::from_element(target.as_ref(), *x, *y)),
                );
            }
            RawSignal::Navigation { path, .. } => {
                self.set_page(path.clone());
                self.track_at(
                    ts,
                    EventPayload::Nav(NavMeta {
                        path: Some(path.clone()),
                    }),
                );
            }
            RawSignal::Error { message, .. } => {
                self.track_at(
                    ts,
                    EventPayload::ErrorSignal(ErrorMeta {
                        message: message.clone(),
                        source: Some("error".to_string()),
                    }),
                );
            }
            RawSignal::Rejection { message, .. } => {
                self.track_at(ts, EventPayload::ErrorSignal(ErrorMeta {
                    message: message.clone(),
                    source: Some("rejection".to_string()),
                }));
            }
            RawSignal::DomActivity { .. } => {}
        }
    }

    /// Ship the buffered events. Returns the ingest response, or `None` when
    /// there was nothing to send, another flush was running, or sending
    /// failed.
    pub async fn flush(&self) -> Option<CollectResponse> {
        if self
            .inner
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Flush already in flight");
            return None;
        }
        let _guard = InFlight(&self.inner.in_flight);

        let batch = std::mem::take(&mut *lock(&self.inner.buffer));
        if batch.is_empty() {
            return None;
        }

        let count = batch.len();
        let request = CollectRequest {
            session_id: Some(self.session_id()),
            page: None,
            events: batch.iter().map(TelemetryEvent::to_wire).collect(),
            client_state: None,
        };

        match self.inner.sink.send(request).await {
            Ok(response) => {
                debug!(count, incident_id = ?response.incident_id, "Batch flushed");
                Some(response)
            }
            Err(e) => {
                warn!(count, error = %e, "Flush failed, dropping batch");
                None
            }
        }
    }

    /// Start the periodic flush timer. Calling it twice is a no-op.
    pub fn start(&self) {
        let mut timer = lock(&self.inner.timer);
        if timer.is_some() {
            return;
        }
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let period = Duration::from_millis(self.inner.config.flush_interval_ms.max(1));
        *timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                EventTracker { inner }.flush().await;
            }
        }));
    }

    /// Stop the timer and flush what is left.
    pub async fn shutdown(&self) -> Option<CollectResponse> {
        if let Some(handle) = lock(&self.inner.timer).take() {
            handle.abort();
        }
        self.flush().await
    }
}
