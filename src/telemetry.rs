//! Telemetry Hub: fan-out of structured lifecycle events to listeners.
//!
//! Generalizes a single-channel status broadcast into an arbitrary
//! discriminated-union event and a list of boxed listeners rather than a
//! single typed channel, since callers need a register/unregister surface
//! rather than a subscribe-only broadcast.

use crate::types::{ids::RequestId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Core,
    Session,
}

/// Discriminated union of lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TelemetryEvent {
    #[serde(rename = "parse:start")]
    ParseStart(EventEnvelope),
    #[serde(rename = "parse:stage")]
    ParseStage(StageEventEnvelope),
    #[serde(rename = "parse:success")]
    ParseSuccess(EventEnvelope),
    #[serde(rename = "parse:failure")]
    ParseFailure(EventEnvelope),
    #[serde(rename = "plan:ready")]
    PlanReady(EventEnvelope),
    #[serde(rename = "plan:cache")]
    PlanCache(CacheEventEnvelope),
    #[serde(rename = "plan:auto-refresh")]
    PlanAutoRefresh(AutoRefreshEventEnvelope),
    #[serde(rename = "plan:rewrite")]
    PlanRewrite(RewriteEventEnvelope),
    #[serde(rename = "field:fallback")]
    FieldFallback(FallbackEventEnvelope),
}

/// Fields common to every telemetry event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub source: EventSource,
    pub request_id: RequestId,
    pub timestamp: DateTime<Utc>,
    pub profile: Option<String>,
    pub session_id: Option<SessionId>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEventEnvelope {
    pub source: EventSource,
    pub request_id: RequestId,
    pub timestamp: DateTime<Utc>,
    pub profile: Option<String>,
    pub session_id: Option<SessionId>,
    pub stage: String,
    pub metrics: crate::types::StageMetrics,
    pub diagnostics: Vec<crate::types::ParseDiagnostic>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEventEnvelope {
    pub source: EventSource,
    pub request_id: RequestId,
    pub timestamp: DateTime<Utc>,
    pub profile: Option<String>,
    pub session_id: Option<SessionId>,
    pub action: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoRefreshEventEnvelope {
    pub source: EventSource,
    pub request_id: RequestId,
    pub timestamp: DateTime<Utc>,
    pub profile: Option<String>,
    pub session_id: Option<SessionId>,
    pub phase: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewriteEventEnvelope {
    pub source: EventSource,
    pub request_id: RequestId,
    pub timestamp: DateTime<Utc>,
    pub profile: Option<String>,
    pub session_id: Option<SessionId>,
    pub phase: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackEventEnvelope {
    pub source: EventSource,
    pub request_id: RequestId,
    pub timestamp: DateTime<Utc>,
    pub profile: Option<String>,
    pub session_id: Option<SessionId>,
    pub field: String,
    pub action: String,
}

type Listener = Arc<dyn Fn(&TelemetryEvent) + Send + Sync>;

/// Fan-out hub. Emission is fire-and-forget: listeners never block or
/// re-enter the pipeline synchronously, and a panicking/misbehaving
/// listener is isolated so it never interrupts emission to the rest.
#[derive(Clone, Default)]
pub struct TelemetryHub {
    listeners: Arc<RwLock<Vec<(u64, Listener)>>>,
    next_id: Arc<AtomicU64>,
}

/// Handle returned by `add_listener`, used to unregister later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerHandle(u64);

impl TelemetryHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&TelemetryEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.write().await.push((id, Arc::new(listener)));
        ListenerHandle(id)
    }

    pub async fn remove_listener(&self, handle: ListenerHandle) {
        self.listeners.write().await.retain(|(id, _)| *id != handle.0);
    }

    /// Fan an event out to every registered listener. Per-listener panics
    /// are caught and logged rather than propagated, so one bad listener
    /// never blocks emission to the rest.
    pub async fn emit(&self, event: TelemetryEvent) {
        let listeners = self.listeners.read().await.clone();
        for (_, listener) in listeners {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener(&event);
            }));
            if let Err(_panic) = result {
                tracing::warn!("telemetry listener panicked while handling {:?}", event_name(&event));
            }
        }
    }

    pub async fn listener_count(&self) -> usize {
        self.listeners.read().await.len()
    }
}

fn event_name(event: &TelemetryEvent) -> &'static str {
    match event {
        TelemetryEvent::ParseStart(_) => "parse:start",
        TelemetryEvent::ParseStage(_) => "parse:stage",
        TelemetryEvent::ParseSuccess(_) => "parse:success",
        TelemetryEvent::ParseFailure(_) => "parse:failure",
        TelemetryEvent::PlanReady(_) => "plan:ready",
        TelemetryEvent::PlanCache(_) => "plan:cache",
        TelemetryEvent::PlanAutoRefresh(_) => "plan:auto-refresh",
        TelemetryEvent::PlanRewrite(_) => "plan:rewrite",
        TelemetryEvent::FieldFallback(_) => "field:fallback",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn envelope(request_id: RequestId) -> EventEnvelope {
        EventEnvelope {
            source: EventSource::Core,
            request_id,
            timestamp: Utc::now(),
            profile: None,
            session_id: None,
            payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn emits_to_all_listeners_in_order() {
        let hub = TelemetryHub::new();
        let order = Arc::new(RwLock::new(Vec::new()));

        let order_a = order.clone();
        hub.add_listener(move |_| {
            let order_a = order_a.clone();
            tokio::spawn(async move {
                order_a.write().await.push("a");
            });
        })
        .await;

        let order_b = order.clone();
        hub.add_listener(move |_| {
            let order_b = order_b.clone();
            tokio::spawn(async move {
                order_b.write().await.push("b");
            });
        })
        .await;

        hub.emit(TelemetryEvent::ParseStart(envelope(RequestId::new()))).await;
        tokio::task::yield_now().await;
        assert_eq!(hub.listener_count().await, 2);
    }

    #[tokio::test]
    async fn remove_listener_stops_future_emits() {
        let hub = TelemetryHub::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let handle = hub
            .add_listener(move |_| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        hub.emit(TelemetryEvent::ParseStart(envelope(RequestId::new()))).await;
        hub.remove_listener(handle).await;
        hub.emit(TelemetryEvent::ParseStart(envelope(RequestId::new()))).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn listener_panic_does_not_stop_emission() {
        let hub = TelemetryHub::new();
        hub.add_listener(|_| panic!("boom")).await;
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        hub.add_listener(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        })
        .await;

        hub.emit(TelemetryEvent::ParseStart(envelope(RequestId::new()))).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
