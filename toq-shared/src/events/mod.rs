/// Session event bus
///
/// In-process publish/subscribe for credential lifecycle events
/// (`session.created`, `session.rotated`, `sessions.revoked`). Publication
/// is fire-and-forget: every subscriber runs in its own spawned task, the
/// bus applies no back-pressure and keeps nothing once the tasks are
/// spawned. Handlers must be idempotent.
///
/// # Metrics
///
/// - `toq_session_events_total{kind}`: events published
/// - `toq_session_event_handler_failures_total{kind, subscriber}`: handler errors
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use toq_shared::events::{SessionEvent, SessionEventBus};
/// use toq_shared::telemetry::RequestContext;
///
/// # async fn example(handler: Arc<dyn toq_shared::events::SessionEventHandler>) {
/// let bus = SessionEventBus::new();
/// let subscription = bus.subscribe(handler);
///
/// bus.publish(&RequestContext::generate(), SessionEvent::revoked(42, None));
/// subscription.unsubscribe();
/// # }
/// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use metrics::counter;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::DomainError;
use crate::telemetry::RequestContext;

const EVENTS_TOTAL: &str = "toq_session_events_total";
const HANDLER_FAILURES_TOTAL: &str = "toq_session_event_handler_failures_total";

/// Event kinds carried on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionEventKind {
    #[serde(rename = "session.created")]
    Created,
    #[serde(rename = "session.rotated")]
    Rotated,
    #[serde(rename = "sessions.revoked")]
    Revoked,
}

impl SessionEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionEventKind::Created => "session.created",
            SessionEventKind::Rotated => "session.rotated",
            SessionEventKind::Revoked => "sessions.revoked",
        }
    }
}

impl fmt::Display for SessionEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session lifecycle event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub kind: SessionEventKind,
    pub user_id: i64,
    pub session_id: Option<Uuid>,
    pub device_id: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
}

impl SessionEvent {
    pub fn created(user_id: i64, device_id: Option<Uuid>) -> Self {
        Self::build(SessionEventKind::Created, user_id, device_id)
    }

    pub fn rotated(user_id: i64, device_id: Option<Uuid>) -> Self {
        Self::build(SessionEventKind::Rotated, user_id, device_id)
    }

    /// All sessions of the user (or only the given device) were revoked
    pub fn revoked(user_id: i64, device_id: Option<Uuid>) -> Self {
        Self::build(SessionEventKind::Revoked, user_id, device_id)
    }

    pub fn with_session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    fn build(kind: SessionEventKind, user_id: i64, device_id: Option<Uuid>) -> Self {
        Self {
            kind,
            user_id,
            session_id: None,
            device_id,
            occurred_at: Utc::now(),
        }
    }
}

/// Subscriber contract
#[async_trait]
pub trait SessionEventHandler: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &SessionEvent) -> Result<(), DomainError>;
}

type Subscribers = RwLock<Vec<(u64, Arc<dyn SessionEventHandler>)>>;

struct BusInner {
    subscribers: Subscribers,
    next_id: AtomicU64,
}

/// Cloneable bus handle
#[derive(Clone)]
pub struct SessionEventBus {
    inner: Arc<BusInner>,
}

impl Default for SessionEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl SessionEventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        match self.inner.subscribers.read() {
            Ok(subs) => subs.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Registers a handler; dropping the returned [`Subscription`] keeps the
    /// handler registered, call [`Subscription::unsubscribe`] to remove it.
    pub fn subscribe(&self, handler: Arc<dyn SessionEventHandler>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let name = handler.name();
        match self.inner.subscribers.write() {
            Ok(mut subs) => subs.push((id, handler)),
            Err(poisoned) => poisoned.into_inner().push((id, handler)),
        }
        tracing::debug!(subscriber = name, "Session event subscriber registered");

        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Publishes `event` to every subscriber, each in its own task
    ///
    /// Returns the spawned task handles; callers normally drop them.
    pub fn publish(&self, ctx: &RequestContext, event: SessionEvent) -> Vec<JoinHandle<()>> {
        counter!(EVENTS_TOTAL, "kind" => event.kind.as_str()).increment(1);

        let handlers: Vec<Arc<dyn SessionEventHandler>> = match self.inner.subscribers.read() {
            Ok(subs) => subs.iter().map(|(_, h)| Arc::clone(h)).collect(),
            Err(poisoned) => poisoned.into_inner().iter().map(|(_, h)| Arc::clone(h)).collect(),
        };

        tracing::debug!(
            event = %event.kind,
            user_id = event.user_id,
            subscribers = handlers.len(),
            "Publishing session event"
        );

        let event = Arc::new(event);
        let snapshot = ctx.snapshot();
        handlers
            .into_iter()
            .map(|handler| {
                let event = Arc::clone(&event);
                snapshot.spawn("session_event", async move {
                    if let Err(e) = handler.handle(&event).await {
                        counter!(
                            HANDLER_FAILURES_TOTAL,
                            "kind" => event.kind.as_str(),
                            "subscriber" => handler.name()
                        )
                        .increment(1);
                        tracing::warn!(
                            subscriber = handler.name(),
                            event = %event.kind,
                            user_id = event.user_id,
                            error = %e,
                            "Session event handler failed"
                        );
                    }
                })
            })
            .collect()
    }
}

/// Handle returned by [`SessionEventBus::subscribe`]
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Removes the handler from the bus; a no-op once the bus is gone
    pub fn unsubscribe(self) {
        if let Some(bus) = self.bus.upgrade() {
            match bus.subscribers.write() {
                Ok(mut subs) => subs.retain(|(id, _)| *id != self.id),
                Err(poisoned) => poisoned.into_inner().retain(|(id, _)| *id != self.id),
            }
        }
    }
}

impl fmt::Debug for BusInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusInner").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
    use tokio::sync::mpsc;

    /// Sum of the counter `name`, restricted to `kind` when given
    fn counter_value(snapshotter: &Snapshotter, name: &str, kind: Option<&str>) -> u64 {
        snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .filter(|(key, _, _, _)| key.key().name() == name)
            .filter(|(key, _, _, _)| {
                kind.map_or(true, |kind| {
                    key.key()
                        .labels()
                        .any(|label| label.key() == "kind" && label.value() == kind)
                })
            })
            .map(|(_, _, _, value)| match value {
                DebugValue::Counter(v) => v,
                _ => 0,
            })
            .sum()
    }

    struct Forward {
        tx: mpsc::UnboundedSender<SessionEvent>,
    }

    #[async_trait]
    impl SessionEventHandler for Forward {
        fn name(&self) -> &'static str {
            "forward"
        }

        async fn handle(&self, event: &SessionEvent) -> Result<(), DomainError> {
            let _ = self.tx.send(event.clone());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl SessionEventHandler for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn handle(&self, _event: &SessionEvent) -> Result<(), DomainError> {
            Err(DomainError::Internal("boom".into()))
        }
    }

    #[tokio::test]
    async fn test_publish_fans_out_to_every_subscriber() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let bus = SessionEventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _a = bus.subscribe(Arc::new(Forward { tx: tx.clone() }));
        let _b = bus.subscribe(Arc::new(Forward { tx }));

        let handles = bus.publish(&RequestContext::generate(), SessionEvent::created(5, None));
        assert_eq!(handles.len(), 2);
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(rx.recv().await.unwrap().user_id, 5);
        assert_eq!(rx.recv().await.unwrap().kind, SessionEventKind::Created);
        assert_eq!(counter_value(&snapshotter, EVENTS_TOTAL, Some("session.created")), 1);
        assert_eq!(counter_value(&snapshotter, EVENTS_TOTAL, Some("sessions.revoked")), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = SessionEventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = bus.subscribe(Arc::new(Forward { tx }));
        assert_eq!(bus.subscriber_count(), 1);

        sub.unsubscribe();
        assert_eq!(bus.subscriber_count(), 0);

        let handles = bus.publish(&RequestContext::generate(), SessionEvent::revoked(1, None));
        assert!(handles.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failing_handler_is_counted_and_isolated() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let bus = SessionEventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _f = bus.subscribe(Arc::new(Failing));
        let _ok = bus.subscribe(Arc::new(Forward { tx }));

        for h in bus.publish(&RequestContext::generate(), SessionEvent::rotated(3, None)) {
            h.await.unwrap();
        }

        assert_eq!(rx.recv().await.unwrap().kind, SessionEventKind::Rotated);
        assert_eq!(counter_value(&snapshotter, HANDLER_FAILURES_TOTAL, Some("session.rotated")), 1);
        assert_eq!(counter_value(&snapshotter, EVENTS_TOTAL, None), 1);
    }

    #[test]
    fn test_event_kind_names() {
        assert_eq!(SessionEventKind::Created.as_str(), "session.created");
        assert_eq!(SessionEventKind::Rotated.as_str(), "session.rotated");
        assert_eq!(SessionEventKind::Revoked.as_str(), "sessions.revoked");
        let json = serde_json::to_string(&SessionEventKind::Revoked).unwrap();
        assert_eq!(json, "\"sessions.revoked\"");
    }
}
