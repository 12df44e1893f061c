//! In-process publish-subscribe for observability events.
//!
//! Dashboard connections subscribe a callback; publication snapshots the
//! subscriber list under the lock, then fans out concurrently. A failing
//! subscriber is logged and stays subscribed — only an explicit
//! `unsubscribe` removes it. Events are never dropped silently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};

use vg_domain::error::Result;

/// A structured observability event.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub event_type: String,
    pub session_id: Option<String>,
    /// Unix seconds.
    pub timestamp: f64,
    pub data: Value,
}

impl Event {
    /// Wire shape for the dashboard channel.
    pub fn to_dashboard_json(&self) -> String {
        json!({
            "type": "event",
            "event_type": self.event_type,
            "session_id": self.session_id,
            "timestamp": self.timestamp,
            "data": self.data,
        })
        .to_string()
    }
}

pub type Subscriber = Arc<dyn Fn(Event) -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<HashMap<SubscriberId, Subscriber>>,
    next_id: AtomicU64,
    event_count: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, callback: Subscriber) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().insert(id, callback);
        tracing::info!(
            subscribers = self.subscriber_count(),
            "event bus subscriber added"
        );
        id
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        if self.subscribers.lock().remove(&id).is_none() {
            tracing::warn!("attempted to unsubscribe unknown event-bus subscriber");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn event_count(&self) -> u64 {
        self.event_count.load(Ordering::Relaxed)
    }

    /// Publish an event to every subscriber, concurrently. Waits for all
    /// callbacks; failures are logged per subscriber.
    pub async fn publish(&self, event_type: &str, session_id: Option<&str>, data: Value) {
        let event = Event {
            event_type: event_type.to_string(),
            session_id: session_id.map(String::from),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
            data,
        };
        self.event_count.fetch_add(1, Ordering::Relaxed);

        // Snapshot under the lock; fan out without it.
        let subscribers: Vec<(SubscriberId, Subscriber)> = self
            .subscribers
            .lock()
            .iter()
            .map(|(id, cb)| (*id, cb.clone()))
            .collect();
        if subscribers.is_empty() {
            return;
        }

        let futures = subscribers
            .iter()
            .map(|(id, cb)| {
                let id = *id;
                let fut = cb(event.clone());
                async move { (id, fut.await) }
            })
            .collect::<Vec<_>>();

        for (id, result) in futures_util::future::join_all(futures).await {
            if let Err(e) = result {
                tracing::error!(subscriber = ?id, event_type, error = %e, "event subscriber failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vg_domain::error::Error;

    fn collecting_subscriber(sink: Arc<Mutex<Vec<String>>>) -> Subscriber {
        Arc::new(move |event| {
            let sink = sink.clone();
            Box::pin(async move {
                sink.lock().push(event.event_type.clone());
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn publish_fans_out_to_all_subscribers() {
        let bus = EventBus::new();
        let first = Arc::new(Mutex::new(Vec::new()));
        let second = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(collecting_subscriber(first.clone()));
        bus.subscribe(collecting_subscriber(second.clone()));

        bus.publish("session_created", Some("s1"), json!({})).await;

        assert_eq!(first.lock().as_slice(), ["session_created"]);
        assert_eq!(second.lock().as_slice(), ["session_created"]);
        assert_eq!(bus.event_count(), 1);
    }

    #[tokio::test]
    async fn failing_subscriber_is_isolated_and_stays_subscribed() {
        let bus = EventBus::new();
        let ok_sink = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(Arc::new(|_| {
            Box::pin(async { Err(Error::Internal("subscriber broke".into())) })
        }));
        bus.subscribe(collecting_subscriber(ok_sink.clone()));

        bus.publish("message_received", Some("s1"), json!({})).await;
        bus.publish("message_received", Some("s1"), json!({})).await;

        // The healthy subscriber received both; the failing one was
        // never implicitly unsubscribed.
        assert_eq!(ok_sink.lock().len(), 2);
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let sink = Arc::new(Mutex::new(Vec::new()));
        let id = bus.subscribe(collecting_subscriber(sink.clone()));

        bus.publish("error", None, json!({})).await;
        bus.unsubscribe(id);
        bus.publish("error", None, json!({})).await;

        assert_eq!(sink.lock().len(), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn dashboard_json_is_tagged_as_event() {
        let event = Event {
            event_type: "metrics_updated".into(),
            session_id: None,
            timestamp: 1.5,
            data: json!({"total_messages": 3}),
        };
        let value: Value = serde_json::from_str(&event.to_dashboard_json()).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["event_type"], "metrics_updated");
        assert_eq!(value["data"]["total_messages"], 3);
    }
}
