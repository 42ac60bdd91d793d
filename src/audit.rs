//! Best-effort audit side channel.
//!
//! Events are queued on a bounded channel and written by a background task.
//! Recording never blocks and never fails: when the queue is full the event
//! is dropped, and sink errors are logged and discarded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::Result;

/// Default number of events buffered before new ones are dropped.
pub const DEFAULT_CAPACITY: usize = 256;

const SERVICE: &str = "plaza";

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub service: String,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl AuditEvent {
    /// Creates an event stamped with the current time.
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type: event_type.into(),
            service: SERVICE.to_string(),
            payload,
            correlation_id: None,
        }
    }

    /// Tags the event with a caller-supplied correlation id.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}

/// Destination for audit events.
#[async_trait]
pub trait AuditSink: Send + Sync + 'static {
    /// Writes one event.
    async fn write(&self, event: &AuditEvent) -> Result<()>;
}

/// Writes events as structured `info` logs on the `plaza_search::audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl AuditSink for TracingSink {
    async fn write(&self, event: &AuditEvent) -> Result<()> {
        info!(
            target: "plaza_search::audit",
            event_type = %event.event_type,
            correlation_id = event.correlation_id.as_deref().unwrap_or(""),
            payload = %event.payload,
            "audit"
        );
        Ok(())
    }
}

/// Handle for recording audit events.
///
/// Cloning is cheap; all clones feed the same background writer. The
/// writer stops once every handle is dropped.
#[derive(Debug, Clone)]
pub struct AuditLog {
    tx: mpsc::Sender<AuditEvent>,
    dropped: Arc<AtomicU64>,
}

impl AuditLog {
    /// Spawns the background writer for `sink`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<S: AuditSink>(sink: S, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<AuditEvent>(capacity.max(1));
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = sink.write(&event).await {
                    debug!("Audit sink rejected {}: {}", event.event_type, e);
                }
            }
        });
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Audit log that writes to [`TracingSink`].
    pub fn tracing() -> Self {
        Self::new(TracingSink, DEFAULT_CAPACITY)
    }

    /// Queues an event without waiting. Drops it if the queue is full.
    pub fn record(&self, event: AuditEvent) {
        if let Err(e) = self.tx.try_send(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("Dropped audit event: {}", e);
        }
    }

    /// Number of events dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SearchError;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    struct ChannelSink(mpsc::UnboundedSender<AuditEvent>);

    #[async_trait]
    impl AuditSink for ChannelSink {
        async fn write(&self, event: &AuditEvent) -> Result<()> {
            let _ = self.0.send(event.clone());
            Ok(())
        }
    }

    struct BlockedSink {
        started: Arc<AtomicUsize>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl AuditSink for BlockedSink {
        async fn write(&self, _event: &AuditEvent) -> Result<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            Ok(())
        }
    }

    struct FlakySink {
        calls: AtomicUsize,
        tx: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl AuditSink for FlakySink {
        async fn write(&self, event: &AuditEvent) -> Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(SearchError::Other("sink offline".to_string()));
            }
            let _ = self.tx.send(event.event_type.clone());
            Ok(())
        }
    }

    #[test]
    fn test_event_serialization() {
        let event = AuditEvent::new("tool_invocation", json!({"tool": "search"}))
            .with_correlation_id("req-1");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], "tool_invocation");
        assert_eq!(value["service"], "plaza");
        assert_eq!(value["payload"]["tool"], "search");
        assert_eq!(value["correlation_id"], "req-1");
    }

    #[test]
    fn test_event_without_correlation_id() {
        let event = AuditEvent::new("x", Value::Null);
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("correlation_id"));
    }

    #[tokio::test]
    async fn test_events_reach_sink() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let log = AuditLog::new(ChannelSink(tx), 8);
        log.record(AuditEvent::new("first", Value::Null));
        log.record(AuditEvent::new("second", Value::Null));

        assert_eq!(rx.recv().await.unwrap().event_type, "first");
        assert_eq!(rx.recv().await.unwrap().event_type, "second");
        assert_eq!(log.dropped(), 0);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let started = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());
        let log = AuditLog::new(
            BlockedSink {
                started: Arc::clone(&started),
                release: Arc::clone(&release),
            },
            1,
        );

        log.record(AuditEvent::new("in-flight", Value::Null));
        while started.load(Ordering::SeqCst) < 1 {
            tokio::task::yield_now().await;
        }
        log.record(AuditEvent::new("queued", Value::Null));
        log.record(AuditEvent::new("overflow", Value::Null));

        assert_eq!(log.dropped(), 1);
        release.notify_one();
    }

    #[tokio::test]
    async fn test_sink_errors_are_swallowed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let log = AuditLog::new(
            FlakySink {
                calls: AtomicUsize::new(0),
                tx,
            },
            8,
        );
        log.record(AuditEvent::new("lost", Value::Null));
        log.record(AuditEvent::new("kept", Value::Null));

        assert_eq!(rx.recv().await.unwrap(), "kept");
        assert_eq!(log.dropped(), 0);
    }

    #[tokio::test]
    async fn test_tracing_sink() {
        let event = AuditEvent::new("search_completed", json!({"total_results": 3}));
        assert!(TracingSink.write(&event).await.is_ok());
    }
}
