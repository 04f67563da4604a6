//! Buffering of client log events for forwarding to the host.

use std::{
    collections::VecDeque,
    fmt::Write as _,
    sync::{Arc, Mutex, PoisonError},
    time::{SystemTime, UNIX_EPOCH},
};

use native_app_core::{LogEntry, LogLevel, NativeAppRpc, RpcError};
use tracing::{
    Event, Level, Subscriber,
    field::{Field, Visit},
};
use tracing_subscriber::{Layer, layer::Context};

struct Inner {
    entries: VecDeque<LogEntry>,
    dropped: u64,
}

/// Bounded buffer of log entries awaiting delivery to the host.
///
/// When full, the oldest entry is evicted.
#[derive(Clone)]
pub struct LogBuffer {
    inner: Arc<Mutex<Inner>>,
    capacity: usize,
}

impl LogBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: VecDeque::with_capacity(capacity.min(64)),
                dropped: 0,
            })),
            capacity: capacity.max(1),
        }
    }

    /// Append an entry, evicting the oldest when full.
    pub fn push(&self, entry: LogEntry) {
        let mut inner = self.lock();
        while inner.entries.len() >= self.capacity {
            inner.entries.pop_front();
            inner.dropped += 1;
        }
        inner.entries.push_back(entry);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Entries evicted since creation.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    /// Layer capturing `tracing` events into this buffer.
    #[must_use]
    pub fn layer(&self) -> HostLogLayer {
        HostLogLayer {
            buffer: self.clone(),
        }
    }

    /// Send every buffered entry to the host.
    ///
    /// # Errors
    /// Returns the host error; the entries are put back for a later attempt.
    pub async fn flush(&self, rpc: &dyn NativeAppRpc) -> Result<usize, RpcError> {
        let entries: Vec<_> = self.lock().entries.drain(..).collect();
        if entries.is_empty() {
            return Ok(0);
        }
        let count = entries.len();
        if let Err(e) = rpc.log_messages(entries.clone()).await {
            let mut inner = self.lock();
            for entry in entries.into_iter().rev() {
                inner.entries.push_front(entry);
            }
            while inner.entries.len() > self.capacity {
                inner.entries.pop_front();
                inner.dropped += 1;
            }
            return Err(e);
        }
        Ok(count)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// `tracing` layer feeding a [`LogBuffer`].
pub struct HostLogLayer {
    buffer: LogBuffer,
}

impl<S: Subscriber> Layer<S> for HostLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        self.buffer.push(LogEntry {
            timestamp: now_millis(),
            level: level_of(*metadata.level()),
            category: metadata.target().to_owned(),
            message: visitor.finish(),
        });
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.trim_start().to_owned()
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={value}", field.name());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={value:?}", field.name());
        }
    }
}

const fn level_of(level: Level) -> LogLevel {
    match level {
        Level::TRACE => LogLevel::Trace,
        Level::DEBUG => LogLevel::Debug,
        Level::INFO => LogLevel::Info,
        Level::WARN => LogLevel::Warning,
        _ => LogLevel::Error,
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use native_app_core::EventHub;
    use tracing_subscriber::layer::SubscriberExt;

    use super::*;
    use crate::host::MemoryHost;

    fn entry(message: &str) -> LogEntry {
        LogEntry {
            timestamp: 0,
            level: LogLevel::Info,
            category: "test".into(),
            message: message.into(),
        }
    }

    #[test]
    fn evicts_oldest_when_full() {
        let buffer = LogBuffer::new(2);
        buffer.push(entry("a"));
        buffer.push(entry("b"));
        buffer.push(entry("c"));
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.dropped(), 1);
    }

    #[test]
    fn layer_captures_message_and_fields() {
        let buffer = LogBuffer::new(10);
        let subscriber = tracing_subscriber::registry().with(buffer.layer());
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(target: "bridge", key = "prefs", "storage closed");
        });

        let entries = buffer.inner.lock().unwrap().entries.clone();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].level, LogLevel::Warning);
        assert_eq!(entries[0].category, "bridge");
        assert_eq!(entries[0].message, "storage closed key=prefs");
    }

    #[tokio::test]
    async fn flush_drains_to_host() {
        let host = MemoryHost::new(Arc::new(EventHub::new()));
        let buffer = LogBuffer::new(10);
        buffer.push(entry("a"));
        buffer.push(entry("b"));

        assert_eq!(buffer.flush(&host).await.unwrap(), 2);
        assert!(buffer.is_empty());
        assert_eq!(host.logged().len(), 2);
        assert_eq!(buffer.flush(&host).await.unwrap(), 0);
        assert_eq!(host.calls_to("log_messages"), 1);
    }

    #[tokio::test]
    async fn failed_flush_keeps_entries() {
        let host = MemoryHost::new(Arc::new(EventHub::new()));
        host.fail_on("log_messages");
        let buffer = LogBuffer::new(10);
        buffer.push(entry("a"));

        assert!(buffer.flush(&host).await.is_err());
        assert_eq!(buffer.len(), 1);
    }
}
