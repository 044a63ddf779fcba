use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};
use tracing::warn;

use super::types::Event;

#[derive(Debug, thiserror::Error)]
#[error("event sink {sink} failed: {message}")]
pub struct EventSinkError {
    pub sink: &'static str,
    pub message: String,
}

#[async_trait]
pub trait EventSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn write(&self, event: &Event) -> Result<(), EventSinkError>;
}

/// Fan-out point for request summaries and operational events.
///
/// Subscribers get a broadcast receiver (lagging receivers drop old events);
/// sinks are invoked on their own task so a slow sink never stalls dispatch.
#[derive(Clone)]
pub struct EventHub {
    inner: Arc<Inner>,
}

struct Inner {
    tx: broadcast::Sender<Event>,
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl EventHub {
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self {
            inner: Arc::new(Inner {
                tx,
                sinks: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.tx.subscribe()
    }

    pub async fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.inner.sinks.write().await.push(sink);
    }

    pub async fn emit(&self, event: Event) {
        // No subscribers is not an error.
        let _ = self.inner.tx.send(event.clone());
        let sinks = self.inner.sinks.read().await.clone();
        for sink in sinks {
            let event = event.clone();
            tokio::spawn(async move {
                if let Err(err) = sink.write(&event).await {
                    warn!(sink = sink.name(), error = %err, "event sink write failed");
                }
            });
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(switchyard_common::EngineConfig::default().event_buffer)
    }
}
