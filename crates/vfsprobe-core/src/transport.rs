//! Event transport: bounded, non-blocking channel to the consumer
//!
//! The producer half never waits. A full channel rejects the event and the
//! caller decides what to count; nothing is retried.

use crate::events::CompletedOperationEvent;
use thiserror::Error;
use tokio::sync::mpsc;

/// Default transport capacity in events
pub const DEFAULT_TRANSPORT_CAPACITY: usize = 4096;

/// Emit errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EmitError {
    #[error("Transport full")]
    Full,

    #[error("Transport closed")]
    Closed,
}

/// Destination for completed events
pub trait EventSink: Send + Sync {
    /// Enqueue without blocking
    fn emit(&self, event: CompletedOperationEvent) -> Result<(), EmitError>;
}

/// Producer half of a bounded mpsc channel
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::Sender<CompletedOperationEvent>,
}

impl EventSink for ChannelTransport {
    fn emit(&self, event: CompletedOperationEvent) -> Result<(), EmitError> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EmitError::Full,
            mpsc::error::TrySendError::Closed(_) => EmitError::Closed,
        })
    }
}

/// Consumer half of the transport
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<CompletedOperationEvent>,
}

impl EventReceiver {
    /// Wait for the next event; `None` once every producer is gone
    pub async fn recv(&mut self) -> Option<CompletedOperationEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<CompletedOperationEvent> {
        self.rx.try_recv().ok()
    }

    /// Take everything currently queued without waiting
    pub fn drain_ready(&mut self) -> Vec<CompletedOperationEvent> {
        let mut events = Vec::with_capacity(self.rx.len());
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Stop accepting events; already queued events can still be received
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// Create a bounded transport holding at most `capacity` events
pub fn channel(capacity: usize) -> (ChannelTransport, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChannelTransport { tx }, EventReceiver { rx })
}
