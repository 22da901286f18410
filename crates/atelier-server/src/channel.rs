//! Bidirectional framed message channel, decoupled from the transport.
//!
//! Outbound envelopes are enqueued in send order on an unbounded queue the
//! transport pump drains. Close fires exactly once; sending afterwards is
//! an error, never a panic.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use atelier_shared::protocol::Envelope;

use crate::error::BrokerError;

struct Shared {
    outbound: mpsc::UnboundedSender<Envelope>,
    closed: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct Channel {
    shared: Arc<Shared>,
}

impl Channel {
    /// Returns the channel handle and the outbound queue the transport
    /// pump must drain.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        (
            Self {
                shared: Arc::new(Shared { outbound, closed }),
            },
            rx,
        )
    }

    pub fn send(&self, envelope: Envelope) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::ChannelClosed);
        }
        self.shared
            .outbound
            .send(envelope)
            .map_err(|_| BrokerError::ChannelClosed)
    }

    /// Idempotent; wakes every task waiting in [`closed`](Channel::closed).
    pub fn close(&self) {
        self.shared.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.shared.closed.borrow()
    }

    /// Resolves once the channel is closed; immediately if it already is.
    pub async fn closed(&self) {
        let mut rx = self.shared.closed.subscribe();
        // wait_for checks the current value before awaiting a change
        let _ = rx.wait_for(|closed| *closed).await;
    }
}
