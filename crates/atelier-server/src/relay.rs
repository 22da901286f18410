//! Request correlation and fan-out.
//!
//! The relay owns the table of outstanding relayed requests. Each entry is
//! keyed by a broker-chosen correlation id and carries the target peer, a
//! one-shot settlement, and an eviction timer; settling an entry always
//! cancels its timer and removes it from the table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use atelier_shared::protocol::{Envelope, MessageId};
use atelier_shared::types::PeerId;

use crate::auth::secure_id;
use crate::error::BrokerError;
use crate::peer::Peer;
use crate::rooms::Room;

struct PendingRequest {
    target: PeerId,
    settle: oneshot::Sender<Result<Value, BrokerError>>,
    timer: JoinHandle<()>,
}

impl PendingRequest {
    fn dispose(self, outcome: Result<Value, BrokerError>) {
        self.timer.abort();
        let _ = self.settle.send(outcome);
    }
}

/// Pending answer to a dispatched request.
pub struct Settlement {
    rx: oneshot::Receiver<Result<Value, BrokerError>>,
}

impl Settlement {
    /// Exactly one of response, remote error, timeout, or channel-closed
    /// resolves this.
    pub async fn settle(self) -> Result<Value, BrokerError> {
        self.rx.await.unwrap_or(Err(BrokerError::ChannelClosed))
    }
}

pub struct MessageRelay {
    pending: Arc<Mutex<HashMap<String, PendingRequest>>>,
    request_timeout: Duration,
}

impl MessageRelay {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            request_timeout,
        }
    }

    /// Enqueue a request on `target` under a fresh correlation id.
    ///
    /// The send happens before this returns, so sequential dispatches to
    /// one target arrive in dispatch order. Fails immediately when the
    /// target's channel is closed.
    pub fn dispatch_request(
        &self,
        target: &Peer,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Settlement, BrokerError> {
        if target.channel.is_closed() {
            return Err(BrokerError::ChannelClosed);
        }

        let correlation = secure_id();
        let (tx, rx) = oneshot::channel();

        let timer = {
            let pending = Arc::clone(&self.pending);
            let correlation = correlation.clone();
            let timeout = self.request_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let expired = pending
                    .lock()
                    .expect("pending request lock poisoned")
                    .remove(&correlation);
                if let Some(entry) = expired {
                    warn!(id = %correlation, target = %entry.target, "relayed request timed out");
                    let _ = entry.settle.send(Err(BrokerError::RequestTimeout));
                }
            })
        };

        self.pending
            .lock()
            .expect("pending request lock poisoned")
            .insert(
                correlation.clone(),
                PendingRequest {
                    target: target.id,
                    settle: tx,
                    timer,
                },
            );

        let envelope = Envelope::request(MessageId::Text(correlation.clone()), method, params);
        if let Err(e) = target.send(envelope) {
            if let Some(entry) = self
                .pending
                .lock()
                .expect("pending request lock poisoned")
                .remove(&correlation)
            {
                entry.timer.abort();
            }
            return Err(e);
        }

        Ok(Settlement { rx })
    }

    /// Dispatch and wait for the answer.
    pub async fn send_request(
        &self,
        target: &Peer,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Value, BrokerError> {
        self.dispatch_request(target, method, params)?.settle().await
    }

    /// Correlate an inbound response with its pending entry.
    ///
    /// Late and duplicate responses are dropped silently.
    pub fn push_response(&self, envelope: Envelope) {
        let (id, outcome) = match envelope {
            Envelope::Response { id, response, .. } => (id, Ok(response)),
            Envelope::ResponseError { id, message, .. } => (id, Err(BrokerError::Remote(message))),
            _ => return,
        };

        let MessageId::Text(correlation) = id else {
            debug!(id = %id, "response with non-relay id, dropping");
            return;
        };

        let entry = self
            .pending
            .lock()
            .expect("pending request lock poisoned")
            .remove(&correlation);
        match entry {
            Some(entry) => entry.dispose(outcome),
            None => debug!(id = %correlation, "late or duplicate response, dropping"),
        }
    }

    /// Fire-and-forget delivery.
    pub fn send_notification(
        &self,
        target: &Peer,
        method: &str,
        params: Vec<Value>,
    ) -> Result<(), BrokerError> {
        target.send(Envelope::notification(method, params))
    }

    /// Deliver to every room peer except `origin`, in peers-list order
    /// (host first, then guests in join order).
    pub async fn fan_out(&self, room: &Room, origin: PeerId, method: &str, params: Vec<Value>) {
        let peers = room.peers().await;
        self.deliver(&peers, origin, method, params);
    }

    /// Broadcast over an explicit member snapshot, skipping `origin`.
    pub fn deliver(&self, peers: &[Arc<Peer>], origin: PeerId, method: &str, params: Vec<Value>) {
        let envelope = Envelope::broadcast(origin, method, params);
        for peer in peers {
            if peer.id == origin {
                continue;
            }
            if peer.send(envelope.clone()).is_err() {
                debug!(peer = %peer.id, "skipping broadcast to closed channel");
            }
        }
    }

    /// Reject every pending request addressed to a departed peer.
    pub fn drain_peer(&self, target: PeerId) {
        let drained: Vec<PendingRequest> = {
            let mut pending = self.pending.lock().expect("pending request lock poisoned");
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, entry)| entry.target == target)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter().filter_map(|id| pending.remove(&id)).collect()
        };

        for entry in drained {
            entry.dispose(Err(BrokerError::ChannelClosed));
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .expect("pending request lock poisoned")
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_shared::types::{User, UserId};
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    use crate::channel::Channel;

    fn relay() -> MessageRelay {
        MessageRelay::new(Duration::from_secs(60))
    }

    fn peer(name: &str) -> (Arc<Peer>, UnboundedReceiver<Envelope>) {
        let (channel, rx) = Channel::new();
        let user = User {
            id: UserId(format!("uid-{name}")),
            name: name.to_string(),
            email: None,
        };
        (Arc::new(Peer::new(user, channel)), rx)
    }

    async fn next_request_id(rx: &mut UnboundedReceiver<Envelope>) -> MessageId {
        match rx.recv().await.unwrap() {
            Envelope::Request { id, .. } => id,
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_response_settles_and_clears_entry() {
        let relay = relay();
        let (host, mut host_rx) = peer("host");

        let settlement = relay
            .dispatch_request(&host, "peer/init", vec![json!({"protocol": "0.1.0"})])
            .unwrap();
        assert_eq!(relay.pending_count(), 1);

        let id = next_request_id(&mut host_rx).await;
        relay.push_response(Envelope::response(id, json!({"ok": true})));

        assert_eq!(settlement.settle().await.unwrap(), json!({"ok": true}));
        assert_eq!(relay.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_response_error_rejects_with_message() {
        let relay = relay();
        let (host, mut host_rx) = peer("host");

        let settlement = relay.dispatch_request(&host, "fileSystem/stat", vec![]).unwrap();
        let id = next_request_id(&mut host_rx).await;
        relay.push_response(Envelope::response_error(id, "no such file"));

        match settlement.settle().await {
            Err(BrokerError::Remote(message)) => assert_eq!(message, "no such file"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(relay.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_request_times_out() {
        let relay = MessageRelay::new(Duration::from_millis(20));
        let (host, _host_rx) = peer("host");

        let settlement = relay.dispatch_request(&host, "peer/init", vec![]).unwrap();
        assert!(matches!(
            settlement.settle().await,
            Err(BrokerError::RequestTimeout)
        ));
        assert_eq!(relay.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_late_response_dropped_silently() {
        let relay = MessageRelay::new(Duration::from_millis(20));
        let (host, mut host_rx) = peer("host");

        let settlement = relay.dispatch_request(&host, "peer/init", vec![]).unwrap();
        let id = next_request_id(&mut host_rx).await;
        let _ = settlement.settle().await;

        relay.push_response(Envelope::response(id, json!(1)));
        assert_eq!(relay.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_target_rejects_immediately() {
        let relay = relay();
        let (host, _host_rx) = peer("host");
        host.channel.close();

        assert!(matches!(
            relay.dispatch_request(&host, "peer/init", vec![]),
            Err(BrokerError::ChannelClosed)
        ));
        assert_eq!(relay.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_drain_peer_rejects_outstanding_requests() {
        let relay = relay();
        let (host, _host_rx) = peer("host");
        let (other, mut other_rx) = peer("other");

        let to_host = relay.dispatch_request(&host, "peer/init", vec![]).unwrap();
        let to_other = relay.dispatch_request(&other, "peer/init", vec![]).unwrap();

        relay.drain_peer(host.id);
        assert!(matches!(
            to_host.settle().await,
            Err(BrokerError::ChannelClosed)
        ));
        assert_eq!(relay.pending_count(), 1);

        // The other peer's entry is untouched
        let id = next_request_id(&mut other_rx).await;
        relay.push_response(Envelope::response(id, json!(true)));
        assert_eq!(to_other.settle().await.unwrap(), json!(true));
    }

    #[tokio::test]
    async fn test_duplicate_response_only_settles_once() {
        let relay = relay();
        let (host, mut host_rx) = peer("host");

        let settlement = relay.dispatch_request(&host, "peer/init", vec![]).unwrap();
        let id = next_request_id(&mut host_rx).await;
        relay.push_response(Envelope::response(id.clone(), json!(1)));
        relay.push_response(Envelope::response(id, json!(2)));

        assert_eq!(settlement.settle().await.unwrap(), json!(1));
        assert_eq!(relay.pending_count(), 0);
    }
}
