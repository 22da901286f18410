//! The broker bundles all process-wide state (credentials, rooms, relay)
//! under one value constructed at startup, and orchestrates the membership
//! lifecycle around them.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use atelier_shared::methods;
use atelier_shared::protocol::{Envelope, MessageId};
use atelier_shared::types::{PreparedRoom, PublicPeer, RoomClaim, RoomId, User};

use crate::auth::{secure_id, Credentials};
use crate::config::ServerConfig;
use crate::error::BrokerError;
use crate::peer::Peer;
use crate::relay::MessageRelay;
use crate::rooms::{Room, RoomManager};

pub struct Broker {
    pub config: ServerConfig,
    pub credentials: Credentials,
    pub rooms: RoomManager,
    pub relay: MessageRelay,
}

fn projection_params(info: &PublicPeer) -> Vec<Value> {
    // PublicPeer serialization is infallible
    vec![serde_json::to_value(info).expect("peer projection serialization")]
}

impl Broker {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let credentials = Credentials::new(config.jwt_secret.clone(), config.auth_timeout);
        let relay = MessageRelay::new(config.request_timeout);
        Arc::new(Self {
            config,
            credentials,
            rooms: RoomManager::new(),
            relay,
        })
    }

    /// Issue a room id and the host claim that will later create it.
    ///
    /// The room itself does not exist until the host connects; until then
    /// the id lives only inside the signed token.
    pub fn prepare_room(&self, user: &User) -> Result<PreparedRoom, BrokerError> {
        let id = RoomId(secure_id());
        let claim = RoomClaim {
            room: id.clone(),
            user: user.clone(),
            host: true,
        };
        let jwt = self.credentials.generate_jwt(&claim)?;
        info!(room = %id, user = %user.id, "room prepared");
        Ok(PreparedRoom { id, jwt })
    }

    /// Admit a connected peer into its claimed room.
    ///
    /// Hosts create the room; guests append to an existing one. Either way
    /// the peer is indexed, told its own public identity via `peer/info`,
    /// and watched for disconnect.
    pub async fn join(
        self: &Arc<Self>,
        peer: Arc<Peer>,
        room_id: RoomId,
        host: bool,
    ) -> Result<Arc<Room>, BrokerError> {
        let room = if host {
            self.rooms.install(room_id, Arc::clone(&peer)).await?
        } else {
            self.rooms.add_guest(&room_id, Arc::clone(&peer)).await?
        };

        let info = peer.public_info();
        let _ = self
            .relay
            .send_notification(&peer, methods::PEER_INFO, projection_params(&info));

        if !host {
            self.relay
                .fan_out(&room, peer.id, methods::ROOM_JOINED, projection_params(&info))
                .await;
        }

        let broker = Arc::clone(self);
        let watched = Arc::clone(&peer);
        tokio::spawn(async move {
            watched.channel.closed().await;
            broker.handle_disconnect(&watched).await;
        });

        Ok(room)
    }

    /// Ask the room host to admit `user`; on consent, sign a guest claim.
    pub async fn request_join(
        &self,
        room: &Arc<Room>,
        user: &User,
    ) -> Result<String, BrokerError> {
        let join_user = methods::JoinUser {
            name: user.name.clone(),
            email: user.email.clone(),
        };
        let params = vec![serde_json::to_value(join_user).expect("join user serialization")];

        match self
            .relay
            .send_request(room.host(), methods::PEER_JOIN, params)
            .await
        {
            Ok(answer) if answer.as_bool() == Some(true) => {
                let claim = RoomClaim {
                    room: room.id.clone(),
                    user: user.clone(),
                    host: false,
                };
                self.credentials.generate_jwt(&claim)
            }
            Ok(answer) => {
                if answer.as_bool().is_none() {
                    warn!(room = %room.id, "non-boolean peer/join answer, treating as rejection");
                }
                Err(BrokerError::JoinRejected)
            }
            Err(BrokerError::RequestTimeout) => Err(BrokerError::JoinTimeout),
            Err(BrokerError::Remote(_)) => Err(BrokerError::JoinRejected),
            Err(BrokerError::ChannelClosed) => Err(BrokerError::RoomNotFound(room.id.clone())),
            Err(e) => Err(e),
        }
    }

    /// Tear a room down: unindex every member, reject their outstanding
    /// requests, broadcast `room/closed`, then close the channels.
    ///
    /// Idempotent: closing an unknown or already-closed room is a no-op.
    pub async fn close_room(&self, id: &RoomId) {
        let Some(room) = self.rooms.remove_room(id).await else {
            return;
        };

        let members = room.peers().await;
        for member in &members {
            self.rooms.unindex_peer(member.id).await;
            self.relay.drain_peer(member.id);
        }

        // Best-effort: the close broadcast is queued before the channels
        // are closed, the transport pump drains whatever it can.
        self.relay
            .deliver(&members, room.host().id, methods::ROOM_CLOSED, vec![]);
        for member in &members {
            member.channel.close();
        }

        info!(room = %id, members = members.len(), "room closed");
    }

    /// Channel-close handler for one peer: a host takes its room down with
    /// it, a guest leaves and is announced. Safe to call more than once.
    pub async fn handle_disconnect(&self, peer: &Arc<Peer>) {
        self.relay.drain_peer(peer.id);

        // Already-removed peers were handled by a concurrent teardown
        let Some(room) = self.rooms.room_for_peer(peer.id).await else {
            return;
        };

        if room.host().id == peer.id {
            self.close_room(&room.id).await;
        } else {
            if self.rooms.remove_peer(peer.id).await.is_none() {
                return;
            }
            self.relay
                .fan_out(
                    &room,
                    peer.id,
                    methods::ROOM_LEFT,
                    projection_params(&peer.public_info()),
                )
                .await;
            info!(room = %room.id, peer = %peer.id, "guest left");
        }
    }

    /// Classify one inbound envelope from `origin` and route it.
    pub async fn handle_envelope(&self, origin: &Arc<Peer>, envelope: Envelope) {
        match envelope {
            e @ (Envelope::Response { .. } | Envelope::ResponseError { .. }) => {
                self.relay.push_response(e);
            }
            Envelope::Request {
                id, method, params, ..
            } => {
                self.forward_request(origin, id, method, params).await;
            }
            Envelope::Notification { method, params, .. } => {
                match self.rooms.room_for_peer(origin.id).await {
                    Some(room) => {
                        let _ = self.relay.send_notification(room.host(), &method, params);
                    }
                    None => {
                        debug!(peer = %origin.id, method = %method, "notification from roomless peer, dropping");
                    }
                }
            }
            Envelope::Broadcast { method, params, .. } => {
                // The origin's id is stamped server-side; whatever the
                // client put in clientId is discarded.
                match self.rooms.room_for_peer(origin.id).await {
                    Some(room) => self.relay.fan_out(&room, origin.id, &method, params).await,
                    None => {
                        debug!(peer = %origin.id, method = %method, "broadcast from roomless peer, dropping");
                    }
                }
            }
            Envelope::Error { message, .. } => {
                warn!(peer = %origin.id, message = %message, "error envelope from peer");
            }
        }
    }

    /// Relay a request to the origin's room host and write the correlated
    /// answer back on the origin's channel once it settles.
    async fn forward_request(
        &self,
        origin: &Arc<Peer>,
        id: MessageId,
        method: String,
        params: Vec<Value>,
    ) {
        let Some(room) = self.rooms.room_for_peer(origin.id).await else {
            let _ = origin.send(Envelope::response_error(
                id,
                BrokerError::NoRoom.to_string(),
            ));
            return;
        };

        match self.relay.dispatch_request(room.host(), &method, params) {
            Ok(settlement) => {
                // Settling can take up to the request timeout; answer from
                // a task so the origin's inbound loop keeps running.
                let origin = Arc::clone(origin);
                tokio::spawn(async move {
                    let answer = match settlement.settle().await {
                        Ok(value) => Envelope::response(id, value),
                        Err(e) => Envelope::response_error(id, e.to_string()),
                    };
                    let _ = origin.send(answer);
                });
            }
            Err(e) => {
                let _ = origin.send(Envelope::response_error(id, e.to_string()));
            }
        }
    }

    /// Login page link embedding the confirm token.
    pub fn login_url(&self, confirm_token: &str) -> String {
        format!("{}/login?token={confirm_token}", self.config.base_url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_shared::types::UserId;
    use tokio::sync::mpsc::UnboundedReceiver;

    use crate::channel::Channel;

    fn test_broker() -> Arc<Broker> {
        Broker::new(ServerConfig {
            jwt_secret: Some("test-secret".into()),
            ..ServerConfig::default()
        })
    }

    fn user(name: &str) -> User {
        User {
            id: UserId(format!("uid-{name}")),
            name: name.to_string(),
            email: None,
        }
    }

    fn connected_peer(name: &str) -> (Arc<Peer>, UnboundedReceiver<Envelope>) {
        let (channel, rx) = Channel::new();
        (Arc::new(Peer::new(user(name), channel)), rx)
    }

    #[tokio::test]
    async fn test_prepare_room_signs_a_host_claim() {
        let broker = test_broker();
        let alice = user("alice");
        let prepared = broker.prepare_room(&alice).unwrap();

        assert_eq!(prepared.id.0.len(), 24);
        let claim: RoomClaim = broker.credentials.verify_jwt(&prepared.jwt).unwrap();
        assert_eq!(claim.room, prepared.id);
        assert_eq!(claim.user, alice);
        assert!(claim.host);
    }

    #[tokio::test]
    async fn test_join_notifies_own_identity() {
        let broker = test_broker();
        let (host, mut host_rx) = connected_peer("alice");
        let prepared = broker.prepare_room(&host.user).unwrap();

        broker
            .join(Arc::clone(&host), prepared.id, true)
            .await
            .unwrap();

        match host_rx.recv().await.unwrap() {
            Envelope::Notification { method, params, .. } => {
                assert_eq!(method, methods::PEER_INFO);
                let info: PublicPeer = serde_json::from_value(params[0].clone()).unwrap();
                assert_eq!(info.id, host.id);
            }
            other => panic!("expected peer/info, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_roomless_request_gets_response_error() {
        let broker = test_broker();
        let (stray, mut rx) = connected_peer("stray");

        broker
            .handle_envelope(
                &stray,
                Envelope::request(MessageId::Number(1), methods::PEER_INIT, vec![]),
            )
            .await;

        match rx.recv().await.unwrap() {
            Envelope::ResponseError { id, .. } => assert_eq!(id, MessageId::Number(1)),
            other => panic!("expected response-error, got {other:?}"),
        }
    }
}
