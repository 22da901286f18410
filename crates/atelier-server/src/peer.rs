use atelier_shared::protocol::Envelope;
use atelier_shared::types::{PeerId, PublicPeer, User};

use crate::channel::Channel;
use crate::error::BrokerError;

/// One live participant: a connection-scoped id, the authenticated user
/// behind it, and the channel to reach it. A user may hold several peers
/// at once (one per session); each peer belongs to exactly one room.
pub struct Peer {
    pub id: PeerId,
    pub user: User,
    pub channel: Channel,
}

impl Peer {
    pub fn new(user: User, channel: Channel) -> Self {
        Self {
            id: PeerId::random(),
            user,
            channel,
        }
    }

    /// Projection advertised to other room members.
    ///
    /// Exposes the connection id and display fields only; the server-side
    /// user id never leaves the broker.
    pub fn public_info(&self) -> PublicPeer {
        PublicPeer {
            id: self.id,
            name: self.user.name.clone(),
            email: self.user.email.clone(),
        }
    }

    pub fn send(&self, envelope: Envelope) -> Result<(), BrokerError> {
        self.channel.send(envelope)
    }
}
