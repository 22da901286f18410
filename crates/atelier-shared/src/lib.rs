// Wire protocol and shared types for the Atelier collaboration broker.

pub mod constants;
pub mod methods;
pub mod protocol;
pub mod types;

pub use protocol::{Envelope, MessageId, ProtocolError};
pub use types::{PeerId, PreparedRoom, PublicPeer, RoomClaim, RoomId, User, UserId};
