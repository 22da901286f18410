use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Live connection identity, fresh per accepted transport
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PeerId(pub Uuid);

impl PeerId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RoomId(pub String);

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct UserId(pub String);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identity registered at login, valid for the broker lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Projection of a peer advertised to other room members.
///
/// Carries the connection id, never the server-side user id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicPeer {
    pub id: PeerId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Signed token payload authorising one user to connect to one room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomClaim {
    pub room: RoomId,
    pub user: User,
    pub host: bool,
}

/// Room id plus the host's connect token, issued before the room exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparedRoom {
    pub id: RoomId,
    pub jwt: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_email_omitted_when_absent() {
        let user = User {
            id: UserId("u1".into()),
            name: "Alice".into(),
            email: None,
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("email"));
    }

    #[test]
    fn test_room_claim_roundtrip() {
        let claim = RoomClaim {
            room: RoomId("r".repeat(24)),
            user: User {
                id: UserId("u1".into()),
                name: "Alice".into(),
                email: Some("alice@example.com".into()),
            },
            host: true,
        };
        let json = serde_json::to_string(&claim).unwrap();
        let restored: RoomClaim = serde_json::from_str(&json).unwrap();
        assert_eq!(claim, restored);
    }
}
