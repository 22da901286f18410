//! Stable method namespace.
//!
//! Every method string the protocol carries is declared here exactly once,
//! together with its typed params and result. The broker itself treats
//! methods opaquely except for [`PEER_JOIN`], which drives guest admission.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::PROTOCOL_VERSION;
use crate::types::PublicPeer;

/// Request, host-only handler: params `[JoinUser]`, returns `bool`
pub const PEER_JOIN: &str = "peer/join";

/// Notification to a newly joined peer: params `[PublicPeer]` (its own projection)
pub const PEER_INFO: &str = "peer/info";

/// Request: params `[InitRequest]`, returns [`InitResponse`]
pub const PEER_INIT: &str = "peer/init";

/// Broadcast: params `[PublicPeer]`
pub const ROOM_JOINED: &str = "room/joined";

/// Broadcast: params `[PublicPeer]`
pub const ROOM_LEFT: &str = "room/left";

/// Broadcast: no params; the room is gone and channels are about to close
pub const ROOM_CLOSED: &str = "room/closed";

/// Broadcast: params `[Permissions]`
pub const ROOM_PERMISSIONS_UPDATED: &str = "room/permissionsUpdated";

/// Broadcast: params `[EditorUpdate]`
pub const EDITOR_UPDATE: &str = "editor/update";

/// Broadcast: params `[EditorPresence]`
pub const EDITOR_PRESENCE: &str = "editor/presence";

/// Request: params `[path]`, returns [`FileStat`]
pub const FS_STAT: &str = "fileSystem/stat";

/// Request: params `[path]`
pub const FS_MKDIR: &str = "fileSystem/mkdir";

/// Request: params `[path]`, returns file content
pub const FS_READ_FILE: &str = "fileSystem/readFile";

/// Request: params `[path, content]`
pub const FS_WRITE_FILE: &str = "fileSystem/writeFile";

/// Request: params `[path]`, returns `[DirEntry]`
pub const FS_READ_DIR: &str = "fileSystem/readDir";

/// Request: params `[path]`
pub const FS_DELETE: &str = "fileSystem/delete";

/// Request: params `[from, to]`
pub const FS_RENAME: &str = "fileSystem/rename";

/// Public user fields carried by the `peer/join` admission request.
///
/// Never includes the server-side user id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinUser {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// What a guest may do with the host's workspace.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Permissions {
    pub write: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitRequest {
    pub protocol: String,
    #[serde(default)]
    pub capabilities: Value,
}

/// Host's answer to `peer/init`: everything a fresh guest needs to render
/// the shared workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitResponse {
    pub protocol: String,
    pub host: PublicPeer,
    pub guests: Vec<PublicPeer>,
    pub permissions: Permissions,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default)]
    pub workspace: Value,
}

impl InitResponse {
    pub fn new(host: PublicPeer, guests: Vec<PublicPeer>, permissions: Permissions) -> Self {
        Self {
            protocol: PROTOCOL_VERSION.to_string(),
            host,
            guests,
            permissions,
            capabilities: Value::Null,
            workspace: Value::Null,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditorUpdate {
    pub path: String,
    pub content: Value,
}

/// Cursor and selection presence for one participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditorPresence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub selections: Vec<Selection>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Selection {
    pub anchor: u64,
    pub active: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Directory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStat {
    pub kind: FileKind,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub kind: FileKind,
}
