use std::fmt;

/// Identifier of one managed room, stable for the room's whole life.
///
/// Assigned once at room creation and persisted in the profile file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RoomId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a supervised game-server process.
///
/// `Zipping` is an auxiliary marker used while a backup archive of the
/// (closed) server directory is being produced; the process itself only
/// ever cycles Closed -> Starting -> Running -> Stopping -> Closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ServerState {
    #[serde(rename = "STARTING")]
    Starting,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "STOPPING")]
    Stopping,
    #[serde(rename = "ZIPPING")]
    Zipping,
    #[serde(rename = "CLOSED")]
    Closed,
}

impl ServerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerState::Starting => "STARTING",
            ServerState::Running => "RUNNING",
            ServerState::Stopping => "STOPPING",
            ServerState::Zipping => "ZIPPING",
            ServerState::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upstream distribution a room's server binary comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ServerType {
    #[serde(rename = "VANILLA")]
    Vanilla,
    #[serde(rename = "PAPERMC")]
    Paper,
}

impl ServerType {
    pub fn all() -> [ServerType; 2] {
        [ServerType::Vanilla, ServerType::Paper]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServerType::Vanilla => "VANILLA",
            ServerType::Paper => "PAPERMC",
        }
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the aggregate room list exposed to list-level subscribers.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RoomSummary {
    pub id: RoomId,
    pub name: String,
    #[serde(rename = "server-type")]
    pub server_type: ServerType,
    #[serde(rename = "version-id")]
    pub version_id: String,
    pub state: ServerState,
}

/// Full serializable view of a single room, including notification emails.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RoomInfo {
    pub id: RoomId,
    pub name: String,
    pub emails: Vec<String>,
    #[serde(rename = "server-type")]
    pub server_type: ServerType,
    #[serde(rename = "version-id")]
    pub version_id: String,
    pub state: ServerState,
}
