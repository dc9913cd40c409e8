use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier assigned to a connection when it is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Maximum display name length, in characters.
pub const MAX_NAME_LEN: usize = 32;

/// Where a participant stands in the current round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParticipantStatus {
    Playing,
    Passed,
    Eliminated,
}

/// A connection that has joined the session under a display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: ConnectionId,
    pub display_name: String,
    pub status: ParticipantStatus,
    /// Set while this round's submission is in the sandbox.
    pub evaluating: bool,
}

impl Participant {
    pub fn new(id: ConnectionId, display_name: String) -> Self {
        Self {
            id,
            display_name,
            status: ParticipantStatus::Playing,
            evaluating: false,
        }
    }

    /// Survivors are every participant not yet eliminated.
    pub fn is_survivor(&self) -> bool {
        self.status != ParticipantStatus::Eliminated
    }

    pub fn name_matches(&self, other: &str) -> bool {
        self.display_name.to_lowercase() == other.to_lowercase()
    }
}

/// Trim a requested display name and check it is usable.
pub fn normalize_display_name(raw: &str) -> Option<String> {
    let name = raw.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN || name.chars().any(char::is_control)
    {
        return None;
    }
    Some(name.to_string())
}
