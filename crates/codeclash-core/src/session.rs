use serde::{Deserialize, Serialize};

/// Lifecycle phase of the game session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Lobby,
    InRound,
    Finished,
}

/// Identifies one round of one session. Timer expiries and sandbox results
/// carry the key they were issued for and are dropped when it no longer
/// matches the live round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoundKey {
    pub epoch: u64,
    pub question: usize,
}
