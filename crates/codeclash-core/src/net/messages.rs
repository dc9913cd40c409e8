use serde::{Deserialize, Serialize};

/// Join the lobby under a display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinMsg {
    pub player_name: String,
}

/// Submit code for the question with index `q_num`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitMsg {
    pub q_num: usize,
    pub code: String,
}

/// Messages sent from a client to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    Join(JoinMsg),
    Submit(SubmitMsg),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitingStartMsg {
    pub players: Vec<String>,
}

/// A question going live. `time_left` is in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionMsg {
    pub q_num: usize,
    pub total_q: usize,
    pub description: String,
    pub time_left: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_template: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameOverMsg {
    pub winners: Vec<String>,
    pub losers: Vec<String>,
}

/// Session status as seen by one client, discriminated by `state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state")]
pub enum Status {
    WaitingStart(WaitingStartMsg),
    GameAlreadyStarted,
    PlayerAlreadyJoined,
    Question(QuestionMsg),
    Passed,
    Eliminated,
    GameOver(GameOverMsg),
}

/// Messages sent from the server to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    Status(Status),
}
