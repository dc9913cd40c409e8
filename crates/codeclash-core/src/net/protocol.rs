use super::messages::{ClientMessage, ServerMessage};

/// Maximum inbound frame size in bytes.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024; // 64 KiB

#[derive(Debug)]
pub enum ProtocolError {
    EmptyMessage,
    PayloadTooLarge(usize),
    SerializeError(String),
    DeserializeError(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::PayloadTooLarge(size) => {
                write!(
                    f,
                    "payload too large: {size} bytes (max {MAX_MESSAGE_SIZE})"
                )
            },
            Self::SerializeError(e) => write!(f, "serialize error: {e}"),
            Self::DeserializeError(e) => write!(f, "deserialize error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Encode a `ServerMessage` as a JSON text frame.
pub fn encode_server_message(msg: &ServerMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::SerializeError(e.to_string()))
}

/// Encode a `ClientMessage` as a JSON text frame.
pub fn encode_client_message(msg: &ClientMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::SerializeError(e.to_string()))
}

fn check_frame(data: &str) -> Result<(), ProtocolError> {
    if data.trim().is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(data.len()));
    }
    Ok(())
}

/// Decode a text frame into a `ClientMessage`.
pub fn decode_client_message(data: &str) -> Result<ClientMessage, ProtocolError> {
    check_frame(data)?;
    serde_json::from_str(data).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
}

/// Decode a text frame into a `ServerMessage`.
pub fn decode_server_message(data: &str) -> Result<ServerMessage, ProtocolError> {
    check_frame(data)?;
    serde_json::from_str(data).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
}
