use thiserror::Error;

/// Why a cursor could not be produced or resumed.
///
/// Strategies never surface decode failures; they log them and restart.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CursorError {
    #[error("Cursor is not valid base64 or is truncated: {0}")]
    Malformed(String),

    #[error("Cursor failed authentication")]
    Decrypt,

    #[error("Cursor for session {session_id} has expired")]
    Expired { session_id: String },

    #[error("Failed to encode cursor: {0}")]
    Encode(String),
}
