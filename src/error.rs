use thiserror::Error;

/// Result type for HEOS operations
pub type Result<T> = std::result::Result<T, HeosError>;

/// Errors that can occur when talking to HEOS players
#[derive(Error, Debug)]
pub enum HeosError {
    /// A connection could not be established or was lost
    #[error("Connection error: {0}")]
    Connection(String),

    /// The session was torn down while a caller was waiting
    #[error("Connection closed")]
    ConnectionClosed,

    /// No terminal response arrived in time
    #[error("Command timeout")]
    Timeout,

    /// The device rejected a command
    #[error("Command failed '{command}': {text}")]
    Command {
        /// Command name, e.g. `player/set_volume`
        command: String,
        /// Device reported error id (`eid`)
        error_id: Option<i32>,
        /// Device reported error text
        text: String,
    },

    /// A command helper refused its arguments before sending anything
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid or unexpected response from the device
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel receive error
    #[error("Channel error: {0}")]
    ChannelError(String),
}

impl HeosError {
    /// Whether the error is fatal to the session and requires a reconnect
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            HeosError::Connection(_) | HeosError::ConnectionClosed | HeosError::Io(_)
        )
    }
}
