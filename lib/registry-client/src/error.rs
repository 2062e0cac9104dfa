use registry_api::wire::Code;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

/// Failure of one registry client call.
///
/// Cloneable so a single dial outcome can be handed to every caller that
/// joined it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    #[error("Dial error for {target}: {message}")]
    Dial { target: String, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Registry error ({code}): {message}")]
    Status { code: Code, message: String },

    #[error("Call cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("No target set for call")]
    MissingTarget,

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Codec error: {0}")]
    Codec(String),
}

impl ClientError {
    pub fn dial(target: impl ToString, message: impl ToString) -> Self {
        ClientError::Dial {
            target: target.to_string(),
            message: message.to_string(),
        }
    }

    /// Whether re-issuing the call may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Dial { .. } | ClientError::Transport(_) => true,
            ClientError::Status { code, .. } => *code == Code::Unavailable,
            _ => false,
        }
    }

    /// Whether the connection the call ran on should be dropped
    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Transport(_))
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Codec(e.to_string())
    }
}
