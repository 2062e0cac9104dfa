use registry_api::wire::Code;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Endpoint not found: {0}")]
    EndpointNotFound(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    #[error("Kubernetes error: {0}")]
    KubernetesError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(String),
}

impl CoreError {
    /// Wire code reported to registry clients
    pub fn code(&self) -> Code {
        match self {
            CoreError::EndpointNotFound(_) => Code::NotFound,
            CoreError::InvalidEndpoint(_) | CoreError::SerializationError(_) => {
                Code::InvalidArgument
            }
            CoreError::PermissionDenied(_) => Code::PermissionDenied,
            CoreError::Unimplemented(_) => Code::Unimplemented,
            CoreError::KubernetesError(_) | CoreError::Store(_) => Code::Unavailable,
        }
    }
}
