use registry_client::Target;
use thiserror::Error;

/// Failure of a registry listener
#[derive(Error, Debug)]
pub enum ListenError {
    #[error("Failed to bind {target}: {source}")]
    Bind {
        target: Target,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to accept on {target}: {source}")]
    Accept {
        target: Target,
        #[source]
        source: std::io::Error,
    },
}
