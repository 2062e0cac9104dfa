//! Core registry functionality
//!
//! This library provides:
//! - Endpoint store boundary backed by Kubernetes custom resources
//! - Endpoint registry serving register/find/unregister with expiration
//! - Authorization policy evaluated per inbound call

pub mod authorize;
pub mod error;
pub mod registry;
pub mod store;

pub use authorize::{AuthorizeAny, AuthorizePolicy, Operation, PeerInfo};
pub use error::{CoreError, Result};
pub use registry::EndpointRegistry;
pub use store::{EndpointStore, KubeEndpointStore, MemoryEndpointStore};
