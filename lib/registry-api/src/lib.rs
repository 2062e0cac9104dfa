//! Registry API types for the network service mesh registry
//!
//! This library defines:
//! - NetworkServiceEndpoint: the registry protocol message for one endpoint
//! - NetworkServiceEndpointQuery: the find request
//! - v1: the Kubernetes custom resource backing registrations
//! - wire: method paths and error bodies shared by client and server

pub mod registry;
pub mod v1;
pub mod wire;

pub use registry::{NetworkServiceEndpoint, NetworkServiceEndpointQuery};
