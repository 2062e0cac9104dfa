/// API version v1 for network service mesh registry CRDs

pub mod network_service_endpoint;

pub use network_service_endpoint::{NetworkServiceEndpoint, NetworkServiceEndpointSpec};

/// API group for network service mesh resources
pub const API_GROUP: &str = "networkservicemesh.io";
/// API version for network service mesh resources
pub const API_VERSION: &str = "v1";
