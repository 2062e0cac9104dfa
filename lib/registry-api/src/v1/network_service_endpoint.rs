use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::registry;

/// NetworkServiceEndpoint is the durable record of one registration.
///
/// The spec carries the registry message verbatim so a stored entry can be
/// replayed through the registry client unchanged.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "networkservicemesh.io",
    version = "v1",
    kind = "NetworkServiceEndpoint",
    plural = "networkserviceendpoints",
    shortname = "nse",
    namespaced,
    derive = "Default",
    printcolumn = r#"{"name":"Expiration","type":"string","jsonPath":".spec.expirationTime"}"#,
)]
pub struct NetworkServiceEndpointSpec {
    #[serde(flatten)]
    pub endpoint: registry::NetworkServiceEndpoint,
}

impl NetworkServiceEndpoint {
    /// Build the resource for a registry message in the given namespace
    pub fn from_registry(namespace: &str, endpoint: registry::NetworkServiceEndpoint) -> Self {
        let name = endpoint.name.clone();
        let mut resource = NetworkServiceEndpoint::new(&name, NetworkServiceEndpointSpec { endpoint });
        resource.metadata.namespace = Some(namespace.to_string());
        resource
    }

    /// Resource name, falling back to the name carried in the spec
    pub fn name(&self) -> &str {
        self.metadata
            .name
            .as_deref()
            .unwrap_or(self.spec.endpoint.name.as_str())
    }

    /// The registry message stored in this resource
    pub fn endpoint(&self) -> &registry::NetworkServiceEndpoint {
        &self.spec.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::Resource;

    #[test]
    fn test_from_registry_sets_metadata() {
        let nse = registry::NetworkServiceEndpoint::new("nse-1", vec!["icmp".to_string()]);
        let resource = NetworkServiceEndpoint::from_registry("nsm-system", nse.clone());

        assert_eq!(resource.name(), "nse-1");
        assert_eq!(resource.metadata.namespace.as_deref(), Some("nsm-system"));
        assert_eq!(resource.endpoint(), &nse);
    }

    #[test]
    fn test_spec_is_flattened() {
        let nse = registry::NetworkServiceEndpoint::new("nse-1", vec!["icmp".to_string()]);
        let resource = NetworkServiceEndpoint::from_registry("default", nse);
        let json = serde_json::to_value(&resource).unwrap();

        assert_eq!(json["spec"]["name"], "nse-1");
        assert_eq!(json["spec"]["networkServiceNames"][0], "icmp");
    }

    #[test]
    fn test_resource_identity() {
        assert_eq!(NetworkServiceEndpoint::group(&()), super::super::API_GROUP);
        assert_eq!(NetworkServiceEndpoint::version(&()), super::super::API_VERSION);
        assert_eq!(NetworkServiceEndpoint::plural(&()), "networkserviceendpoints");
    }
}
