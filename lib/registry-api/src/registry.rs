//! Registry protocol messages

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A network service endpoint as exchanged over the registry protocol
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkServiceEndpoint {
    /// Unique name of the endpoint within its namespace
    #[serde(default)]
    pub name: String,

    /// Network services offered by this endpoint
    #[serde(default)]
    pub network_service_names: Vec<String>,

    /// Labels per offered network service
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub network_service_labels: BTreeMap<String, NetworkServiceLabels>,

    /// URL the endpoint can be reached on
    #[serde(default)]
    pub url: String,

    /// Point in time after which the registration is stale
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<DateTime<Utc>>,
}

/// Labels attached to one offered network service
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NetworkServiceLabels {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl NetworkServiceEndpoint {
    /// Create an endpoint offering the given network services
    pub fn new(name: impl Into<String>, network_service_names: Vec<String>) -> Self {
        Self {
            name: name.into(),
            network_service_names,
            ..Default::default()
        }
    }

    /// Whether the registration has expired at `now`.
    ///
    /// An endpoint without an expiration time counts as expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiration_time {
            Some(expiration) => expiration <= now,
            None => true,
        }
    }
}

/// Find request
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkServiceEndpointQuery {
    /// Template to match; empty fields match everything
    #[serde(default)]
    pub network_service_endpoint: NetworkServiceEndpoint,

    /// Keep the stream open for updates (not served by this registry)
    #[serde(default)]
    pub watch: bool,
}

impl NetworkServiceEndpointQuery {
    /// Query for a single endpoint by name
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            network_service_endpoint: NetworkServiceEndpoint::new(name, Vec::new()),
            watch: false,
        }
    }

    /// Check whether an endpoint matches this query's template
    pub fn matches(&self, nse: &NetworkServiceEndpoint) -> bool {
        let template = &self.network_service_endpoint;

        if !template.name.is_empty() && template.name != nse.name {
            return false;
        }

        if !template.url.is_empty() && template.url != nse.url {
            return false;
        }

        if template.network_service_names.is_empty() {
            return true;
        }

        template
            .network_service_names
            .iter()
            .any(|ns| nse.network_service_names.contains(ns))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_is_expired() {
        let now = Utc::now();
        let mut nse = NetworkServiceEndpoint::new("nse-1", vec!["icmp".to_string()]);
        assert!(nse.is_expired(now), "missing expiration counts as expired");

        nse.expiration_time = Some(now + Duration::hours(1));
        assert!(!nse.is_expired(now));

        nse.expiration_time = Some(now);
        assert!(nse.is_expired(now));
    }

    #[test]
    fn test_query_matches_name() {
        let nse = NetworkServiceEndpoint::new("nse-1", vec!["icmp".to_string()]);
        assert!(NetworkServiceEndpointQuery::by_name("nse-1").matches(&nse));
        assert!(!NetworkServiceEndpointQuery::by_name("nse-2").matches(&nse));
        assert!(NetworkServiceEndpointQuery::default().matches(&nse));
    }

    #[test]
    fn test_query_matches_network_service() {
        let nse = NetworkServiceEndpoint::new("nse-1", vec!["icmp".to_string(), "vpn".to_string()]);
        let mut query = NetworkServiceEndpointQuery::default();
        query.network_service_endpoint.network_service_names = vec!["vpn".to_string()];
        assert!(query.matches(&nse));

        query.network_service_endpoint.network_service_names = vec!["dns".to_string()];
        assert!(!query.matches(&nse));
    }

    #[test]
    fn test_camel_case_serialization() {
        let nse = NetworkServiceEndpoint::new("nse-1", vec!["icmp".to_string()]);
        let json = serde_json::to_value(&nse).unwrap();
        assert_eq!(json["networkServiceNames"][0], "icmp");
        assert!(json.get("expirationTime").is_none());
    }
}
