//! Registry protocol service
//!
//! Decodes JSON requests, authorizes them against the caller and dispatches
//! to the endpoint registry. Failures are answered with an error body
//! carrying the registry status code.

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use registry_api::wire::{self, ErrorBody};
use registry_api::{NetworkServiceEndpoint, NetworkServiceEndpointQuery};
use registry_core::{AuthorizePolicy, CoreError, EndpointRegistry, Operation, PeerInfo};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, warn};

/// Serves register, find and unregister calls
pub struct RegistryService {
    registry: Arc<EndpointRegistry>,
    authorize: Arc<dyn AuthorizePolicy>,
}

impl RegistryService {
    pub fn new(registry: Arc<EndpointRegistry>, authorize: Arc<dyn AuthorizePolicy>) -> Self {
        Self {
            registry,
            authorize,
        }
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    /// Answer one HTTP request
    pub async fn handle(
        &self,
        req: Request<Incoming>,
        peer: &PeerInfo,
    ) -> Result<Response<Full<Bytes>>, hyper::Error> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let body = req.into_body().collect().await?.to_bytes();

        let result = if method == Method::POST {
            self.call(&path, &body, peer).await
        } else {
            Err(CoreError::Unimplemented(format!("{} {}", method, path)))
        };

        Ok(match result {
            Ok(body) => respond(StatusCode::OK, body),
            Err(e) => {
                debug!("{} {} from {:?} failed: {}", method, path, peer.remote_addr, e);
                error_response(&e)
            }
        })
    }

    /// Dispatch a decoded call by method path, returning the encoded reply
    pub async fn call(&self, path: &str, body: &[u8], peer: &PeerInfo) -> Result<Vec<u8>, CoreError> {
        match path {
            wire::REGISTER_PATH => {
                let nse: NetworkServiceEndpoint = decode(body)?;
                self.authorize(peer, Operation::Register, &nse.name)?;
                let registered = self.registry.register(nse).await?;
                Ok(serde_json::to_vec(&registered)?)
            }
            wire::FIND_PATH => {
                let query: NetworkServiceEndpointQuery = decode(body)?;
                self.authorize(peer, Operation::Find, &query.network_service_endpoint.name)?;
                let found = self.registry.find(&query).await?;
                Ok(serde_json::to_vec(&found)?)
            }
            wire::UNREGISTER_PATH => {
                let nse: NetworkServiceEndpoint = decode(body)?;
                self.authorize(peer, Operation::Unregister, &nse.name)?;
                self.registry.unregister(&nse).await?;
                Ok(b"{}".to_vec())
            }
            _ => Err(CoreError::Unimplemented(format!("unknown method {}", path))),
        }
    }

    fn authorize(&self, peer: &PeerInfo, operation: Operation, endpoint: &str) -> Result<(), CoreError> {
        if self.authorize.check(peer, operation, endpoint) {
            return Ok(());
        }

        warn!(
            "{} of '{}' from {:?} denied by {}",
            operation,
            endpoint,
            peer.remote_addr,
            self.authorize.name()
        );
        Err(CoreError::PermissionDenied(format!(
            "{} of '{}' is not allowed",
            operation, endpoint
        )))
    }
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, CoreError> {
    Ok(serde_json::from_slice(body)?)
}

fn respond(status: StatusCode, body: Vec<u8>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(wire::CONTENT_TYPE));
    response
}

fn error_response(error: &CoreError) -> Response<Full<Bytes>> {
    let code = error.code();
    let status =
        StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = serde_json::to_vec(&ErrorBody::new(code, error.to_string())).unwrap_or_default();
    respond(status, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use registry_api::wire::Code;
    use registry_core::{AuthorizeAny, MemoryEndpointStore};

    fn service(authorize: Arc<dyn AuthorizePolicy>) -> RegistryService {
        let registry = EndpointRegistry::new(
            "default",
            chrono::Duration::seconds(60),
            Arc::new(MemoryEndpointStore::new()),
        );
        RegistryService::new(Arc::new(registry), authorize)
    }

    #[tokio::test]
    async fn test_register_then_find() {
        let service = service(Arc::new(AuthorizeAny));
        let peer = PeerInfo::default();

        let nse = NetworkServiceEndpoint::new("nse-1", vec!["ns-1".to_string()]);
        let reply = service
            .call(wire::REGISTER_PATH, &serde_json::to_vec(&nse).unwrap(), &peer)
            .await
            .unwrap();
        let registered: NetworkServiceEndpoint = serde_json::from_slice(&reply).unwrap();
        assert!(registered.expiration_time.is_some());

        let query = NetworkServiceEndpointQuery::by_name("nse-1");
        let reply = service
            .call(wire::FIND_PATH, &serde_json::to_vec(&query).unwrap(), &peer)
            .await
            .unwrap();
        let found: Vec<NetworkServiceEndpoint> = serde_json::from_slice(&reply).unwrap();
        assert_eq!(found, vec![registered]);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let service = service(Arc::new(AuthorizeAny));
        let result = service.call("/nope", b"{}", &PeerInfo::default()).await;
        assert_eq!(result.unwrap_err().code(), Code::Unimplemented);
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let service = service(Arc::new(AuthorizeAny));
        let result = service
            .call(wire::REGISTER_PATH, b"not json", &PeerInfo::default())
            .await;
        assert_eq!(result.unwrap_err().code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_denied_call() {
        let deny_register = |_: &PeerInfo, operation: Operation, _: &str| operation != Operation::Register;
        let service = service(Arc::new(deny_register));
        let nse = NetworkServiceEndpoint::new("nse-1", vec![]);

        let result = service
            .call(
                wire::REGISTER_PATH,
                &serde_json::to_vec(&nse).unwrap(),
                &PeerInfo::default(),
            )
            .await;
        assert_eq!(result.unwrap_err().code(), Code::PermissionDenied);
        assert_eq!(service.registry().endpoint_count().await, 0);
    }

    #[test]
    fn test_error_response_status() {
        let response = error_response(&CoreError::EndpointNotFound("nse-1".to_string()));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            wire::CONTENT_TYPE
        );
    }
}
