//! Registry client for network service endpoints
//!
//! Calls travel through a [`Chain`] of stages. The standard chain built by
//! [`new_registry_client`] assigns call state, retries transient failures,
//! resolves the target, manages the cached connection and finally issues the
//! request over HTTP/2.

pub mod begin;
pub mod chain;
pub mod client;
pub mod clientconn;
pub mod clienturl;
pub mod conn_cache;
pub mod connect;
pub mod connection;
pub mod context;
pub mod dial;
pub mod error;
pub mod retry;
pub mod target;
pub mod tls;

pub use begin::BeginStage;
pub use chain::{Chain, EndpointStream, Next, Stage};
pub use client::{new_registry_client, ClientOptions, RegistryClient};
pub use clientconn::ClientConnStage;
pub use clienturl::ClientUrlStage;
pub use conn_cache::{CachedConnection, ConnectionCache};
pub use connect::ConnectStage;
pub use connection::{Connection, Dialer, H2Dialer};
pub use context::CallContext;
pub use dial::DialStage;
pub use error::{ClientError, Result};
pub use retry::{RetryPolicy, RetryStage};
pub use target::Target;
pub use tls::TlsMaterial;
