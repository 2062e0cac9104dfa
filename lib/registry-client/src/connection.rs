//! HTTP/2 connections to registry servers

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::client::conn::http2::{self, SendRequest};
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use registry_api::wire::{self, Code, ErrorBody};
use rustls::pki_types::ServerName;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::conn_cache::CachedConnection;
use crate::{ClientError, Result, Target};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// An established HTTP/2 session to one target.
///
/// Clones share the session; calls multiplex over it. The session is owned
/// by the connection cache and closes once every clone is dropped.
#[derive(Clone)]
pub struct Connection {
    id: u64,
    target: Target,
    sender: SendRequest<Full<Bytes>>,
}

impl Connection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Issue one unary call and return the response body
    pub async fn call(&self, path: &str, body: Vec<u8>) -> Result<Bytes> {
        let uri = format!("http://{}{}", self.target.authority(), path);
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(hyper::header::CONTENT_TYPE, wire::CONTENT_TYPE)
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| ClientError::Codec(e.to_string()))?;

        let mut sender = self.sender.clone();
        sender
            .ready()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?
            .to_bytes();

        if status.is_success() {
            return Ok(bytes);
        }

        Err(status_error(status, &bytes))
    }
}

impl CachedConnection for Connection {
    fn id(&self) -> u64 {
        self.id
    }

    fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn status_error(status: StatusCode, body: &[u8]) -> ClientError {
    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(error) => ClientError::Status {
            code: error.code,
            message: error.message,
        },
        Err(_) => ClientError::Status {
            code: Code::from_http_status(status.as_u16()),
            message: format!("unexpected status {}", status),
        },
    }
}

/// Establishes connections to targets
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, target: &Target) -> Result<Connection>;
}

/// Dialer for HTTP/2 over TCP or Unix sockets, optionally wrapped in TLS
pub struct H2Dialer {
    timeout: Duration,
    tls: Option<TlsConnector>,
}

impl H2Dialer {
    /// Create a plaintext dialer
    pub fn new(timeout: Duration) -> Self {
        Self { timeout, tls: None }
    }

    /// Create a dialer presenting the client identity in `config`
    pub fn with_tls(timeout: Duration, config: Arc<rustls::ClientConfig>) -> Self {
        Self {
            timeout,
            tls: Some(TlsConnector::from(config)),
        }
    }

    /// Check if this dialer has TLS configured
    pub fn has_tls(&self) -> bool {
        self.tls.is_some()
    }

    async fn connect(&self, target: &Target) -> Result<Connection> {
        match target {
            Target::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port))
                    .await
                    .map_err(|e| ClientError::dial(target, e))?;
                stream
                    .set_nodelay(true)
                    .map_err(|e| ClientError::dial(target, e))?;
                self.secure(target, stream).await
            }
            Target::Unix { path } => {
                let stream = UnixStream::connect(path)
                    .await
                    .map_err(|e| ClientError::dial(target, e))?;
                self.secure(target, stream).await
            }
        }
    }

    async fn secure<S>(&self, target: &Target, stream: S) -> Result<Connection>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        match &self.tls {
            Some(connector) => {
                let name = ServerName::try_from(target.server_name().to_string())
                    .map_err(|e| ClientError::dial(target, e))?;
                let stream = connector
                    .connect(name, stream)
                    .await
                    .map_err(|e| ClientError::dial(target, e))?;
                handshake(target, stream).await
            }
            None => handshake(target, stream).await,
        }
    }
}

#[async_trait]
impl Dialer for H2Dialer {
    async fn dial(&self, target: &Target) -> Result<Connection> {
        debug!("Dialing {} (tls: {})", target, self.has_tls());
        match tokio::time::timeout(self.timeout, self.connect(target)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::dial(
                target,
                format!("timed out after {:?}", self.timeout),
            )),
        }
    }
}

async fn handshake<S>(target: &Target, stream: S) -> Result<Connection>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sender, connection) = http2::handshake(TokioExecutor::new(), TokioIo::new(stream))
        .await
        .map_err(|e| ClientError::dial(target, e))?;

    let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::SeqCst);
    let peer = target.clone();
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!("Connection {} to {} closed: {}", id, peer, e);
        }
    });

    debug!("Connection {} to {} established", id, target);
    Ok(Connection {
        id,
        target: target.clone(),
        sender,
    })
}
