//! Registry listeners
//!
//! Each configured address gets its own listener task. Failures are reported
//! on the listener's error channel: a bind failure is queued before
//! [`listen_and_serve`] returns, later failures arrive while serving.

use hyper::server::conn::http2;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use registry_client::Target;
use registry_core::PeerInfo;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{ListenError, RegistryService};

/// A started listener and its error channel
pub struct Listener {
    target: Target,
    local_addr: Option<SocketAddr>,
    errors: mpsc::Receiver<ListenError>,
}

impl Listener {
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Bound socket address of a TCP listener
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Target this process dials to reach the listener
    pub fn local_target(&self) -> Target {
        match (&self.target, self.local_addr) {
            (Target::Tcp { .. }, Some(addr)) => Target::Tcp {
                host: "localhost".to_string(),
                port: addr.port(),
            },
            (target, _) => target.local(),
        }
    }
}

enum Bound {
    Tcp(TcpListener),
    Unix(UnixListener, PathBuf),
}

impl Bound {
    fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Bound::Tcp(listener) => listener.local_addr().ok(),
            Bound::Unix(..) => None,
        }
    }
}

async fn bind(target: &Target) -> io::Result<Bound> {
    match target {
        Target::Tcp { host, port } => {
            let listener = TcpListener::bind((host.as_str(), *port)).await?;
            Ok(Bound::Tcp(listener))
        }
        Target::Unix { path } => {
            match tokio::fs::remove_file(path).await {
                Ok(()) => debug!("Removed stale socket {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
            let listener = UnixListener::bind(path)?;
            Ok(Bound::Unix(listener, path.clone()))
        }
    }
}

/// Bind `target` and serve the registry on it until `cancel` fires
pub async fn listen_and_serve(
    cancel: CancellationToken,
    target: Target,
    service: Arc<RegistryService>,
    tls: Option<TlsAcceptor>,
) -> Listener {
    let (tx, rx) = mpsc::channel(1);

    let local_addr = match bind(&target).await {
        Ok(bound) => {
            let local_addr = bound.local_addr();
            info!("Listening on {} (tls: {})", target, tls.is_some());
            tokio::spawn(accept_loop(bound, target.clone(), service, tls, cancel, tx));
            local_addr
        }
        Err(source) => {
            // A fresh channel always has room for the first error
            let _ = tx.try_send(ListenError::Bind {
                target: target.clone(),
                source,
            });
            None
        }
    };

    Listener {
        target,
        local_addr,
        errors: rx,
    }
}

fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset | io::ErrorKind::Interrupted
    )
}

async fn accept_loop(
    bound: Bound,
    target: Target,
    service: Arc<RegistryService>,
    tls: Option<TlsAcceptor>,
    cancel: CancellationToken,
    errors: mpsc::Sender<ListenError>,
) {
    loop {
        let accepted = match &bound {
            Bound::Tcp(listener) => tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => accepted.map(|(stream, addr)| {
                    let peer = PeerInfo {
                        remote_addr: Some(addr.to_string()),
                        certificate: None,
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                    }
                    tokio::spawn(serve_connection(stream, peer, service.clone(), tls.clone(), cancel.clone()));
                }),
            },
            Bound::Unix(listener, _) => tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => accepted.map(|(stream, _)| {
                    let peer = PeerInfo::default();
                    tokio::spawn(serve_connection(stream, peer, service.clone(), tls.clone(), cancel.clone()));
                }),
            },
        };

        match accepted {
            Ok(()) => {}
            Err(e) if is_transient(&e) => warn!("Transient accept error on {}: {}", target, e),
            Err(source) => {
                let error = ListenError::Accept {
                    target: target.clone(),
                    source,
                };
                if let Err(e) = errors.send(error).await {
                    error!("Listener on {} failed with nobody watching: {}", target, e.0);
                }
                break;
            }
        }
    }

    if let Bound::Unix(_, path) = &bound {
        if let Err(e) = tokio::fs::remove_file(path).await {
            debug!("Failed to remove socket {}: {}", path.display(), e);
        }
    }
    info!("Listener on {} stopped", target);
}

async fn serve_connection<S>(
    stream: S,
    mut peer: PeerInfo,
    service: Arc<RegistryService>,
    tls: Option<TlsAcceptor>,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    match tls {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(stream) => {
                peer.certificate = stream
                    .get_ref()
                    .1
                    .peer_certificates()
                    .and_then(|certs| certs.first())
                    .map(|cert| cert.to_vec());
                serve_h2(stream, peer, service, cancel).await
            }
            Err(e) => debug!("TLS error from {:?}: {}", peer.remote_addr, e),
        },
        None => serve_h2(stream, peer, service, cancel).await,
    }
}

async fn serve_h2<S>(stream: S, peer: PeerInfo, service: Arc<RegistryService>, cancel: CancellationToken)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let remote_addr = peer.remote_addr.clone();
    let peer = Arc::new(peer);
    let handler = service_fn(move |req| {
        let service = service.clone();
        let peer = peer.clone();
        async move { service.handle(req, &peer).await }
    });

    let connection =
        http2::Builder::new(TokioExecutor::new()).serve_connection(TokioIo::new(stream), handler);
    tokio::pin!(connection);

    let result = tokio::select! {
        result = connection.as_mut() => result,
        _ = cancel.cancelled() => {
            connection.as_mut().graceful_shutdown();
            connection.as_mut().await
        }
    };

    if let Err(e) = result {
        debug!("Error serving connection from {:?}: {}", remote_addr, e);
    }
}

/// Check a listener for an early failure, then watch it in the background.
///
/// Returns the failure if one is already queued. Otherwise spawns a monitor
/// that cancels `cancel` when the listener fails later, and stops once
/// `cancel` fires.
pub fn watch_errors(
    cancel: CancellationToken,
    listener: Listener,
) -> Result<JoinHandle<()>, ListenError> {
    let Listener {
        target, mut errors, ..
    } = listener;

    if let Ok(error) = errors.try_recv() {
        return Err(error);
    }

    Ok(tokio::spawn(async move {
        tokio::select! {
            received = errors.recv() => {
                if let Some(error) = received {
                    error!("{}", error);
                    cancel.cancel();
                }
            }
            _ = cancel.cancelled() => {
                debug!("Stopped watching listener on {}", target);
            }
        }
    }))
}

/// Exit the process if the listener already failed, otherwise watch it in
/// the background (see [`watch_errors`])
pub fn exit_on_err(cancel: CancellationToken, listener: Listener) -> JoinHandle<()> {
    match watch_errors(cancel, listener) {
        Ok(monitor) => monitor,
        Err(error) => {
            error!("{}", error);
            std::process::exit(1);
        }
    }
}
