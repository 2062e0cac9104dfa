use anyhow::Result;
use clap::Parser;
use registry_client::{new_registry_client, ClientOptions, ConnectionCache, Dialer, H2Dialer};
use registry_core::{
    AuthorizeAny, EndpointRegistry, EndpointStore, KubeEndpointStore, MemoryEndpointStore,
};
use registry_server::{
    exit_on_err, listen_and_serve, spawn_expire_sweeper, Prefetch, RegistryService,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use config::{Config, LogFormat, StoreKind};

#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();
    let config = Config::parse();
    init_tracing(&config)?;

    info!("Starting registry-k8s...");
    info!("Config: {:?}", config);

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let targets = config.targets()?;

    let tls = config.tls_material()?;
    let acceptor = match &tls {
        Some(material) => Some(TlsAcceptor::from(material.server_config()?)),
        None => {
            warn!("TLS not configured - serving plaintext HTTP/2");
            warn!("Set REGISTRY_K8S_TLS_CERT_FILE, REGISTRY_K8S_TLS_KEY_FILE and REGISTRY_K8S_TLS_CA_FILE to enable mTLS");
            None
        }
    };
    let dialer: Arc<dyn Dialer> = match &tls {
        Some(material) => Arc::new(H2Dialer::with_tls(
            config.dial_timeout(),
            material.client_config()?,
        )),
        None => Arc::new(H2Dialer::new(config.dial_timeout())),
    };

    let store: Arc<dyn EndpointStore> = match config.store {
        StoreKind::Kubernetes => Arc::new(KubeEndpointStore::try_default().await?),
        StoreKind::Memory => {
            warn!("Using in-memory store, registrations are lost on restart");
            Arc::new(MemoryEndpointStore::new())
        }
    };
    info!("Endpoint store initialized ({:?})", config.store);

    let registry = Arc::new(EndpointRegistry::new(
        config.namespace.clone(),
        config.expire_period()?,
        store.clone(),
    ));
    let service = Arc::new(RegistryService::new(registry.clone(), Arc::new(AuthorizeAny)));

    let mut local_targets = Vec::new();
    for target in targets {
        let listener =
            listen_and_serve(cancel.clone(), target, service.clone(), acceptor.clone()).await;
        local_targets.push(listener.local_target());
        exit_on_err(cancel.clone(), listener);
    }

    spawn_expire_sweeper(cancel.clone(), registry, config.expire_sweep());

    info!("Starting prefetch...");
    match local_targets.first() {
        Some(target) => {
            let client = new_registry_client(
                target.clone(),
                ClientOptions {
                    dialer,
                    cache: Arc::new(ConnectionCache::new()),
                    retry: config.retry_policy(),
                    call_timeout: Some(config.call_timeout()),
                },
            );
            Prefetch::new(config.namespace.clone(), store, Arc::new(client))
                .run(&cancel)
                .await;
        }
        None => warn!("No listen address configured, prefetch is skipped"),
    }

    info!("Startup completed in {:?}", start_time.elapsed());

    cancel.cancelled().await;
    info!("Shutting down");
    Ok(())
}

fn init_tracing(config: &Config) -> Result<()> {
    let level = config.level()?;
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
    Ok(())
}

/// Cancel `cancel` on Ctrl+C, SIGTERM, SIGHUP or SIGQUIT
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use signal::unix::SignalKind;

        tokio::select! {
            () = wait_for(SignalKind::terminate(), "SIGTERM") => {}
            () = wait_for(SignalKind::hangup(), "SIGHUP") => {}
            () = wait_for(SignalKind::quit(), "SIGQUIT") => {}
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    cancel.cancel();
}

#[cfg(unix)]
async fn wait_for(kind: signal::unix::SignalKind, name: &str) {
    match signal::unix::signal(kind) {
        Ok(mut stream) => {
            stream.recv().await;
            info!("Received {}", name);
        }
        Err(e) => {
            error!("Failed to install {} handler: {}", name, e);
            std::future::pending::<()>().await;
        }
    }
}
