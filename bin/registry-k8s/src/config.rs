//! Process configuration, read from `REGISTRY_K8S_*` environment variables

use anyhow::{anyhow, Result};
use clap::{Parser, ValueEnum};
use registry_client::{RetryPolicy, Target, TlsMaterial};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;
use url::Url;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Where registrations are persisted
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    /// `NetworkServiceEndpoint` custom resources
    Kubernetes,
    /// Process memory, lost on restart
    Memory,
}

/// Registry front-end backed by Kubernetes custom resources
#[derive(Parser, Clone, Debug)]
#[command(name = "registry-k8s")]
#[command(version)]
pub struct Config {
    /// URLs to listen on (tcp://host:port or unix:///path), comma separated
    #[arg(
        long,
        env = "REGISTRY_K8S_LISTEN_ON",
        value_delimiter = ',',
        default_value = "unix:///listen.on.socket"
    )]
    pub listen_on: Vec<Url>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(long, env = "REGISTRY_K8S_LOG_LEVEL", default_value = "INFO")]
    pub log_level: String,

    #[arg(long, env = "REGISTRY_K8S_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Namespace holding the endpoint resources
    #[arg(long, env = "REGISTRY_K8S_NAMESPACE", default_value = "default")]
    pub namespace: String,

    #[arg(long, env = "REGISTRY_K8S_STORE", value_enum, default_value_t = StoreKind::Kubernetes)]
    pub store: StoreKind,

    /// Expiration given to registrations that carry none
    #[arg(long, env = "REGISTRY_K8S_EXPIRE_PERIOD_SECS", default_value_t = 60)]
    pub expire_period_secs: u64,

    #[arg(long, env = "REGISTRY_K8S_EXPIRE_SWEEP_SECS", default_value_t = 5)]
    pub expire_sweep_secs: u64,

    #[arg(long, env = "REGISTRY_K8S_CALL_TIMEOUT_SECS", default_value_t = 15)]
    pub call_timeout_secs: u64,

    #[arg(long, env = "REGISTRY_K8S_DIAL_TIMEOUT_SECS", default_value_t = 5)]
    pub dial_timeout_secs: u64,

    #[arg(long, env = "REGISTRY_K8S_RETRY_MAX_ATTEMPTS", default_value_t = 5)]
    pub retry_max_attempts: u32,

    #[arg(long, env = "REGISTRY_K8S_RETRY_INITIAL_BACKOFF_MS", default_value_t = 200)]
    pub retry_initial_backoff_ms: u64,

    #[arg(long, env = "REGISTRY_K8S_RETRY_MAX_BACKOFF_MS", default_value_t = 5000)]
    pub retry_max_backoff_ms: u64,

    /// PEM certificate chain presented by listeners and clients
    #[arg(long, env = "REGISTRY_K8S_TLS_CERT_FILE")]
    pub tls_cert_file: Option<PathBuf>,

    #[arg(long, env = "REGISTRY_K8S_TLS_KEY_FILE")]
    pub tls_key_file: Option<PathBuf>,

    /// PEM CA bundle used to verify peers
    #[arg(long, env = "REGISTRY_K8S_TLS_CA_FILE")]
    pub tls_ca_file: Option<PathBuf>,
}

impl Config {
    pub fn level(&self) -> Result<Level> {
        Level::from_str(&self.log_level).map_err(|_| anyhow!("invalid log level {}", self.log_level))
    }

    pub fn targets(&self) -> Result<Vec<Target>> {
        self.listen_on
            .iter()
            .map(|url| Target::from_url(url).map_err(anyhow::Error::from))
            .collect()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            initial_backoff: Duration::from_millis(self.retry_initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry_max_backoff_ms),
            try_timeout: None,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    pub fn expire_period(&self) -> Result<chrono::Duration> {
        Ok(chrono::Duration::from_std(Duration::from_secs(
            self.expire_period_secs,
        ))?)
    }

    pub fn expire_sweep(&self) -> Duration {
        Duration::from_secs(self.expire_sweep_secs)
    }

    /// Load the TLS identity; `None` when no PEM file is configured
    pub fn tls_material(&self) -> Result<Option<TlsMaterial>> {
        match (&self.tls_cert_file, &self.tls_key_file, &self.tls_ca_file) {
            (None, None, None) => Ok(None),
            (Some(cert), Some(key), Some(ca)) => Ok(Some(TlsMaterial::from_files(cert, key, ca)?)),
            _ => Err(anyhow!(
                "REGISTRY_K8S_TLS_CERT_FILE, REGISTRY_K8S_TLS_KEY_FILE and REGISTRY_K8S_TLS_CA_FILE must be set together"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["registry-k8s"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_listen_on_list() {
        let config = parse(&["--listen-on", "tcp://0.0.0.0:5002,unix:///run/registry.sock"]);
        let targets = config.targets().unwrap();
        assert_eq!(
            targets,
            vec![
                Target::Tcp {
                    host: "0.0.0.0".to_string(),
                    port: 5002
                },
                Target::Unix {
                    path: PathBuf::from("/run/registry.sock")
                },
            ]
        );
    }

    #[test]
    fn test_invalid_listen_url() {
        let result = Config::try_parse_from(["registry-k8s", "--listen-on", "not a url"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_log_level() {
        assert_eq!(parse(&["--log-level", "debug"]).level().unwrap(), Level::DEBUG);
        assert!(parse(&["--log-level", "verbose"]).level().is_err());
    }

    #[test]
    fn test_retry_policy() {
        let policy = parse(&["--retry-max-attempts", "3"]).retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_backoff, Duration::from_millis(200));
        assert_eq!(policy.max_backoff, Duration::from_secs(5));
    }

    #[test]
    fn test_partial_tls_config() {
        let config = parse(&["--tls-cert-file", "/etc/tls/tls.crt"]);
        assert!(config.tls_material().is_err());
    }

    #[test]
    fn test_store_kind() {
        assert_eq!(parse(&["--store", "memory"]).store, StoreKind::Memory);
    }
}
