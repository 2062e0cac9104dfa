//! Dial and listen addresses

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use url::{Host, Url};

use crate::ClientError;

/// Address of a remote endpoint: a TCP host and port or a Unix socket path
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    Tcp { host: String, port: u16 },
    Unix { path: PathBuf },
}

impl Target {
    /// Build a target from a `tcp://host:port` or `unix:///path` URL
    pub fn from_url(url: &Url) -> Result<Self, ClientError> {
        match url.scheme() {
            "tcp" | "http" | "https" => {
                let host = match url.host() {
                    Some(Host::Domain(domain)) => domain.to_string(),
                    Some(Host::Ipv4(addr)) => addr.to_string(),
                    Some(Host::Ipv6(addr)) => addr.to_string(),
                    None => return Err(ClientError::InvalidTarget(format!("{}: missing host", url))),
                };
                let port = url
                    .port_or_known_default()
                    .ok_or_else(|| ClientError::InvalidTarget(format!("{}: missing port", url)))?;
                Ok(Target::Tcp { host, port })
            }
            "unix" => {
                if url.path().is_empty() || url.path() == "/" {
                    return Err(ClientError::InvalidTarget(format!("{}: missing socket path", url)));
                }
                Ok(Target::Unix {
                    path: PathBuf::from(url.path()),
                })
            }
            scheme => Err(ClientError::InvalidTarget(format!(
                "{}: unsupported scheme {:?}",
                url, scheme
            ))),
        }
    }

    /// The address a process uses to reach its own listener on this target.
    ///
    /// TCP listeners are reached through `localhost` on the same port, Unix
    /// sockets through the same path.
    pub fn local(&self) -> Target {
        match self {
            Target::Tcp { port, .. } => Target::Tcp {
                host: "localhost".to_string(),
                port: *port,
            },
            Target::Unix { path } => Target::Unix { path: path.clone() },
        }
    }

    /// HTTP authority used in request URIs
    pub fn authority(&self) -> String {
        match self {
            Target::Tcp { host, port } if host.contains(':') => format!("[{}]:{}", host, port),
            Target::Tcp { host, port } => format!("{}:{}", host, port),
            Target::Unix { .. } => "localhost".to_string(),
        }
    }

    /// Name presented for TLS server verification
    pub fn server_name(&self) -> &str {
        match self {
            Target::Tcp { host, .. } => host,
            Target::Unix { .. } => "localhost",
        }
    }
}

impl FromStr for Target {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(s).map_err(|e| ClientError::InvalidTarget(format!("{}: {}", s, e)))?;
        Target::from_url(&url)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Tcp { .. } => write!(f, "tcp://{}", self.authority()),
            Target::Unix { path } => write!(f, "unix://{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tcp() {
        let target: Target = "tcp://0.0.0.0:5002".parse().unwrap();
        assert_eq!(
            target,
            Target::Tcp {
                host: "0.0.0.0".to_string(),
                port: 5002
            }
        );
        assert_eq!(target.to_string(), "tcp://0.0.0.0:5002");
    }

    #[test]
    fn test_parse_unix() {
        let target: Target = "unix:///listen.on.socket".parse().unwrap();
        assert_eq!(
            target,
            Target::Unix {
                path: PathBuf::from("/listen.on.socket")
            }
        );
        assert_eq!(target.authority(), "localhost");
    }

    #[test]
    fn test_parse_ipv6() {
        let target: Target = "tcp://[::1]:5002".parse().unwrap();
        assert_eq!(target.authority(), "[::1]:5002");
        assert_eq!(target.server_name(), "::1");
    }

    #[test]
    fn test_parse_errors() {
        assert!("tcp://localhost".parse::<Target>().is_err());
        assert!("unix://".parse::<Target>().is_err());
        assert!("ftp://localhost:21".parse::<Target>().is_err());
        assert!("not a url".parse::<Target>().is_err());
    }

    #[test]
    fn test_local() {
        let target: Target = "tcp://0.0.0.0:5002".parse().unwrap();
        assert_eq!(target.local().to_string(), "tcp://localhost:5002");

        let socket: Target = "unix:///var/lib/registry.sock".parse().unwrap();
        assert_eq!(socket.local(), socket);
    }
}
