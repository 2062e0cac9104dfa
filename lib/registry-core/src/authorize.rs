//! Authorization of inbound registry calls

use std::fmt;

/// Registry operation being authorized
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Register,
    Find,
    Unregister,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What is known about the caller of one inbound call
#[derive(Clone, Debug, Default)]
pub struct PeerInfo {
    /// Remote socket address, if the transport has one
    pub remote_addr: Option<String>,
    /// DER-encoded leaf certificate presented over mTLS
    pub certificate: Option<Vec<u8>>,
}

/// Predicate deciding whether a peer may perform an operation on an endpoint
pub trait AuthorizePolicy: Send + Sync {
    fn name(&self) -> &'static str {
        "UnnamedPolicy"
    }

    fn check(&self, peer: &PeerInfo, operation: Operation, endpoint: &str) -> bool;
}

/// Policy accepting every call
#[derive(Clone, Copy, Debug, Default)]
pub struct AuthorizeAny;

impl AuthorizePolicy for AuthorizeAny {
    fn name(&self) -> &'static str {
        "AuthorizeAny"
    }

    fn check(&self, _peer: &PeerInfo, _operation: Operation, _endpoint: &str) -> bool {
        true
    }
}

impl<F> AuthorizePolicy for F
where
    F: Fn(&PeerInfo, Operation, &str) -> bool + Send + Sync,
{
    fn check(&self, peer: &PeerInfo, operation: Operation, endpoint: &str) -> bool {
        self(peer, operation, endpoint)
    }
}
