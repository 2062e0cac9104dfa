//! Registry server
//!
//! This library provides:
//! - Registry protocol service over HTTP/2
//! - Listener set with fatal and background failure handling
//! - Expiration sweeper
//! - Startup reconciliation of the backing store (prefetch)

pub mod error;
pub mod expire;
pub mod listener;
pub mod prefetch;
pub mod service;

pub use error::ListenError;
pub use expire::spawn_expire_sweeper;
pub use listener::{exit_on_err, listen_and_serve, watch_errors, Listener};
pub use prefetch::{Prefetch, PrefetchSummary};
pub use service::RegistryService;
