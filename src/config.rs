//! Server-wide configuration.
//!
//! `recv_timeout`/`recv_retries` are constructor parameters rather than CLI
//! flags: production always wants the RFC-era 5s/5-retry policy, and tests
//! want a policy that finishes in milliseconds. Exposing them as fields
//! lets both live side by side without a flag nobody in production should
//! ever touch.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default TFTP port (RFC 1350).
pub const DEFAULT_PORT: u16 = 69;

const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_RECV_RETRIES: u32 = 5;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub base_dir: PathBuf,
    pub bind_addr: SocketAddr,
    pub recv_timeout: Duration,
    pub recv_retries: u32,
}

impl ServerConfig {
    /// Build the production configuration: bind to `0.0.0.0:<port>` and use
    /// the RFC-era retry/timeout policy. `base_dir` must already exist.
    pub fn new(base_dir: PathBuf, port: u16) -> ServerConfig {
        ServerConfig {
            base_dir,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], port)),
            recv_timeout: DEFAULT_RECV_TIMEOUT,
            recv_retries: DEFAULT_RECV_RETRIES,
        }
    }
}
