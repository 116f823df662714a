//! External endpoint resolution, modeled as an injectable async trait.
//!
//! The core never implements DNS itself; [`DefaultResolver`] delegates to
//! `tokio::net::lookup_host`. Tests substitute a fake resolver, mirroring
//! the teacher's pattern of injectable platform-I/O provider traits.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io;

/// Converts `(host, service)` into an ordered list of candidate socket
/// addresses. A [`crate::tcp_connector::TcpConnector`] with a lazily
/// resolved endpoint re-calls this on every reconnect attempt, so DNS
/// changes are observed.
#[async_trait]
pub trait EndpointResolver: Send + Sync {
    async fn resolve(&self, host: &str, service: &str) -> io::Result<Vec<SocketAddr>>;
}

/// Resolves through the OS stub resolver via `tokio::net::lookup_host`.
/// `service` is parsed as a numeric port; this crate does not perform
/// `/etc/services`-style name lookups.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultResolver;

#[async_trait]
impl EndpointResolver for DefaultResolver {
    async fn resolve(&self, host: &str, service: &str) -> io::Result<Vec<SocketAddr>> {
        let port: u16 = service.parse().map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("service '{service}' is not a numeric port"),
            )
        })?;
        let addrs = tokio::net::lookup_host((host, port)).await?;
        Ok(addrs.collect())
    }
}
