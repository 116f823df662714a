//! Typed, programmatically-built configuration for the engine's factories.
//!
//! The core takes no CLI or environment input of its own; configuration is
//! the embedding application's concern. These structs are plain builder-style
//! values passed to `Engine::make_*`.

use std::net::SocketAddr;
use std::time::Duration;

/// Either a resolved socket address or a `(host, service)` pair resolved
/// lazily through an [`crate::resolver::EndpointResolver`].
#[derive(Debug, Clone)]
pub enum Endpoint {
    Resolved(SocketAddr),
    Unresolved { host: String, service: String },
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Endpoint::Resolved(addr)
    }
}

/// Governs whether and how a [`crate::tcp_connector::TcpConnector`]
/// retries after a failed or closed connection.
#[derive(Debug, Clone)]
pub enum ReconnectPolicy {
    /// Never reconnect; a closed or failed connection stops the connector.
    Never,
    /// Always wait the same interval before the next attempt.
    FixedInterval(Duration),
    /// Exponential back-off between `initial` and `max`.
    Backoff {
        initial: Duration,
        max: Duration,
        multiplier: f64,
    },
}

impl ReconnectPolicy {
    /// The delay to wait before reconnect attempt number `attempt`
    /// (1-based), or `None` if the policy says to stop.
    pub(crate) fn next_delay(&self, attempt: u32) -> Option<Duration> {
        match self {
            ReconnectPolicy::Never => None,
            ReconnectPolicy::FixedInterval(d) => Some(*d),
            ReconnectPolicy::Backoff { initial, max, multiplier } => {
                let scaled = initial.as_secs_f64() * multiplier.powi(attempt.saturating_sub(1) as i32);
                Some(Duration::from_secs_f64(scaled.min(max.as_secs_f64())))
            }
        }
    }
}

/// Configuration for [`crate::engine::Engine::make_tcp_acceptor`].
#[derive(Debug, Clone)]
pub struct AcceptorConfig {
    pub bind: SocketAddr,
    pub reuse_addr: bool,
}

impl AcceptorConfig {
    pub fn new(bind: SocketAddr) -> Self {
        Self {
            bind,
            reuse_addr: false,
        }
    }

    pub fn with_reuse_addr(mut self, reuse_addr: bool) -> Self {
        self.reuse_addr = reuse_addr;
        self
    }
}

/// Configuration for [`crate::engine::Engine::make_tcp_connector`].
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub endpoints: Vec<Endpoint>,
    pub reconnect: ReconnectPolicy,
}

impl ConnectorConfig {
    pub fn new(endpoint: impl Into<Endpoint>) -> Self {
        Self {
            endpoints: vec![endpoint.into()],
            reconnect: ReconnectPolicy::Never,
        }
    }

    pub fn with_host_service(host: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            endpoints: vec![Endpoint::Unresolved {
                host: host.into(),
                service: service.into(),
            }],
            reconnect: ReconnectPolicy::Never,
        }
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }
}

/// Configuration for [`crate::engine::Engine::make_udp_entity`].
#[derive(Debug, Clone)]
pub struct UdpConfig {
    /// Local address to bind. `None` means let the OS pick an ephemeral
    /// port (suitable for a send-only entity with no fixed local endpoint).
    pub bind: Option<SocketAddr>,
    /// Default destination used by `send(buffer)` with no explicit endpoint.
    pub default_remote: Option<SocketAddr>,
    pub max_datagram_size: usize,
    /// If true, no receive loop is started; only sends are permitted.
    pub send_only: bool,
}

impl UdpConfig {
    pub fn new(bind: SocketAddr) -> Self {
        Self {
            bind: Some(bind),
            default_remote: None,
            max_datagram_size: 65_507,
            send_only: false,
        }
    }

    pub fn send_only_to(default_remote: SocketAddr) -> Self {
        Self {
            bind: None,
            default_remote: Some(default_remote),
            max_datagram_size: 65_507,
            send_only: true,
        }
    }

    pub fn with_default_remote(mut self, remote: SocketAddr) -> Self {
        self.default_remote = Some(remote);
        self
    }

    pub fn with_max_datagram_size(mut self, size: usize) -> Self {
        self.max_datagram_size = size;
        self
    }
}
