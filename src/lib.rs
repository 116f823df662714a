//! An asynchronous TCP/UDP networking core built on Tokio.
//!
//! An [`Engine`] owns a dedicated executor and spawns acceptors, connectors,
//! and UDP entities; every entity and every accepted/connected socket runs
//! as its own task, reachable only through cheap, weak-reference handles
//! ([`IoInterface`], [`IoOutput`], [`NetEntity`]) that detect a torn-down
//! referent instead of keeping it alive. Message boundaries are decided by a
//! [`Framing`] selected per handler at `start_io` time; everything above
//! framing (wire formats, protocols, reconnection policy beyond backoff
//! timing) is left to the embedding application.

mod arena;
mod buffer;
mod config;
mod engine;
mod error;
mod framing;
mod handles;
mod io_common;
mod net_entity_common;
mod queue;
mod resolver;
mod socket_options;
mod tcp_acceptor;
mod tcp_connector;
mod tcp_io;
mod udp_io;
mod wait_queue;

pub use config::{AcceptorConfig, ConnectorConfig, Endpoint, ReconnectPolicy, UdpConfig};
pub use engine::{Engine, EntityKind, SocketView};
pub use error::{HandleError, NetError, StartIoError};
pub use framing::{big_endian_u16_decoder, length_prefixed_u16, simple_variable_len_msg_frame, FrameFn, Framing, HeaderDecoder};
pub use handles::{IoInterface, IoKind, IoOutput, NetEntity};
pub use io_common::MessageHandler;
pub use net_entity_common::{ErrorCallback, ErrorSource, StateChangeCallback};
pub use queue::{sum_stats, QueueStats};
pub use resolver::{DefaultResolver, EndpointResolver};
pub use socket_options::{
    broadcast, join_multicast_v4, leave_multicast_v4, no_delay, set_broadcast, set_multicast_ttl_v4, set_no_delay, set_ttl, ttl,
};
pub use wait_queue::{Closed, WaitQueue, WaitQueueReceiver, WaitQueueSender};
