//! Weak-reference handle types exposed to applications.
//!
//! None of `IoInterface`, `IoOutput`, or `NetEntity` own anything: each is a
//! cheap `Clone` wrapping an [`ArenaIndex`] plus an [`Engine`] reference used
//! to reach the arena that can confirm whether the referent still exists.
//! Once the referent is torn down, every operation other than equality and
//! `is_valid` returns [`HandleError::Expired`].

use std::cmp::Ordering as CmpOrdering;
use std::net::SocketAddr;

use crate::arena::ArenaIndex;
use crate::engine::{Engine, EntityCommand, EntityKind, IoCommand, SocketView};
use crate::error::{HandleError as Expired, NetError, StartIoError};
use crate::framing::Framing;
use crate::io_common::MessageHandler;
use crate::queue::QueueStats;

/// Tags whether an I/O handle refers to a TCP or UDP handler; dispatch
/// between the two is by match, never by downcasting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoKind {
    Tcp,
    Udp,
}

fn cmp_index(a: ArenaIndex, b: ArenaIndex) -> CmpOrdering {
    a.index.cmp(&b.index).then(a.generation.cmp(&b.generation))
}

/// Weak reference to an I/O handler (TCP connection or UDP socket).
#[derive(Clone)]
pub struct IoInterface {
    pub(crate) engine: Engine,
    pub(crate) index: ArenaIndex,
    pub(crate) kind: IoKind,
}

impl IoInterface {
    pub fn is_valid(&self) -> bool {
        self.engine.io_slot_exists(self.index)
    }

    pub fn is_io_started(&self) -> Result<bool, Expired> {
        self.engine.io_is_started(self.index).ok_or(Expired)
    }

    /// Selects the message framing and installs the handler that will
    /// receive each complete incoming message. Fails if the handler was
    /// already started, or if this handle has expired.
    pub async fn start_io(&self, framing: Framing, handler: MessageHandler) -> Result<(), StartIoError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.engine
            .send_io_command(self.index, IoCommand::StartIo { framing, handler, reply: tx })
            .map_err(|_| StartIoError::Expired)?;
        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(NetError::AlreadyStarted)) => Err(StartIoError::AlreadyStarted),
            Ok(Err(_)) => Err(StartIoError::AlreadyStarted),
            Err(_) => Err(StartIoError::Expired),
        }
    }

    /// Run `f` against the handler's underlying socket, on the task that
    /// owns it, returning whatever `f` returns.
    pub async fn visit_socket<F, R>(&self, f: F) -> Result<R, Expired>
    where
        F: FnOnce(SocketView<'_>) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.engine.visit_socket(self.index, f).await
    }

    pub fn make_io_output(&self) -> Result<IoOutput, Expired> {
        if !self.is_valid() {
            return Err(Expired);
        }
        Ok(IoOutput {
            engine: self.engine.clone(),
            index: self.index,
            kind: self.kind,
        })
    }

    pub fn stop_io(&self) -> Result<(), Expired> {
        self.engine.send_io_command(self.index, IoCommand::StopIo)
    }

    pub fn kind(&self) -> IoKind {
        self.kind
    }
}

impl std::fmt::Debug for IoInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoInterface")
            .field("index", &self.index)
            .field("kind", &self.kind)
            .finish()
    }
}

impl PartialEq for IoInterface {
    fn eq(&self, other: &Self) -> bool {
        match (self.is_valid(), other.is_valid()) {
            (false, false) => true,
            (true, true) => self.index == other.index,
            _ => false,
        }
    }
}

impl Eq for IoInterface {}

impl PartialOrd for IoInterface {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for IoInterface {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        match (self.is_valid(), other.is_valid()) {
            (false, false) => CmpOrdering::Equal,
            (false, true) => CmpOrdering::Less,
            (true, false) => CmpOrdering::Greater,
            (true, true) => cmp_index(self.index, other.index),
        }
    }
}

/// Weak reference to an I/O handler's send side only.
#[derive(Clone)]
pub struct IoOutput {
    pub(crate) engine: Engine,
    pub(crate) index: ArenaIndex,
    #[allow(dead_code)]
    pub(crate) kind: IoKind,
}

impl IoOutput {
    pub fn is_valid(&self) -> bool {
        self.engine.io_slot_exists(self.index)
    }

    /// Enqueue `buffer` for sending. Thread-safe.
    pub fn send(&self, buffer: impl Into<bytes::Bytes>) -> Result<(), Expired> {
        self.send_to(buffer, None)
    }

    /// Enqueue `buffer` for sending to `endpoint` (UDP only; ignored targets
    /// are still accepted so callers can share code between TCP and UDP).
    pub fn send_to(&self, buffer: impl Into<bytes::Bytes>, endpoint: Option<SocketAddr>) -> Result<(), Expired> {
        self.engine.send_io_command(
            self.index,
            IoCommand::Send(crate::buffer::QueueEntry::new(buffer.into(), endpoint)),
        )
    }

    pub fn get_output_queue_stats(&self) -> Result<QueueStats, Expired> {
        self.engine.io_stats(self.index).ok_or(Expired)
    }
}

impl PartialEq for IoOutput {
    fn eq(&self, other: &Self) -> bool {
        match (self.is_valid(), other.is_valid()) {
            (false, false) => true,
            (true, true) => self.index == other.index,
            _ => false,
        }
    }
}

impl Eq for IoOutput {}

/// Type-erased handle over an acceptor, connector, or UDP entity.
#[derive(Clone)]
pub struct NetEntity {
    pub(crate) engine: Engine,
    pub(crate) index: ArenaIndex,
    pub(crate) kind: EntityKind,
}

impl NetEntity {
    pub fn is_valid(&self) -> bool {
        self.engine.entity_slot_exists(self.index, self.kind)
    }

    pub fn is_started(&self) -> Result<bool, Expired> {
        self.engine.entity_is_started(self.index, self.kind).ok_or(Expired)
    }

    /// Starts the entity, installing the callbacks that will receive its
    /// state-change and error notifications from then on.
    pub fn start(
        &self,
        state_change_cb: crate::net_entity_common::StateChangeCallback,
        error_cb: crate::net_entity_common::ErrorCallback,
    ) -> Result<(), Expired> {
        self.engine.send_entity_command(
            self.index,
            self.kind,
            EntityCommand::Start(state_change_cb, error_cb),
        )
    }

    pub fn stop(&self) -> Result<(), Expired> {
        self.engine
            .send_entity_command(self.index, self.kind, EntityCommand::Stop)
    }

    /// Run `f` against the entity's own socket (the acceptor's listener, the
    /// connector's current connection, or the UDP socket), on the task that
    /// owns it. Fails with `Expired` if the entity has no socket right now
    /// (not started yet, or a connector between connections).
    pub async fn visit_socket<F, R>(&self, f: F) -> Result<R, Expired>
    where
        F: FnOnce(SocketView<'_>) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.engine.visit_entity_socket(self.index, self.kind, f).await
    }

    /// Applies `f` to every currently active `IoOutput` owned by this
    /// entity (0 for a not-yet-connected connector, 0..N for an acceptor),
    /// returning the count visited.
    pub async fn visit_io_output<F>(&self, f: F) -> Result<usize, Expired>
    where
        F: FnMut(IoOutput) + Send + 'static,
    {
        self.engine.visit_io_output(self.index, self.kind, f).await
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }
}

impl std::fmt::Debug for NetEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetEntity")
            .field("index", &self.index)
            .field("kind", &self.kind)
            .finish()
    }
}

impl PartialEq for NetEntity {
    fn eq(&self, other: &Self) -> bool {
        match (self.is_valid(), other.is_valid()) {
            (false, false) => true,
            (true, true) => self.kind == other.kind && self.index == other.index,
            _ => false,
        }
    }
}

impl Eq for NetEntity {}

impl PartialOrd for NetEntity {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for NetEntity {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        match (self.is_valid(), other.is_valid()) {
            (false, false) => CmpOrdering::Equal,
            (false, true) => CmpOrdering::Less,
            (true, false) => CmpOrdering::Greater,
            (true, true) => (self.kind as u8)
                .cmp(&(other.kind as u8))
                .then(cmp_index(self.index, other.index)),
        }
    }
}
