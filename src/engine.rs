//! The engine: owns the executor, the generational arenas backing every
//! handle, and the factory methods that create acceptors, connectors, and
//! UDP entities.

use std::net::{TcpStream as StdTcpStream, UdpSocket as StdUdpSocket};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::runtime;
use tokio::sync::{mpsc, oneshot};

use crate::arena::{Arena, ArenaIndex};
use crate::buffer::QueueEntry;
use crate::config::{AcceptorConfig, ConnectorConfig, UdpConfig};
use crate::error::HandleError;
use crate::error::NetError;
use crate::framing::Framing;
use crate::handles::{IoKind, IoOutput, NetEntity};
use crate::io_common::{IoShared, MessageHandler};
use crate::net_entity_common::{EntityShared, ErrorCallback, StateChangeCallback};
use crate::queue::QueueStats;
use crate::resolver::EndpointResolver;

/// A view onto the raw socket backing an I/O handler, passed to a
/// `visit_socket` closure on the task that owns the handler.
pub enum SocketView<'a> {
    Tcp(&'a TcpStream),
    Udp(&'a UdpSocket),
    TcpListener(&'a TcpListener),
}

pub(crate) type VisitFn = Box<dyn for<'a> FnOnce(SocketView<'a>) + Send>;

/// Commands marshaled onto an I/O handler's owning task. `send`/`stop_io`/
/// `visit_socket` on [`IoInterface`]/[`IoOutput`] all funnel through this.
pub(crate) enum IoCommand {
    StartIo {
        framing: Framing,
        handler: MessageHandler,
        reply: oneshot::Sender<Result<(), NetError>>,
    },
    Send(QueueEntry),
    StopIo,
    Visit(VisitFn),
}

/// Commands marshaled onto an entity's (acceptor/connector/UDP) owning task.
pub(crate) enum EntityCommand {
    Start(StateChangeCallback, ErrorCallback),
    Stop,
    VisitIoOutputs(Box<dyn FnMut(IoOutput) + Send>, oneshot::Sender<usize>),
    /// Visits the entity's own socket (the acceptor's listener, the
    /// connector's current connection, or the UDP socket) rather than a
    /// child I/O handler's. Dropped without a reply if the entity has no
    /// socket yet (not started, or a connector between connections), which
    /// surfaces to the caller as `HandleError::Expired`.
    VisitSocket(VisitFn),
}

/// Which of the engine's three entity arenas a [`NetEntity`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Acceptor,
    Connector,
    Udp,
}

pub(crate) struct IoSlot {
    pub(crate) kind: IoKind,
    shared: Arc<IoShared>,
    cmd_tx: mpsc::UnboundedSender<IoCommand>,
}

pub(crate) struct EntitySlot {
    shared: Arc<EntityShared>,
    cmd_tx: mpsc::UnboundedSender<EntityCommand>,
}

struct EngineInner {
    rt: runtime::Handle,
    io_arena: StdMutex<Arena<IoSlot>>,
    acceptors: StdMutex<Arena<EntitySlot>>,
    connectors: StdMutex<Arena<EntitySlot>>,
    udps: StdMutex<Arena<EntitySlot>>,
}

/// Owns the executor and the arenas of acceptors, connectors, and UDP
/// entities. Cheap to clone: every clone shares the same arenas and
/// executor handle.
#[derive(Clone)]
pub struct Engine(Arc<EngineInner>);

impl Engine {
    /// Spawns a dedicated background OS thread running a current-thread
    /// Tokio runtime, matching the single-worker-thread execution model:
    /// every entity and I/O handler task this engine creates runs on that
    /// one thread.
    pub fn new() -> std::io::Result<Self> {
        let runtime = runtime::Builder::new_current_thread().enable_all().build()?;
        let handle = runtime.handle().clone();
        std::thread::Builder::new()
            .name("netcore-executor".into())
            .spawn(move || {
                runtime.block_on(std::future::pending::<()>());
            })?;
        Ok(Self::with_handle(handle))
    }

    /// Attaches to a runtime the application already owns (e.g. the `#[tokio::main]`
    /// runtime), instead of spawning a dedicated thread.
    pub fn with_handle(rt: runtime::Handle) -> Self {
        Self(Arc::new(EngineInner {
            rt,
            io_arena: StdMutex::new(Arena::new()),
            acceptors: StdMutex::new(Arena::new()),
            connectors: StdMutex::new(Arena::new()),
            udps: StdMutex::new(Arena::new()),
        }))
    }

    pub(crate) fn spawn<F>(&self, fut: F) -> tokio::task::JoinHandle<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.0.rt.spawn(fut)
    }

    // -- I/O arena -----------------------------------------------------

    pub(crate) fn register_io(
        &self,
        kind: IoKind,
        shared: Arc<IoShared>,
        cmd_tx: mpsc::UnboundedSender<IoCommand>,
    ) -> ArenaIndex {
        self.0.io_arena.lock().unwrap().insert(IoSlot { kind, shared, cmd_tx })
    }

    pub(crate) fn unregister_io(&self, idx: ArenaIndex) {
        self.0.io_arena.lock().unwrap().remove(idx);
    }

    pub(crate) fn io_slot_exists(&self, idx: ArenaIndex) -> bool {
        self.0.io_arena.lock().unwrap().contains(idx)
    }

    pub(crate) fn io_is_started(&self, idx: ArenaIndex) -> Option<bool> {
        self.0.io_arena.lock().unwrap().get(idx).map(|s| s.shared.is_started())
    }

    pub(crate) fn io_stats(&self, idx: ArenaIndex) -> Option<QueueStats> {
        self.0.io_arena.lock().unwrap().get(idx).map(|s| s.shared.stats())
    }

    pub(crate) fn send_io_command(&self, idx: ArenaIndex, cmd: IoCommand) -> Result<(), HandleError> {
        let tx = self.0.io_arena.lock().unwrap().get(idx).map(|s| s.cmd_tx.clone());
        tx.ok_or(HandleError)?.send(cmd).map_err(|_| HandleError)
    }

    pub(crate) async fn visit_socket<F, R>(&self, idx: ArenaIndex, f: F) -> Result<R, HandleError>
    where
        F: FnOnce(SocketView<'_>) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let visit: VisitFn = Box::new(move |view| {
            let _ = tx.send(f(view));
        });
        self.send_io_command(idx, IoCommand::Visit(visit))?;
        rx.await.map_err(|_| HandleError)
    }

    // -- entity arenas ---------------------------------------------------

    fn entity_arena(&self, kind: EntityKind) -> &StdMutex<Arena<EntitySlot>> {
        match kind {
            EntityKind::Acceptor => &self.0.acceptors,
            EntityKind::Connector => &self.0.connectors,
            EntityKind::Udp => &self.0.udps,
        }
    }

    pub(crate) fn register_entity(
        &self,
        kind: EntityKind,
        shared: Arc<EntityShared>,
        cmd_tx: mpsc::UnboundedSender<EntityCommand>,
    ) -> ArenaIndex {
        self.entity_arena(kind).lock().unwrap().insert(EntitySlot { shared, cmd_tx })
    }

    pub(crate) fn unregister_entity(&self, idx: ArenaIndex, kind: EntityKind) {
        self.entity_arena(kind).lock().unwrap().remove(idx);
    }

    pub(crate) fn entity_slot_exists(&self, idx: ArenaIndex, kind: EntityKind) -> bool {
        self.entity_arena(kind).lock().unwrap().contains(idx)
    }

    pub(crate) fn entity_is_started(&self, idx: ArenaIndex, kind: EntityKind) -> Option<bool> {
        self.entity_arena(kind).lock().unwrap().get(idx).map(|s| s.shared.is_started())
    }

    pub(crate) fn send_entity_command(
        &self,
        idx: ArenaIndex,
        kind: EntityKind,
        cmd: EntityCommand,
    ) -> Result<(), HandleError> {
        let tx = self.entity_arena(kind).lock().unwrap().get(idx).map(|s| s.cmd_tx.clone());
        tx.ok_or(HandleError)?.send(cmd).map_err(|_| HandleError)
    }

    pub(crate) async fn visit_io_output<F>(&self, idx: ArenaIndex, kind: EntityKind, f: F) -> Result<usize, HandleError>
    where
        F: FnMut(IoOutput) + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.send_entity_command(idx, kind, EntityCommand::VisitIoOutputs(Box::new(f), tx))?;
        rx.await.map_err(|_| HandleError)
    }

    pub(crate) async fn visit_entity_socket<F, R>(&self, idx: ArenaIndex, kind: EntityKind, f: F) -> Result<R, HandleError>
    where
        F: FnOnce(SocketView<'_>) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let visit: VisitFn = Box::new(move |view| {
            let _ = tx.send(f(view));
        });
        self.send_entity_command(idx, kind, EntityCommand::VisitSocket(visit))?;
        rx.await.map_err(|_| HandleError)
    }

    // -- factories --------------------------------------------------------

    /// Spawns a `TcpAcceptor`'s owning task (idle until `start()` is
    /// called) and returns a handle to it.
    pub fn make_tcp_acceptor(&self, config: AcceptorConfig) -> NetEntity {
        crate::tcp_acceptor::spawn(self.clone(), config)
    }

    /// Spawns a `TcpConnector` using the default `tokio::net::lookup_host`-backed
    /// resolver.
    pub fn make_tcp_connector(&self, config: ConnectorConfig) -> NetEntity {
        self.make_tcp_connector_with_resolver(config, Arc::new(crate::resolver::DefaultResolver))
    }

    /// Spawns a `TcpConnector` with a caller-supplied resolver (tests
    /// substitute a fake one to avoid depending on real DNS).
    pub fn make_tcp_connector_with_resolver(
        &self,
        config: ConnectorConfig,
        resolver: Arc<dyn EndpointResolver>,
    ) -> NetEntity {
        crate::tcp_connector::spawn(self.clone(), config, resolver)
    }

    /// Spawns a `UdpEntity`'s owning task (idle until `start()` is called).
    pub fn make_udp_entity(&self, config: UdpConfig) -> NetEntity {
        crate::udp_io::spawn(self.clone(), config)
    }

    /// Stops and forgets one entity.
    pub fn remove(&self, entity: &NetEntity) {
        let _ = entity.stop();
        self.unregister_entity(entity.index, entity.kind());
    }

    /// Stops and forgets every acceptor, connector, and UDP entity.
    pub fn remove_all(&self) {
        for kind in [EntityKind::Acceptor, EntityKind::Connector, EntityKind::Udp] {
            let indices: Vec<ArenaIndex> = self
                .entity_arena(kind)
                .lock()
                .unwrap()
                .iter()
                .map(|(idx, _)| idx)
                .collect();
            for idx in indices {
                let _ = self.send_entity_command(idx, kind, EntityCommand::Stop);
                self.unregister_entity(idx, kind);
            }
        }
    }
}

/// Converts a blocking std socket returned by `socket2` into its Tokio
/// equivalent, the pattern used throughout for applying pre-bind options
/// before handing a socket to the async runtime.
pub(crate) fn tokio_tcp_listener_from_socket2(socket: socket2::Socket) -> std::io::Result<tokio::net::TcpListener> {
    socket.set_nonblocking(true)?;
    let std_listener: std::net::TcpListener = socket.into();
    tokio::net::TcpListener::from_std(std_listener)
}

pub(crate) fn tokio_tcp_stream_from_socket2(socket: socket2::Socket) -> std::io::Result<TcpStream> {
    socket.set_nonblocking(true)?;
    let std_stream: StdTcpStream = socket.into();
    TcpStream::from_std(std_stream)
}

pub(crate) fn tokio_udp_socket_from_socket2(socket: socket2::Socket) -> std::io::Result<UdpSocket> {
    socket.set_nonblocking(true)?;
    let std_socket: StdUdpSocket = socket.into();
    UdpSocket::from_std(std_socket)
}
