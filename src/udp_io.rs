//! `UdpEntity`: a single object that is both an entity and an I/O handler.
//!
//! Unlike TCP, there is no separate acceptor/connector: binding, framing
//! selection, and datagram I/O all happen on one actor task, started and
//! stopped through the same `NetEntity`/`IoInterface` pair every other
//! component exposes.

use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::arena::ArenaIndex;
use crate::config::UdpConfig;
use crate::engine::{tokio_udp_socket_from_socket2, Engine, EntityCommand, EntityKind, IoCommand, SocketView};
use crate::error::NetError;
use crate::handles::{IoInterface, IoKind, NetEntity};
use crate::io_common::{IoHandlerCommon, MessageHandler, TeardownNotice};
use crate::net_entity_common::{ErrorSource, NetEntityCommon};
use crate::wait_queue::WaitQueue;

/// Spawns a `UdpEntity`'s owning task, idle until `NetEntity::start` is
/// called.
pub(crate) fn spawn(engine: Engine, config: UdpConfig) -> NetEntity {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let common = NetEntityCommon::new();
    let shared = common.shared();
    let index = engine.register_entity(EntityKind::Udp, shared, cmd_tx);

    let handle = NetEntity {
        engine: engine.clone(),
        index,
        kind: EntityKind::Udp,
    };

    engine.spawn(run(engine.clone(), index, config, common, cmd_rx));
    handle
}

fn bind_socket(config: &UdpConfig) -> std::io::Result<UdpSocket> {
    log::trace!("Binding UDP socket to {:?}", config.bind);
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(config.bind.or(config.default_remote).unwrap_or_else(|| "0.0.0.0:0".parse().unwrap())),
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )?;
    socket.set_reuse_address(true)?;
    let bind_addr = config.bind.unwrap_or_else(|| "0.0.0.0:0".parse().unwrap());
    socket.bind(&bind_addr.into())?;
    tokio_udp_socket_from_socket2(socket)
}

/// Owns the bound socket once the entity is running; lets `visit_socket`
/// reach it and the accept/read/write loop use it without an `Option` check
/// at every call site.
struct Bound {
    socket: Arc<UdpSocket>,
    config: UdpConfig,
    io_index: ArenaIndex,
}

enum DatagramEvent {
    Received { bytes: Bytes, from: std::net::SocketAddr },
    Err(std::io::Error),
}

async fn recv_loop(socket: Arc<UdpSocket>, max_size: usize, events: mpsc::UnboundedSender<DatagramEvent>) {
    let mut buf = vec![0u8; max_size];
    loop {
        let event = match socket.recv_from(&mut buf).await {
            Ok((n, from)) => DatagramEvent::Received {
                bytes: Bytes::copy_from_slice(&buf[..n]),
                from,
            },
            Err(e) => DatagramEvent::Err(e),
        };
        let is_terminal = matches!(event, DatagramEvent::Err(_));
        if events.send(event).is_err() || is_terminal {
            return;
        }
    }
}

async fn run(
    engine: Engine,
    self_index: ArenaIndex,
    config: UdpConfig,
    mut common: NetEntityCommon,
    mut cmd_rx: mpsc::UnboundedReceiver<EntityCommand>,
) {
    // Idle until started.
    loop {
        match cmd_rx.recv().await {
            None => return,
            Some(EntityCommand::Stop) => {
                engine.unregister_entity(self_index, EntityKind::Udp);
                return;
            }
            Some(EntityCommand::VisitIoOutputs(_, reply)) => {
                let _ = reply.send(0);
            }
            Some(EntityCommand::VisitSocket(_)) => {
                // No socket yet; dropping the closure surfaces `Expired`.
            }
            Some(EntityCommand::Start(state_change_cb, error_cb)) => {
                common.set_callbacks(state_change_cb, error_cb);
                if let Err(e) = common.try_start() {
                    common.fire_error(ErrorSource::Entity(self_entity(&engine, self_index)), e);
                    continue;
                }
                break;
            }
        }
    }

    let socket = match bind_socket(&config) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            log::error!("Failed to bind UDP socket to {:?}: {}", config.bind, e);
            common.fire_error(ErrorSource::Entity(self_entity(&engine, self_index)), NetError::Io(e));
            engine.unregister_entity(self_index, EntityKind::Udp);
            return;
        }
    };
    log::debug!("UDP entity bound to {:?}", config.bind);

    let (io_cmd_tx, mut io_cmd_rx) = mpsc::unbounded_channel::<IoCommand>();
    // No parent to notify: the entity loop owns and reacts to its own
    // teardown directly, so the receiving half is simply dropped.
    let (notifier, _teardown_rx) = WaitQueue::channel::<TeardownNotice>();
    let io_common = IoHandlerCommon::new(
        config.default_remote.unwrap_or_else(|| "0.0.0.0:0".parse().unwrap()),
        notifier,
    );
    let io_shared = io_common.shared();
    let io_index = engine.register_io(IoKind::Udp, io_shared, io_cmd_tx);
    let io_handle = IoInterface {
        engine: engine.clone(),
        index: io_index,
        kind: IoKind::Udp,
    };

    common.fire_state_change(io_handle.clone(), 1, true);

    let bound = Bound {
        socket: Arc::clone(&socket),
        config: config.clone(),
        io_index,
    };

    let mut io_common = io_common;
    let mut handler: Option<MessageHandler> = None;
    let mut recv_task: Option<JoinHandle<()>> = None;
    let (datagram_tx, mut datagram_rx) = mpsc::unbounded_channel::<DatagramEvent>();
    let mut teardown_error: Option<NetError> = None;

    'run: loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    None | Some(EntityCommand::Stop) => break 'run,
                    Some(EntityCommand::Start(..)) => {
                        if let Err(e) = common.try_start() {
                            common.fire_error(ErrorSource::Entity(self_entity(&engine, self_index)), e);
                        }
                    }
                    Some(EntityCommand::VisitIoOutputs(mut f, reply)) => {
                        if io_handle.is_valid() {
                            f(io_handle.make_io_output().unwrap());
                            let _ = reply.send(1);
                        } else {
                            let _ = reply.send(0);
                        }
                    }
                    Some(EntityCommand::VisitSocket(f)) => {
                        f(SocketView::Udp(&bound.socket));
                    }
                }
            }
            io_cmd = io_cmd_rx.recv() => {
                match io_cmd {
                    None => break 'run,
                    Some(IoCommand::StartIo { handler: h, reply, .. }) => {
                        if io_common.start_io_setup() {
                            handler = Some(h);
                            if !bound.config.send_only {
                                let task = engine.spawn(recv_loop(
                                    Arc::clone(&bound.socket),
                                    bound.config.max_datagram_size,
                                    datagram_tx.clone(),
                                ));
                                recv_task = Some(task);
                            }
                            let _ = reply.send(Ok(()));
                        } else {
                            let _ = reply.send(Err(NetError::AlreadyStarted));
                        }
                    }
                    Some(IoCommand::Send(entry)) => {
                        if let Some(entry) = io_common.start_write_setup(entry) {
                            if send_entry(&bound, &entry).await.is_err() {
                                teardown_error = Some(NetError::Io(std::io::Error::new(std::io::ErrorKind::Other, "udp send failed")));
                            }
                            while let Some(next) = io_common.next_write() {
                                let _ = send_entry(&bound, &next).await;
                            }
                        }
                    }
                    Some(IoCommand::StopIo) => {
                        io_common.stop();
                        break 'run;
                    }
                    Some(IoCommand::Visit(f)) => {
                        f(SocketView::Udp(&bound.socket));
                    }
                }
            }
            event = datagram_rx.recv(), if recv_task.is_some() => {
                match event {
                    None => {}
                    Some(DatagramEvent::Received { bytes, from }) => {
                        let keep_going = match &mut handler {
                            Some(h) => h(&bytes, from),
                            None => true,
                        };
                        if !keep_going {
                            teardown_error = Some(NetError::HandlerTerminated);
                            break 'run;
                        }
                    }
                    Some(DatagramEvent::Err(e)) => {
                        log::warn!("UDP recv error on {:?}: {}", config.bind, e);
                        teardown_error = Some(NetError::Io(e));
                        break 'run;
                    }
                }
            }
        }
    }

    log::debug!("UDP entity on {:?} stopping", config.bind);
    if let Some(task) = recv_task.take() {
        task.abort();
    }
    io_common.stop();
    engine.unregister_io(bound.io_index);
    common.fire_state_change(io_handle, 0, false);
    if let Some(err) = teardown_error {
        common.fire_error(ErrorSource::Entity(self_entity(&engine, self_index)), err);
    }
    let _ = common.try_stop();
    common.fire_error(ErrorSource::Entity(self_entity(&engine, self_index)), NetError::UdpEntityStopped);
    engine.unregister_entity(self_index, EntityKind::Udp);
}

async fn send_entry(bound: &Bound, entry: &crate::buffer::QueueEntry) -> std::io::Result<()> {
    match entry.endpoint.or(bound.config.default_remote) {
        Some(addr) => {
            bound.socket.send_to(&entry.buffer, addr).await?;
        }
        None => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "no destination endpoint for UDP send",
            ));
        }
    }
    Ok(())
}

fn self_entity(engine: &Engine, index: ArenaIndex) -> NetEntity {
    NetEntity {
        engine: engine.clone(),
        index,
        kind: EntityKind::Udp,
    }
}
