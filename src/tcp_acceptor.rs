//! `TcpAcceptor`: listens, accepts, and owns its child `TcpIoHandler`s.

use std::collections::HashMap;

use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::arena::ArenaIndex;
use crate::config::AcceptorConfig;
use crate::engine::{tokio_tcp_listener_from_socket2, Engine, EntityCommand, EntityKind, SocketView};
use crate::error::NetError;
use crate::handles::{IoKind, NetEntity};
use crate::io_common::TeardownNotice;
use crate::net_entity_common::{ErrorSource, NetEntityCommon};
use crate::wait_queue::WaitQueue;

/// Spawns a `TcpAcceptor`'s owning task, idle until `NetEntity::start` binds
/// the listening socket.
pub(crate) fn spawn(engine: Engine, config: AcceptorConfig) -> NetEntity {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let common = NetEntityCommon::new();
    let shared = common.shared();
    let index = engine.register_entity(EntityKind::Acceptor, shared, cmd_tx);

    let handle = NetEntity {
        engine: engine.clone(),
        index,
        kind: EntityKind::Acceptor,
    };

    engine.spawn(run(engine.clone(), index, config, common, cmd_rx));
    handle
}

fn bind_listener(config: &AcceptorConfig) -> std::io::Result<TcpListener> {
    log::trace!("Binding TCP acceptor to {}", config.bind);
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(config.bind),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;
    if config.reuse_addr {
        socket.set_reuse_address(true)?;
    }
    socket.bind(&config.bind.into())?;
    socket.listen(1024)?;
    tokio_tcp_listener_from_socket2(socket)
}

fn self_entity(engine: &Engine, index: ArenaIndex) -> NetEntity {
    NetEntity {
        engine: engine.clone(),
        index,
        kind: EntityKind::Acceptor,
    }
}

async fn run(
    engine: Engine,
    self_index: ArenaIndex,
    config: AcceptorConfig,
    mut common: NetEntityCommon,
    mut cmd_rx: mpsc::UnboundedReceiver<EntityCommand>,
) {
    loop {
        match cmd_rx.recv().await {
            None => return,
            Some(EntityCommand::Stop) => {
                engine.unregister_entity(self_index, EntityKind::Acceptor);
                return;
            }
            Some(EntityCommand::VisitIoOutputs(_, reply)) => {
                let _ = reply.send(0);
            }
            Some(EntityCommand::VisitSocket(_)) => {
                // No listener yet; dropping the closure surfaces `Expired`.
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

    let listener = match bind_listener(&config) {
        Ok(l) => l,
        Err(e) => {
            log::error!("Failed to bind TCP acceptor to {}: {}", config.bind, e);
            common.fire_error(ErrorSource::Entity(self_entity(&engine, self_index)), NetError::Io(e));
            engine.unregister_entity(self_index, EntityKind::Acceptor);
            return;
        }
    };
    log::debug!("TCP acceptor listening on {}", config.bind);

    // Children report their own teardown here; the index lets the acceptor
    // find and drop its entry in `children` and re-deliver the count to the
    // application's state-change callback.
    let (notifier, mut teardown_rx) = WaitQueue::channel::<TeardownNotice>();
    let mut children: HashMap<ArenaIndex, ()> = HashMap::new();

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
                        let mut visited = 0;
                        for idx in children.keys() {
                            let io = crate::handles::IoInterface {
                                engine: engine.clone(),
                                index: *idx,
                                kind: IoKind::Tcp,
                            };
                            if let Ok(output) = io.make_io_output() {
                                f(output);
                                visited += 1;
                            }
                        }
                        let _ = reply.send(visited);
                    }
                    Some(EntityCommand::VisitSocket(f)) => {
                        f(SocketView::TcpListener(&listener));
                    }
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        log::debug!("Accepted TCP connection from {}", peer);
                        let io = crate::tcp_io::spawn(engine.clone(), stream, peer, notifier.clone());
                        children.insert(io.index, ());
                        common.fire_state_change(io, children.len(), true);
                    }
                    Err(e) => {
                        log::warn!("Accept failed on {}: {}", config.bind, e);
                        common.fire_error(ErrorSource::Entity(self_entity(&engine, self_index)), NetError::Io(e));
                        break 'run;
                    }
                }
            }
            notice = teardown_rx.recv() => {
                if let Some(notice) = notice {
                    children.remove(&notice.handler_index);
                    let io = crate::handles::IoInterface {
                        engine: engine.clone(),
                        index: notice.handler_index,
                        kind: IoKind::Tcp,
                    };
                    common.fire_state_change(io, children.len(), false);
                    if let Some(err) = notice.error {
                        common.fire_error(ErrorSource::Entity(self_entity(&engine, self_index)), err);
                    }
                }
            }
        }
    }

    log::debug!("TCP acceptor on {} stopping with {} children", config.bind, children.len());
    teardown_rx.close();
    for idx in children.keys() {
        let io = crate::handles::IoInterface {
            engine: engine.clone(),
            index: *idx,
            kind: IoKind::Tcp,
        };
        let _ = io.stop_io();
    }
    children.clear();
    drop(listener);
    let _ = common.try_stop();
    common.fire_error(ErrorSource::Entity(self_entity(&engine, self_index)), NetError::AcceptorStopped);
    engine.unregister_entity(self_index, EntityKind::Acceptor);
}
