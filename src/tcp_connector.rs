//! `TcpConnector`: resolves an endpoint, connects, and owns at most one
//! `TcpIoHandler` at a time, reconnecting per its [`ReconnectPolicy`].

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::arena::ArenaIndex;
use crate::config::{ConnectorConfig, Endpoint};
use crate::engine::{Engine, EntityCommand, EntityKind, IoCommand};
use crate::error::NetError;
use crate::handles::NetEntity;
use crate::io_common::TeardownNotice;
use crate::net_entity_common::{ErrorSource, NetEntityCommon};
use crate::resolver::EndpointResolver;
use crate::wait_queue::WaitQueue;

/// Spawns a `TcpConnector`'s owning task, idle until `NetEntity::start`
/// begins the resolve/connect cycle.
pub(crate) fn spawn(engine: Engine, config: ConnectorConfig, resolver: Arc<dyn EndpointResolver>) -> NetEntity {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let common = NetEntityCommon::new();
    let shared = common.shared();
    let index = engine.register_entity(EntityKind::Connector, shared, cmd_tx);

    let handle = NetEntity {
        engine: engine.clone(),
        index,
        kind: EntityKind::Connector,
    };

    engine.spawn(run(engine.clone(), index, config, resolver, common, cmd_rx));
    handle
}

fn self_entity(engine: &Engine, index: ArenaIndex) -> NetEntity {
    NetEntity {
        engine: engine.clone(),
        index,
        kind: EntityKind::Connector,
    }
}

/// Resolves every configured endpoint in order and connects to the first
/// address that accepts, re-resolving `Unresolved` endpoints on every call
/// so the connector observes DNS changes across reconnect attempts.
async fn connect_once(
    config: &ConnectorConfig,
    resolver: &dyn EndpointResolver,
) -> Result<(TcpStream, std::net::SocketAddr), NetError> {
    let mut last_err = None;
    for endpoint in &config.endpoints {
        let candidates = match endpoint {
            Endpoint::Resolved(addr) => vec![*addr],
            Endpoint::Unresolved { host, service } => match resolver.resolve(host, service).await {
                Ok(addrs) => addrs,
                Err(e) => {
                    last_err = Some(NetError::Io(e));
                    continue;
                }
            },
        };
        for addr in candidates {
            match TcpStream::connect(addr).await {
                Ok(stream) => return Ok((stream, addr)),
                Err(e) => last_err = Some(NetError::Io(e)),
            }
        }
    }
    Err(last_err.unwrap_or_else(|| NetError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, "no endpoints configured"))))
}

async fn run(
    engine: Engine,
    self_index: ArenaIndex,
    config: ConnectorConfig,
    resolver: Arc<dyn EndpointResolver>,
    mut common: NetEntityCommon,
    mut cmd_rx: mpsc::UnboundedReceiver<EntityCommand>,
) {
    loop {
        match cmd_rx.recv().await {
            None => return,
            Some(EntityCommand::Stop) => {
                engine.unregister_entity(self_index, EntityKind::Connector);
                return;
            }
            Some(EntityCommand::VisitIoOutputs(_, reply)) => {
                let _ = reply.send(0);
            }
            Some(EntityCommand::VisitSocket(_)) => {
                // Not connected yet; dropping the closure surfaces `Expired`.
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

    let mut attempt: u32 = 0;

    'connector: loop {
        enum Outcome {
            Cmd(Option<EntityCommand>),
            Connected(Result<(TcpStream, std::net::SocketAddr), NetError>),
        }

        let outcome = tokio::select! {
            cmd = cmd_rx.recv() => Outcome::Cmd(cmd),
            res = connect_once(&config, resolver.as_ref()) => Outcome::Connected(res),
        };

        match outcome {
            Outcome::Cmd(None) | Outcome::Cmd(Some(EntityCommand::Stop)) => break 'connector,
            Outcome::Cmd(Some(EntityCommand::Start(..))) => {
                common.fire_error(
                    ErrorSource::Entity(self_entity(&engine, self_index)),
                    NetError::AlreadyStarted,
                );
            }
            Outcome::Cmd(Some(EntityCommand::VisitIoOutputs(_, reply))) => {
                let _ = reply.send(0);
            }
            Outcome::Cmd(Some(EntityCommand::VisitSocket(_))) => {
                // Still resolving/connecting; no socket to visit yet.
            }
            Outcome::Connected(Ok((stream, peer))) => {
                log::debug!("Connected to {}", peer);
                attempt = 0;
                let (notifier, mut teardown_rx) = WaitQueue::channel::<TeardownNotice>();
                let io = crate::tcp_io::spawn(engine.clone(), stream, peer, notifier);
                common.fire_state_change(io.clone(), 1, true);

                enum ConnectedExit {
                    Stopped,
                    Closed,
                }

                let exit = 'connected: loop {
                    tokio::select! {
                        cmd = cmd_rx.recv() => {
                            match cmd {
                                None | Some(EntityCommand::Stop) => {
                                    let _ = io.stop_io();
                                    break 'connected ConnectedExit::Stopped;
                                }
                                Some(EntityCommand::Start(..)) => {
                                    common.fire_error(
                                        ErrorSource::Entity(self_entity(&engine, self_index)),
                                        NetError::AlreadyStarted,
                                    );
                                }
                                Some(EntityCommand::VisitIoOutputs(mut f, reply)) => {
                                    if let Ok(output) = io.make_io_output() {
                                        f(output);
                                        let _ = reply.send(1);
                                    } else {
                                        let _ = reply.send(0);
                                    }
                                }
                                Some(EntityCommand::VisitSocket(f)) => {
                                    // The connector doesn't own the socket itself; forward
                                    // the visit onto the `TcpIoHandler` task that does.
                                    let _ = engine.send_io_command(io.index, IoCommand::Visit(f));
                                }
                            }
                        }
                        notice = teardown_rx.recv() => {
                            common.fire_state_change(io.clone(), 0, false);
                            if let Some(Some(err)) = notice.map(|n| n.error) {
                                common.fire_error(ErrorSource::Entity(self_entity(&engine, self_index)), err);
                            }
                            break 'connected ConnectedExit::Closed;
                        }
                    }
                };

                match exit {
                    ConnectedExit::Stopped => break 'connector,
                    ConnectedExit::Closed => {
                        // Closure (clean or errored) re-enters Waiting per the
                        // reconnect policy exactly like a failed connect attempt.
                        attempt += 1;
                        match config.reconnect.next_delay(attempt) {
                            None => break 'connector,
                            Some(delay) => {
                                log::debug!("Connection closed, reconnecting in {:?} (attempt {})", delay, attempt);
                                if wait_or_stop(&engine, self_index, &mut common, &mut cmd_rx, delay).await {
                                    break 'connector;
                                }
                            }
                        }
                    }
                }
            }
            Outcome::Connected(Err(e)) => {
                log::warn!("Connect attempt {} failed: {}", attempt + 1, e);
                common.fire_error(ErrorSource::Entity(self_entity(&engine, self_index)), e);
                attempt += 1;
                match config.reconnect.next_delay(attempt) {
                    None => break 'connector,
                    Some(delay) => {
                        log::debug!("Retrying in {:?} (attempt {})", delay, attempt);
                        let stop_requested = wait_or_stop(&engine, self_index, &mut common, &mut cmd_rx, delay).await;
                        if stop_requested {
                            break 'connector;
                        }
                    }
                }
            }
        }
    }

    log::debug!("TCP connector stopping");
    let _ = common.try_stop();
    common.fire_error(
        ErrorSource::Entity(self_entity(&engine, self_index)),
        NetError::ConnectorStopped,
    );
    engine.unregister_entity(self_index, EntityKind::Connector);
}

/// Sleeps for `delay` unless a `Stop` (or channel closure) arrives first;
/// returns `true` if the wait was cut short by a stop request. A
/// `VisitIoOutputs`/`VisitSocket` arriving mid-wait is answered in place
/// (0 outputs visited, no socket to visit) rather than dropped, so it
/// doesn't cut the delay short or strand the caller's oneshot as `Expired`.
async fn wait_or_stop(
    engine: &Engine,
    self_index: ArenaIndex,
    common: &mut NetEntityCommon,
    cmd_rx: &mut mpsc::UnboundedReceiver<EntityCommand>,
    delay: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + delay;
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    None | Some(EntityCommand::Stop) => return true,
                    Some(EntityCommand::Start(..)) => {
                        common.fire_error(
                            ErrorSource::Entity(self_entity(engine, self_index)),
                            NetError::AlreadyStarted,
                        );
                    }
                    Some(EntityCommand::VisitIoOutputs(_, reply)) => {
                        let _ = reply.send(0);
                    }
                    Some(EntityCommand::VisitSocket(_)) => {
                        // Between connections; dropping the closure surfaces `Expired`.
                    }
                }
            }
            _ = tokio::time::sleep_until(deadline) => return false,
        }
    }
}
