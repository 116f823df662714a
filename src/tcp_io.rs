//! Per-connection TCP I/O handler: the actor task behind an `IoInterface`.
//!
//! A handler owns one `tokio::net::TcpStream`, split into an owned read half
//! and an owned write half so the read-framing loop and the command-driven
//! write path can make progress independently without borrow conflicts. The
//! read half is only put to work once `start_io` selects a framing mode; it
//! runs as a child task so `stop_io` can cancel an in-flight read by
//! aborting it outright, rather than threading cancellation through the
//! stream.

use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::arena::ArenaIndex;
use crate::engine::{Engine, IoCommand, SocketView};
use crate::error::NetError;
use crate::framing::Framing;
use crate::handles::{IoInterface, IoKind};
use crate::io_common::{IoHandlerCommon, MessageHandler, TeardownNotice};
use crate::wait_queue::WaitQueueSender;

/// Spawns the actor task owning `stream` and returns a handle to it. The
/// handler is idle — no reads are issued — until `IoInterface::start_io` is
/// called on the returned handle.
pub(crate) fn spawn(
    engine: Engine,
    stream: TcpStream,
    remote_endpoint: SocketAddr,
    notifier: WaitQueueSender<TeardownNotice>,
) -> IoInterface {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let common = IoHandlerCommon::new(remote_endpoint, notifier);
    let shared = common.shared();
    let index = engine.register_io(IoKind::Tcp, shared, cmd_tx);

    let handle = IoInterface {
        engine: engine.clone(),
        index,
        kind: IoKind::Tcp,
    };

    engine.spawn(run(engine.clone(), index, stream, common, cmd_rx));
    handle
}

/// How many more bytes are needed before the accumulated buffer forms a
/// complete frame, or `None` once it does.
fn bytes_needed(framing: &Framing, accumulated: &[u8]) -> Option<usize> {
    match framing {
        Framing::FixedSize(n) => {
            if accumulated.len() < *n {
                Some(n - accumulated.len())
            } else {
                None
            }
        }
        Framing::Delimiter(delim) => {
            if accumulated.ends_with(delim.as_slice()) {
                None
            } else {
                Some(1)
            }
        }
        Framing::Header { header_size, frame_fn } => {
            if accumulated.len() < *header_size {
                Some(header_size - accumulated.len())
            } else {
                match frame_fn(accumulated) {
                    0 => None,
                    need => Some(need),
                }
            }
        }
        Framing::SendOnly => None,
    }
}

/// Reads exactly one complete frame, or `Ok(None)` on a clean EOF before any
/// bytes of a new frame arrived. Generic over the reader so the framing
/// logic can be exercised against a mock stream in tests without a real
/// socket.
async fn read_frame<R: tokio::io::AsyncRead + Unpin>(rd: &mut R, framing: &Framing) -> std::io::Result<Option<Bytes>> {
    let mut accumulated = BytesMut::new();
    loop {
        match bytes_needed(framing, &accumulated) {
            None => return Ok(Some(accumulated.freeze())),
            Some(need) => {
                let start = accumulated.len();
                accumulated.resize(start + need, 0);
                let n = rd.read(&mut accumulated[start..]).await?;
                if n == 0 {
                    return Ok(None);
                }
                accumulated.truncate(start + n);
            }
        }
    }
}

enum ReadEvent {
    Frame(Bytes),
    Eof,
    Err(std::io::Error),
}

async fn read_loop(mut rd: OwnedReadHalf, framing: Framing, events: mpsc::UnboundedSender<ReadEvent>) {
    loop {
        let event = match read_frame(&mut rd, &framing).await {
            Ok(Some(frame)) => ReadEvent::Frame(frame),
            Ok(None) => ReadEvent::Eof,
            Err(e) => ReadEvent::Err(e),
        };
        let is_terminal = !matches!(event, ReadEvent::Frame(_));
        if events.send(event).is_err() || is_terminal {
            return;
        }
    }
}

fn broken_pipe() -> NetError {
    NetError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "write failed"))
}

async fn run(
    engine: Engine,
    self_index: ArenaIndex,
    stream: TcpStream,
    mut common: IoHandlerCommon,
    mut cmd_rx: mpsc::UnboundedReceiver<IoCommand>,
) {
    let (rd, mut wr) = stream.into_split();
    let mut rd = Some(rd);
    let mut handler: Option<MessageHandler> = None;
    let mut read_task: Option<JoinHandle<()>> = None;
    let (read_tx, mut read_rx) = mpsc::unbounded_channel::<ReadEvent>();
    let mut teardown_error: Option<NetError> = None;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    None => break,
                    Some(IoCommand::StartIo { framing, handler: h, reply }) => {
                        if common.start_io_setup() {
                            log::debug!("Starting I/O for {}", common.remote_endpoint);
                            handler = Some(h);
                            if !matches!(framing, Framing::SendOnly) {
                                if let Some(rd) = rd.take() {
                                    read_task = Some(engine.spawn(read_loop(rd, framing, read_tx.clone())));
                                }
                            }
                            let _ = reply.send(Ok(()));
                        } else {
                            let _ = reply.send(Err(NetError::AlreadyStarted));
                        }
                    }
                    Some(IoCommand::Send(entry)) => {
                        if let Some(entry) = common.start_write_setup(entry) {
                            if wr.write_all(&entry.buffer).await.is_err() {
                                log::warn!("Write failed on {}, tearing down handler", common.remote_endpoint);
                                teardown_error = Some(broken_pipe());
                                break;
                            }
                            while let Some(next) = common.next_write() {
                                if wr.write_all(&next.buffer).await.is_err() {
                                    log::warn!("Write failed on {}, tearing down handler", common.remote_endpoint);
                                    teardown_error = Some(broken_pipe());
                                    break;
                                }
                            }
                        }
                    }
                    Some(IoCommand::StopIo) => {
                        common.stop();
                        break;
                    }
                    Some(IoCommand::Visit(f)) => {
                        f(SocketView::Tcp(wr.as_ref()));
                    }
                }
            }
            event = read_rx.recv(), if read_task.is_some() => {
                match event {
                    Some(ReadEvent::Frame(bytes)) => {
                        let keep_going = match &mut handler {
                            Some(h) => h(&bytes, common.remote_endpoint),
                            None => true,
                        };
                        if !keep_going {
                            teardown_error = Some(NetError::HandlerTerminated);
                            break;
                        }
                    }
                    Some(ReadEvent::Eof) | None => {
                        log::debug!("EOF from {}", common.remote_endpoint);
                        break;
                    }
                    Some(ReadEvent::Err(e)) => {
                        log::warn!("Read error from {}: {}", common.remote_endpoint, e);
                        teardown_error = Some(NetError::Io(e));
                        break;
                    }
                }
            }
        }
    }

    log::debug!("Handler for {} tearing down", common.remote_endpoint);
    if let Some(handle) = read_task.take() {
        handle.abort();
    }
    let _ = wr.shutdown().await;
    common.stop();
    engine.unregister_io(self_index);
    common.notify_teardown(self_index, teardown_error);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::length_prefixed_u16;
    use crate::wait_queue::WaitQueue;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn delivers_length_prefixed_messages_and_echoes_them() {
        let engine = Engine::with_handle(tokio::runtime::Handle::current());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client_task = tokio::spawn(async move {
            let mut client = TcpStream::connect(addr).await.unwrap();
            let mut wire = Vec::new();
            wire.extend_from_slice(&3u16.to_be_bytes());
            wire.extend_from_slice(b"hey");
            client.write_all(&wire).await.unwrap();

            let mut reply_len = [0u8; 2];
            client.read_exact(&mut reply_len).await.unwrap();
            let body_len = u16::from_be_bytes(reply_len) as usize;
            let mut body = vec![0u8; body_len];
            client.read_exact(&mut body).await.unwrap();
            body
        });

        let (stream, peer) = listener.accept().await.unwrap();
        let (notifier, mut teardown_rx) = WaitQueue::channel();
        let io = spawn(engine, stream, peer, notifier);

        let received: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let received_clone = Arc::clone(&received);
        let output = io.make_io_output().unwrap();
        io.start_io(
            length_prefixed_u16(),
            Box::new(move |frame, _from| {
                // `frame` is the full header+body wire buffer (spec's
                // length-prefixed mode delivers the concatenation); strip
                // the 2-byte header off before echoing the body back.
                let body = &frame[2..];
                received_clone.lock().unwrap().extend_from_slice(body);
                let mut wire = Vec::new();
                wire.extend_from_slice(&(body.len() as u16).to_be_bytes());
                wire.extend_from_slice(body);
                let _ = output.send(wire);
                true
            }),
        )
        .await
        .unwrap();

        let echoed = client_task.await.unwrap();
        assert_eq!(echoed, b"hey");
        assert_eq!(received.lock().unwrap().as_slice(), b"hey");

        io.stop_io().unwrap();
        let notice = teardown_rx.recv().await.unwrap();
        assert!(notice.error.is_none());
    }

    #[tokio::test]
    async fn read_frame_assembles_a_length_prefixed_message_deterministically() {
        // A mock stream drives `read_frame` directly, without a real socket or
        // sleeps, so the header/body accumulation logic is pinned down exactly.
        let mut mock = tokio_test::io::Builder::new()
            .read(&[0x00, 0x03])
            .read(b"hey")
            .build();
        let framing = length_prefixed_u16();

        let frame = read_frame(&mut mock, &framing).await.unwrap().unwrap();
        assert_eq!(&frame[..], &[0x00, 0x03, b'h', b'e', b'y']);
    }

    #[tokio::test]
    async fn read_frame_reports_a_clean_eof() {
        let mut mock = tokio_test::io::Builder::new().build();
        let framing = Framing::FixedSize(4);

        let frame = read_frame(&mut mock, &framing).await.unwrap();
        assert!(frame.is_none());
    }

    #[tokio::test]
    async fn starting_twice_fails() {
        let engine = Engine::with_handle(tokio::runtime::Handle::current());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = TcpStream::connect(addr).await.unwrap();
        });
        let (stream, peer) = listener.accept().await.unwrap();
        let (notifier, _rx) = WaitQueue::channel();
        let io = spawn(engine, stream, peer, notifier);

        io.start_io(Framing::SendOnly, Box::new(|_, _| true)).await.unwrap();
        let err = io.start_io(Framing::SendOnly, Box::new(|_, _| true)).await.unwrap_err();
        assert_eq!(err, crate::error::StartIoError::AlreadyStarted);
    }

    #[tokio::test]
    async fn eof_tears_the_handler_down_without_an_error() {
        let engine = Engine::with_handle(tokio::runtime::Handle::current());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let client = TcpStream::connect(addr).await.unwrap();
            drop(client);
        });
        let (stream, peer) = listener.accept().await.unwrap();
        let (notifier, mut teardown_rx) = WaitQueue::channel();
        let io = spawn(engine, stream, peer, notifier);
        io.start_io(Framing::FixedSize(4), Box::new(|_, _| true)).await.unwrap();

        let notice = teardown_rx.recv().await.unwrap();
        assert!(notice.error.is_none());
        assert!(!io.is_valid());
    }
}
