//! Ten connectors each send 50 variable-length messages to one acceptor;
//! every accepted child handler echoes, and the acceptor's aggregate
//! handler call count matches the total sent across all connectors.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use netcore::{length_prefixed_u16, AcceptorConfig, ConnectorConfig, Engine, IoInterface};

fn init_logging() {
    let _ = env_logger::try_init();
}

const CONNECTORS: usize = 10;
const MESSAGES_PER_CONNECTOR: usize = 50;

fn body_for(n: usize) -> Vec<u8> {
    let mut body = b"Heehaw!".to_vec();
    body.extend(std::iter::repeat(b'Q').take(n));
    body
}

#[tokio::test]
async fn delivers_every_message_to_the_acceptor_and_echoes_back() {
    init_logging();
    let engine = Engine::with_handle(tokio::runtime::Handle::current());
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let total_received = Arc::new(AtomicUsize::new(0));
    let total_received_clone = Arc::clone(&total_received);
    let acceptor_state_change: netcore::StateChangeCallback = Arc::new(move |io, _count, starting| {
        if !starting {
            return;
        }
        let counter = Arc::clone(&total_received_clone);
        // Install the echo handler on every newly accepted connection.
        tokio::spawn(async move {
            let output = io.make_io_output().unwrap();
            let _ = io
                .start_io(
                    length_prefixed_u16(),
                    Box::new(move |frame, _from| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        let body = &frame[2..];
                        let mut wire = Vec::new();
                        wire.extend_from_slice(&(body.len() as u16).to_be_bytes());
                        wire.extend_from_slice(body);
                        let _ = output.send(wire);
                        true
                    }),
                )
                .await;
        });
    });

    let acceptor = engine.make_tcp_acceptor(AcceptorConfig::new(addr).with_reuse_addr(true));
    acceptor.start(acceptor_state_change, Arc::new(|_, _| {})).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut connector_tasks = Vec::new();
    for _ in 0..CONNECTORS {
        let engine = engine.clone();
        connector_tasks.push(tokio::spawn(async move {
            let connector = engine.make_tcp_connector(ConnectorConfig::new(addr));
            let io_slot: Arc<Mutex<Option<IoInterface>>> = Arc::new(Mutex::new(None));
            let io_slot_clone = Arc::clone(&io_slot);
            let cb: netcore::StateChangeCallback = Arc::new(move |io, _count, starting| {
                if starting {
                    *io_slot_clone.lock().unwrap() = Some(io);
                }
            });
            connector.start(cb, Arc::new(|_, _| {})).unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;

            let io = io_slot.lock().unwrap().clone().expect("connector should connect");
            let echoes = Arc::new(AtomicUsize::new(0));
            let echoes_clone = Arc::clone(&echoes);
            io.start_io(
                length_prefixed_u16(),
                Box::new(move |_frame, _from| {
                    echoes_clone.fetch_add(1, Ordering::SeqCst);
                    true
                }),
            )
            .await
            .unwrap();

            let output = io.make_io_output().unwrap();
            for n in 1..=MESSAGES_PER_CONNECTOR {
                let body = body_for(n);
                let mut wire = Vec::new();
                wire.extend_from_slice(&(body.len() as u16).to_be_bytes());
                wire.extend_from_slice(&body);
                output.send(wire).unwrap();
            }

            tokio::time::sleep(Duration::from_millis(300)).await;
            echoes.load(Ordering::SeqCst)
        }));
    }

    let mut total_echoes = 0;
    for task in connector_tasks {
        total_echoes += task.await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(total_received.load(Ordering::SeqCst), CONNECTORS * MESSAGES_PER_CONNECTOR);
    assert_eq!(total_echoes, CONNECTORS * MESSAGES_PER_CONNECTOR);
}
