//! Acceptor + connector exchanging LF-delimited lines, with the acceptor
//! echoing each line back until an empty line asks both sides to close.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use netcore::{AcceptorConfig, ConnectorConfig, Engine, Framing, IoInterface};

fn init_logging() {
    let _ = env_logger::try_init();
}

fn capture_first_started() -> (netcore::StateChangeCallback, Arc<Mutex<Option<IoInterface>>>) {
    let slot: Arc<Mutex<Option<IoInterface>>> = Arc::new(Mutex::new(None));
    let slot_clone = Arc::clone(&slot);
    let cb: netcore::StateChangeCallback = Arc::new(move |io, _count, starting| {
        if starting {
            let mut guard = slot_clone.lock().unwrap();
            if guard.is_none() {
                *guard = Some(io);
            }
        }
    });
    (cb, slot)
}

#[tokio::test]
async fn echoes_lines_and_closes_on_empty_line() {
    init_logging();
    let engine = Engine::with_handle(tokio::runtime::Handle::current());
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let stops: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
    let stops_clone = Arc::clone(&stops);
    let accepted_slot: Arc<Mutex<Option<IoInterface>>> = Arc::new(Mutex::new(None));
    let accepted_slot_clone = Arc::clone(&accepted_slot);
    let acceptor_state_change: netcore::StateChangeCallback = Arc::new(move |io, _count, starting| {
        if starting {
            *accepted_slot_clone.lock().unwrap() = Some(io);
        } else {
            stops_clone.fetch_add(1, Ordering::SeqCst);
        }
    });

    let acceptor = engine.make_tcp_acceptor(AcceptorConfig::new(addr).with_reuse_addr(true));
    acceptor.start(acceptor_state_change, Arc::new(|_, _| {})).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let connector = engine.make_tcp_connector(ConnectorConfig::new(addr));
    let (connector_cb, connector_io_slot) = capture_first_started();
    connector.start(connector_cb, Arc::new(|_, _| {})).unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let connector_io = connector_io_slot.lock().unwrap().clone().expect("connector should be connected");
    let accepted_io = accepted_slot.lock().unwrap().clone().expect("acceptor should have accepted");

    let received_lines: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let received_clone = Arc::clone(&received_lines);
    connector_io
        .start_io(
            Framing::Delimiter(vec![b'\n']),
            Box::new(move |line, _from| {
                received_clone.lock().unwrap().push(line.to_vec());
                true
            }),
        )
        .await
        .unwrap();

    let accepted_output = accepted_io.make_io_output().unwrap();
    accepted_io
        .start_io(
            Framing::Delimiter(vec![b'\n']),
            Box::new(move |line, _from| {
                if line == b"\n" {
                    return false;
                }
                let _ = accepted_output.send(line.to_vec());
                true
            }),
        )
        .await
        .unwrap();

    let connector_output = connector_io.make_io_output().unwrap();
    connector_output.send(Vec::from(&b"hello\n"[..])).unwrap();
    connector_output.send(Vec::from(&b"world\n"[..])).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        received_lines.lock().unwrap().as_slice(),
        &[b"hello\n".to_vec(), b"world\n".to_vec()]
    );

    connector_output.send(Vec::from(&b"\n"[..])).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(stops.load(Ordering::SeqCst), 1);
}
