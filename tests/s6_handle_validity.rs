//! Once a handler is torn down, its handles keep reporting `is_valid() ==
//! false` and every other operation expires, rather than panicking or
//! silently acting on a handler that no longer exists.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use netcore::{AcceptorConfig, ConnectorConfig, Engine, Framing, IoInterface, StartIoError};

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
async fn a_stopped_acceptor_expires_its_io_handle() {
    init_logging();
    let engine = Engine::with_handle(tokio::runtime::Handle::current());
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let (accepted_cb, accepted_slot) = capture_first_started();
    let acceptor = engine.make_tcp_acceptor(AcceptorConfig::new(addr).with_reuse_addr(true));
    acceptor.start(accepted_cb, Arc::new(|_, _| {})).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let connector = engine.make_tcp_connector(ConnectorConfig::new(addr));
    connector.start(Arc::new(|_, _, _| {}), Arc::new(|_, _| {})).unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let accepted_io = accepted_slot.lock().unwrap().clone().expect("acceptor should have accepted a connection");
    assert!(accepted_io.is_valid());

    // Tearing down the acceptor tears down every child it accepted.
    acceptor.stop().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!accepted_io.is_valid());
    assert!(matches!(
        accepted_io.start_io(Framing::FixedSize(1), Box::new(|_, _| true)).await,
        Err(StartIoError::Expired)
    ));
    assert!(accepted_io.make_io_output().is_err());
    assert!(accepted_io.stop_io().is_err());

    // Equality and is_valid remain safe to call on an expired handle.
    let other = accepted_io.clone();
    assert_eq!(accepted_io, other);
}

#[tokio::test]
async fn an_invalid_handle_sorts_before_and_equals_another_invalid_handle() {
    init_logging();
    let engine = Engine::with_handle(tokio::runtime::Handle::current());
    let acceptor_a = engine.make_tcp_acceptor(AcceptorConfig::new("127.0.0.1:0".parse().unwrap()));
    let acceptor_b = engine.make_tcp_acceptor(AcceptorConfig::new("127.0.0.1:0".parse().unwrap()));
    acceptor_a.start(Arc::new(|_, _, _| {}), Arc::new(|_, _| {})).unwrap();
    acceptor_b.start(Arc::new(|_, _, _| {}), Arc::new(|_, _| {})).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    acceptor_a.stop().unwrap();
    acceptor_b.stop().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(!acceptor_a.is_valid());
    assert!(!acceptor_b.is_valid());
    assert_eq!(acceptor_a, acceptor_b);
    assert!(acceptor_a <= acceptor_b);
}
