//! A connector started against a port with nobody listening keeps retrying
//! on a fixed interval, surfacing an error per failed attempt, until an
//! acceptor finally binds the port and the connection succeeds.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use netcore::{AcceptorConfig, ConnectorConfig, Engine, IoInterface, ReconnectPolicy};

fn init_logging() {
    let _ = env_logger::try_init();
}

#[tokio::test]
async fn retries_until_the_acceptor_binds_then_connects() {
    init_logging();
    let engine = Engine::with_handle(tokio::runtime::Handle::current());

    // Reserve a port, then immediately free it so nothing is listening yet.
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let errors: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
    let errors_clone = Arc::clone(&errors);
    let connected_slot: Arc<Mutex<Option<IoInterface>>> = Arc::new(Mutex::new(None));
    let connected_slot_clone = Arc::clone(&connected_slot);

    let config = ConnectorConfig::new(addr).with_reconnect(ReconnectPolicy::FixedInterval(Duration::from_millis(50)));
    let connector = engine.make_tcp_connector(config);
    connector
        .start(
            Arc::new(move |io, _count, starting| {
                if starting {
                    *connected_slot_clone.lock().unwrap() = Some(io);
                }
            }),
            Arc::new(move |_source, _err| {
                errors_clone.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

    // Let several reconnect attempts fail before anyone is listening.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(
        errors.load(Ordering::SeqCst) >= 3,
        "expected multiple failed connect attempts, saw {}",
        errors.load(Ordering::SeqCst)
    );
    assert!(connected_slot.lock().unwrap().is_none());

    let acceptor = engine.make_tcp_acceptor(AcceptorConfig::new(addr).with_reuse_addr(true));
    acceptor.start(Arc::new(|_, _, _| {}), Arc::new(|_, _| {})).unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(connected_slot.lock().unwrap().is_some(), "connector should have connected once the acceptor bound");
}
