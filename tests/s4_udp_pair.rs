//! A sender with no local bind and a bound receiver exchange datagrams;
//! UDP delivery is not guaranteed, so the test only asserts a plausible
//! range and that every received payload matches what was sent.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use netcore::{Engine, Framing, IoInterface, UdpConfig};

fn init_logging() {
    let _ = env_logger::try_init();
}

const MESSAGE_COUNT: usize = 100;

fn capture_first_started() -> (netcore::StateChangeCallback, Arc<Mutex<Option<IoInterface>>>) {
    let slot: Arc<Mutex<Option<IoInterface>>> = Arc::new(Mutex::new(None));
    let slot_clone = Arc::clone(&slot);
    let cb: netcore::StateChangeCallback = Arc::new(move |io, _count, starting| {
        if starting {
            *slot_clone.lock().unwrap() = Some(io);
        }
    });
    (cb, slot)
}

#[tokio::test]
async fn receiver_observes_at_least_one_and_at_most_all_datagrams() {
    init_logging();
    let engine = Engine::with_handle(tokio::runtime::Handle::current());

    let receiver = engine.make_udp_entity(UdpConfig::new("127.0.0.1:0".parse().unwrap()));
    let (receiver_cb, receiver_slot) = capture_first_started();
    receiver.start(receiver_cb, Arc::new(|_, _| {})).unwrap();

    let sender = engine.make_udp_entity(UdpConfig::send_only_to("127.0.0.1:0".parse().unwrap()));
    let (sender_cb, sender_slot) = capture_first_started();
    sender.start(sender_cb, Arc::new(|_, _| {})).unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;

    let receiver_io = receiver_slot.lock().unwrap().clone().expect("receiver should have started");
    let sender_io = sender_slot.lock().unwrap().clone().expect("sender should have started");

    let received_count = Arc::new(AtomicUsize::new(0));
    let mismatches = Arc::new(AtomicUsize::new(0));
    let received_clone = Arc::clone(&received_count);
    let mismatches_clone = Arc::clone(&mismatches);
    receiver_io
        .start_io(
            Framing::FixedSize(5),
            Box::new(move |datagram, _from| {
                received_clone.fetch_add(1, Ordering::SeqCst);
                if datagram != b"hello" {
                    mismatches_clone.fetch_add(1, Ordering::SeqCst);
                }
                true
            }),
        )
        .await
        .unwrap();

    let receiver_addr = receiver_io
        .visit_socket(|view| match view {
            netcore::SocketView::Udp(socket) => socket.local_addr().unwrap(),
            _ => unreachable!(),
        })
        .await
        .unwrap();

    sender_io.start_io(Framing::SendOnly, Box::new(|_, _| true)).await.unwrap();
    let output = sender_io.make_io_output().unwrap();
    for _ in 0..MESSAGE_COUNT {
        output.send_to(bytes::Bytes::from_static(b"hello"), Some(receiver_addr)).unwrap();
    }

    tokio::time::sleep(Duration::from_millis(200)).await;

    let received = received_count.load(Ordering::SeqCst);
    assert!(received >= 1, "expected at least one datagram to arrive on loopback");
    assert!(received <= MESSAGE_COUNT);
    assert_eq!(mismatches.load(Ordering::SeqCst), 0);
}
