//! End-to-end publish/subscribe over a real multicast-capable loopback.
//! Ignored by default since it depends on the host's network stack
//! actually supporting IPv4 multicast join on `127.0.0.1`, which sandboxed
//! CI runners frequently do not.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use multicast_bus::dispatcher::Dispatcher;
use multicast_bus::iface::InterfaceAddr;
use multicast_bus::message::Message;
use multicast_bus::pool::MulticastPool;
use multicast_bus::receiver::ReceiverEngine;
use multicast_bus::sender::SenderEngine;
use multicast_bus::subject::Subject;
use multicast_bus::trie::SubscribeOptions;

fn loopback_iface() -> InterfaceAddr {
    InterfaceAddr {
        name: "lo".to_string(),
        addr: Ipv4Addr::LOCALHOST,
    }
}

fn init_test_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

#[test]
#[ignore = "requires a host that allows IPv4 multicast join on 127.0.0.1"]
fn publish_reaches_a_wildcard_prefix_subscription() {
    init_test_logging();
    let ifaces = vec![loopback_iface()];
    let pool = MulticastPool::new(Ipv4Addr::new(239, 7, 0, 0), 16, 19595);

    let dispatcher = Arc::new(Dispatcher::new(ifaces.clone()));
    let sender = SenderEngine::new(ifaces, pool);
    let receiver = ReceiverEngine::new(dispatcher, pool);

    let received: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let received_cb = received.clone();

    let _sub = receiver
        .subscribe(
            "s",
            Subject::parse("a.b.*").unwrap(),
            move |msg: &Message| {
                received_cb.lock().unwrap().push(msg.data.clone());
            },
            SubscribeOptions::default(),
        )
        .unwrap();

    let msg = Message::new(
        "s",
        Subject::parse("a.b.c").unwrap(),
        b"hello".to_vec(),
        Duration::from_millis(40),
    );
    sender.publish(msg).unwrap();

    std::thread::sleep(Duration::from_millis(250));
    sender.flush();
    receiver.close();

    let got = received.lock().unwrap();
    assert!(got.len() >= 2, "expected at least 2 deliveries, got {}", got.len());
    assert!(got.iter().all(|d| d == b"hello"));
}

#[test]
#[ignore = "requires a host that allows IPv4 multicast join on 127.0.0.1"]
fn change_suppression_skips_identical_repeats_over_the_wire() {
    init_test_logging();
    let ifaces = vec![loopback_iface()];
    let pool = MulticastPool::new(Ipv4Addr::new(239, 7, 1, 0), 16, 19596);

    let dispatcher = Arc::new(Dispatcher::new(ifaces.clone()));
    let sender = SenderEngine::new(ifaces, pool);
    let receiver = ReceiverEngine::new(dispatcher, pool);

    let count = Arc::new(AtomicUsize::new(0));
    let count_cb = count.clone();

    let _sub = receiver
        .subscribe(
            "s",
            Subject::parse("a").unwrap(),
            move |_msg: &Message| {
                count_cb.fetch_add(1, Ordering::SeqCst);
            },
            SubscribeOptions { only_on_change: true },
        )
        .unwrap();

    for data in [b"v1".to_vec(), b"v1".to_vec(), b"v2".to_vec(), b"v1".to_vec()] {
        let msg = Message::new("s", Subject::parse("a").unwrap(), data, Duration::from_secs(10));
        sender.publish(msg).unwrap();
        std::thread::sleep(Duration::from_millis(80));
    }

    sender.flush();
    receiver.close();

    assert_eq!(count.load(Ordering::SeqCst), 3);
}
