//! Per-stream outbound ticker engine. Grounded on
//! `examples/original_source/pkg/racket/sender/sender.go`; ticker
//! cancellation follows the stop-channel idiom in
//! `TING-HiuYu-Remote-Mic/src/server.rs`'s `input_stop_tx`.

use std::collections::HashMap;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Sender as CancelSender};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::dispatcher::socket::open_sender;
use crate::error::Result;
use crate::iface::InterfaceAddr;
use crate::message::Message;
use crate::monitor::AddressMonitor;
use crate::pool::MulticastPool;

struct QueuedMessage {
    cancel: CancelSender<()>,
}

struct SenderStream {
    /// One open socket per bound interface address, re-created on reopen.
    sockets: Mutex<Vec<UdpSocket>>,
    /// Serializes sends against socket-list reopen (spec §4.5/§9).
    send_lock: Mutex<()>,
    messages: Mutex<HashMap<String, QueuedMessage>>,
    messages_sent: AtomicU64,
}

impl SenderStream {
    fn open(ifaces: &[InterfaceAddr]) -> Result<Self> {
        Ok(Self {
            sockets: Mutex::new(open_sockets(ifaces)?),
            send_lock: Mutex::new(()),
            messages: Mutex::new(HashMap::new()),
            messages_sent: AtomicU64::new(0),
        })
    }

    fn reopen(&self, ifaces: &[InterfaceAddr]) -> Result<()> {
        let _send_guard = self.send_lock.lock();
        let new_sockets = open_sockets(ifaces)?;
        *self.sockets.lock() = new_sockets;
        Ok(())
    }

    fn send_once(&self, msg: &Message, addr: std::net::SocketAddrV4) {
        let _send_guard = self.send_lock.lock();
        let sockets = self.sockets.lock();
        for socket in sockets.iter() {
            if let Err(e) = msg.send(socket, addr) {
                tracing::warn!(error = %e, "send failed, will retry next tick");
                return;
            }
        }
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    fn flush(&self) {
        let mut messages = self.messages.lock();
        for (_, qm) in messages.drain() {
            let _ = qm.cancel.send(());
        }
        self.sockets.lock().clear();
    }
}

fn open_sockets(ifaces: &[InterfaceAddr]) -> Result<Vec<UdpSocket>> {
    ifaces.iter().map(|i| open_sender(i.addr)).collect()
}

/// Per-stream messages-sent counter, for the observable-counters surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct SenderStreamStats {
    pub messages_sent: u64,
    pub queued_messages: usize,
}

/// Keeps every currently-announced (stream, subject) pair being
/// retransmitted at its publisher-chosen interval until replaced or
/// flushed.
pub struct SenderEngine {
    ifaces: Mutex<Vec<InterfaceAddr>>,
    pool: MulticastPool,
    streams: DashMap<String, Arc<SenderStream>>,
}

impl SenderEngine {
    pub fn new(ifaces: Vec<InterfaceAddr>, pool: MulticastPool) -> Self {
        Self {
            ifaces: Mutex::new(ifaces),
            pool,
            streams: DashMap::new(),
        }
    }

    /// Validate and (re)install `msg` as the queued message for its
    /// (stream, subject), cancelling any previous ticker for the same key
    /// and starting a fresh one.
    pub fn publish(&self, msg: Message) -> Result<()> {
        msg.validate()?;

        let stream_name = msg.stream.clone();
        let stream = match self.streams.get(&stream_name) {
            Some(s) => s.clone(),
            None => {
                let ifaces = self.ifaces.lock().clone();
                let created = Arc::new(SenderStream::open(&ifaces)?);
                self.streams.insert(stream_name.clone(), created.clone());
                created
            }
        };

        let subject_key = msg.subject.canonical();
        let (cancel_tx, cancel_rx) = bounded::<()>(0);

        {
            let mut messages = stream.messages.lock();
            if let Some(previous) = messages.remove(&subject_key) {
                let _ = previous.cancel.send(());
            }
            messages.insert(subject_key, QueuedMessage { cancel: cancel_tx });
        }

        let msg = Arc::new(msg);
        let addr = self.pool.address_for_stream(&msg.stream);
        let stream_for_thread = stream.clone();

        thread::spawn(move || {
            stream_for_thread.send_once(&msg, addr);

            loop {
                match cancel_rx.recv_timeout(msg.interval) {
                    Ok(()) => return,
                    Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return,
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                        stream_for_thread.send_once(&msg, addr);
                    }
                }
            }
        });

        Ok(())
    }

    /// Cancel every ticker, close every socket, and reset to empty. The
    /// sender may be reused afterward.
    pub fn flush(&self) {
        for entry in self.streams.iter() {
            entry.value().flush();
        }
        self.streams.clear();
    }

    /// Reopen every stream's sockets against `new_ifaces`, serialized
    /// against in-flight sends per spec §9's reopen race rule.
    pub fn reopen_interfaces(&self, new_ifaces: Vec<InterfaceAddr>) {
        *self.ifaces.lock() = new_ifaces.clone();
        for entry in self.streams.iter() {
            if let Err(e) = entry.value().reopen(&new_ifaces) {
                tracing::error!(stream = entry.key(), error = %e, "failed to reopen sender sockets");
            }
        }
    }

    pub fn stats(&self, stream: &str) -> Option<SenderStreamStats> {
        self.streams.get(stream).map(|s| SenderStreamStats {
            messages_sent: s.messages_sent.load(Ordering::Relaxed),
            queued_messages: s.messages.lock().len(),
        })
    }

    /// The interface set currently in use, for tests and introspection.
    pub fn interface_count(&self) -> usize {
        self.ifaces.lock().len()
    }

    /// Subscribe to `monitor` and reopen every stream's sockets whenever it
    /// reports a changed interface set (spec §4.5's "Interface change
    /// handling"). Spawns one background thread that lives as long as
    /// `self` does; the monitor's sender side is dropped (ending the watch)
    /// only when the monitor itself is.
    pub fn watch_address_monitor(self: &Arc<Self>, monitor: Arc<dyn AddressMonitor>) {
        let engine = self.clone();
        let updates = monitor.subscribe();

        thread::spawn(move || {
            while let Ok(new_ifaces) = updates.recv() {
                tracing::debug!(
                    count = new_ifaces.len(),
                    "interface address set changed, reopening sender sockets"
                );
                engine.reopen_interfaces(new_ifaces);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subject::Subject;
    use crossbeam_channel::Receiver;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn test_pool() -> MulticastPool {
        MulticastPool::default_scoped()
    }

    /// A monitor whose single subscriber channel is handed to the test, so
    /// it can push interface-set updates on demand instead of waiting on a
    /// real polling interval.
    struct FixedMonitor {
        rx: Mutex<Option<Receiver<Vec<InterfaceAddr>>>>,
    }

    impl AddressMonitor for FixedMonitor {
        fn subscribe(&self) -> Receiver<Vec<InterfaceAddr>> {
            self.rx.lock().take().expect("subscribe called more than once in this test")
        }
    }

    #[test]
    fn publish_validates_before_queuing() {
        let sender = SenderEngine::new(vec![], test_pool());
        let msg = Message::new("", Subject::parse("a").unwrap(), vec![], Duration::from_millis(50));
        assert!(sender.publish(msg).is_err());
    }

    #[test]
    fn publish_with_no_interfaces_still_queues_and_flush_is_quiescent() {
        let sender = SenderEngine::new(vec![], test_pool());
        let msg = Message::new("s", Subject::parse("a.b").unwrap(), b"hi".to_vec(), Duration::from_millis(20));
        sender.publish(msg).unwrap();

        std::thread::sleep(Duration::from_millis(60));
        let stats = sender.stats("s").unwrap();
        assert_eq!(stats.queued_messages, 1);

        sender.flush();
        assert!(sender.stats("s").is_none());
    }

    #[test]
    fn second_publish_on_same_subject_replaces_the_first() {
        let sender = SenderEngine::new(vec![], test_pool());
        let subject = Subject::parse("a.b").unwrap();

        sender.publish(Message::new("s", subject.clone(), b"v1".to_vec(), Duration::from_millis(20))).unwrap();
        sender.publish(Message::new("s", subject, b"v2".to_vec(), Duration::from_millis(20))).unwrap();

        let stats = sender.stats("s").unwrap();
        assert_eq!(stats.queued_messages, 1);
    }

    #[test]
    fn address_monitor_updates_trigger_reopen() {
        let sender = Arc::new(SenderEngine::new(vec![], test_pool()));
        assert_eq!(sender.interface_count(), 0);

        let (tx, rx) = crossbeam_channel::unbounded();
        let monitor: Arc<dyn AddressMonitor> = Arc::new(FixedMonitor { rx: Mutex::new(Some(rx)) });
        sender.watch_address_monitor(monitor);

        tx.send(vec![InterfaceAddr { name: "lo".into(), addr: Ipv4Addr::LOCALHOST }]).unwrap();

        let mut waited = Duration::ZERO;
        while sender.interface_count() == 0 && waited < Duration::from_secs(2) {
            std::thread::sleep(Duration::from_millis(10));
            waited += Duration::from_millis(10);
        }

        assert_eq!(sender.interface_count(), 1);
    }
}
