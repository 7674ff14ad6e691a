//! Per-stream inbound wiring: one dispatcher consumer and one subject
//! trie per subscribed-to stream. Grounded on
//! `examples/original_source/pkg/racket/receiver/receiver.go`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::dispatcher::{ConsumerHandle, Dispatcher};
use crate::error::Result;
use crate::message::Message;
use crate::pool::MulticastPool;
use crate::subject::Subject;
use crate::trie::{SubscribeOptions, SubscriptionHandle, Trie, TrieStats};

struct ReceiverStream {
    consumer: ConsumerHandle,
    trie: Trie,
    messages_received: AtomicU64,
    messages_dispatched: AtomicU64,
}

/// A handle returned from [`ReceiverEngine::subscribe`], used only to
/// unsubscribe.
pub struct Subscription {
    stream: String,
    handle: SubscriptionHandle,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReceiverStreamStats {
    pub messages_received: u64,
    pub messages_dispatched: u64,
    pub trie: TrieStats,
}

/// For each stream a caller subscribes to, maintains one dispatcher
/// consumer on that stream's multicast address and a subject trie;
/// dispatches every parsed message down the trie to matching
/// subscriptions.
pub struct ReceiverEngine {
    pool: MulticastPool,
    dispatcher: Arc<Dispatcher>,
    streams: Arc<DashMap<String, Arc<ReceiverStream>>>,
    // Serializes stream creation so two concurrent `subscribe` calls for a
    // brand-new stream don't both register a dispatcher consumer.
    create_lock: Mutex<()>,
}

impl ReceiverEngine {
    pub fn new(dispatcher: Arc<Dispatcher>, pool: MulticastPool) -> Self {
        Self {
            pool,
            dispatcher,
            streams: Arc::new(DashMap::new()),
            create_lock: Mutex::new(()),
        }
    }

    pub fn subscribe(
        &self,
        stream: &str,
        subject: Subject,
        cb: impl Fn(&Message) + Send + Sync + 'static,
        opts: SubscribeOptions,
    ) -> Result<Subscription> {
        let rs = match self.streams.get(stream) {
            Some(rs) => rs.clone(),
            None => {
                let _guard = self.create_lock.lock();
                if let Some(rs) = self.streams.get(stream) {
                    rs.clone()
                } else {
                    let addr = self.pool.address_for_stream(stream);
                    let consumer = register_consumer(&self.dispatcher, &self.streams, stream, addr)?;
                    let receiver_stream = Arc::new(ReceiverStream {
                        consumer,
                        trie: Trie::new(),
                        messages_received: AtomicU64::new(0),
                        messages_dispatched: AtomicU64::new(0),
                    });
                    self.streams.insert(stream.to_owned(), receiver_stream.clone());
                    receiver_stream
                }
            }
        };

        let handle = rs.trie.add(subject.parts(), cb, opts);

        Ok(Subscription {
            stream: stream.to_owned(),
            handle,
        })
    }

    pub fn unsubscribe(&self, sub: Subscription) {
        if let Some(rs) = self.streams.get(&sub.stream) {
            rs.trie.remove(sub.handle);
        }
    }

    pub fn close(&self) {
        for entry in self.streams.iter() {
            self.dispatcher.remove_consumer(&entry.value().consumer);
        }
        self.streams.clear();
        self.dispatcher.close();
    }

    pub fn stats(&self, stream: &str) -> Option<ReceiverStreamStats> {
        self.streams.get(stream).map(|rs| ReceiverStreamStats {
            messages_received: rs.messages_received.load(Ordering::Relaxed),
            messages_dispatched: rs.messages_dispatched.load(Ordering::Relaxed),
            trie: rs.trie.stats(),
        })
    }
}

/// Register the dispatcher's raw-receive callback for a brand-new stream:
/// parse the frame and walk the trie. Looks the stream back up by name on
/// every delivery rather than capturing the (not-yet-constructed)
/// `ReceiverStream`, since the consumer handle it returns is needed to
/// build that very struct.
fn register_consumer(
    dispatcher: &Arc<Dispatcher>,
    streams: &Arc<DashMap<String, Arc<ReceiverStream>>>,
    stream: &str,
    addr: std::net::SocketAddrV4,
) -> Result<ConsumerHandle> {
    let streams = streams.clone();
    let stream_key = stream.to_owned();

    dispatcher.add_consumer(addr, move |payload: &[u8]| {
        let Some(rs) = streams.get(&stream_key) else { return };

        match Message::parse(payload) {
            Ok(msg) => {
                rs.messages_received.fetch_add(1, Ordering::Relaxed);
                let dispatched = rs.trie.dispatch(&msg);
                rs.messages_dispatched.fetch_add(dispatched, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable packet");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn subscribe_creates_exactly_one_stream_entry() {
        let dispatcher = Arc::new(Dispatcher::new(vec![]));
        let pool = MulticastPool::default_scoped();
        let receiver = ReceiverEngine::new(dispatcher, pool);

        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub1 = receiver
            .subscribe("s", Subject::parse("a.b").unwrap(), move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }, SubscribeOptions::default())
            .unwrap();

        let sub2 = receiver
            .subscribe("s", Subject::parse("a.c").unwrap(), |_| {}, SubscribeOptions::default())
            .unwrap();

        assert_eq!(receiver.streams.len(), 1);
        receiver.unsubscribe(sub1);
        receiver.unsubscribe(sub2);
        let _ = Duration::ZERO;
    }
}
