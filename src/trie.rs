//! Subscription trie: prefix-keyed dispatch with optional change
//! suppression. Grounded on
//! `examples/original_source/pkg/racket/subscription/subscription.go`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::message::Message;

pub type Callback = Arc<dyn Fn(&Message) + Send + Sync>;

/// Registration options applied when a subscription is added.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscribeOptions {
    /// Suppress callback invocations when the message's content hash for a
    /// given subject is unchanged since the last delivery to this
    /// subscription.
    pub only_on_change: bool,
}

struct Subscription {
    id: u64,
    cb: Callback,
    only_on_change: bool,
    last_hash: Mutex<HashMap<String, [u8; 32]>>,
}

impl Subscription {
    /// Returns `true` if the callback should (and was) invoked.
    fn dispatch(&self, msg: &Message) -> bool {
        if self.only_on_change {
            let subject = msg.subject.canonical();
            let hash = msg.content_hash();
            let mut last = self.last_hash.lock();
            if last.get(&subject) == Some(&hash) {
                return false;
            }
            last.insert(subject, hash);
        }

        (self.cb)(msg);
        true
    }
}

#[derive(Default)]
struct Node {
    subscriptions: Vec<Arc<Subscription>>,
    children: HashMap<String, Node>,
}

impl Node {
    /// Remove `id` from this subtree; prunes any child left with neither
    /// subscriptions nor children of its own.
    fn remove(&mut self, id: u64) {
        self.subscriptions.retain(|s| s.id != id);

        let mut to_prune = Vec::new();
        for (key, child) in self.children.iter_mut() {
            child.remove(id);
            if child.subscriptions.is_empty() && child.children.is_empty() {
                to_prune.push(key.clone());
            }
        }
        for key in to_prune {
            self.children.remove(&key);
        }
    }
}

/// A non-owning reference to a subscription, used only to unsubscribe.
#[derive(Clone, Copy)]
pub struct SubscriptionHandle(u64);

/// Prefix-keyed dispatch tree. A single mutex guards every mutation and
/// every dispatch walk.
pub struct Trie {
    root: Mutex<Node>,
    next_id: AtomicU64,
}

impl Default for Trie {
    fn default() -> Self {
        Self::new()
    }
}

impl Trie {
    pub fn new() -> Self {
        Self {
            root: Mutex::new(Node::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Insert a subscription at the node reached by walking `parts`. A
    /// trailing wildcard part stops descent one level above, attaching the
    /// subscription to the parent so it matches any continuation.
    pub fn add(
        &self,
        parts: &[String],
        cb: impl Fn(&Message) + Send + Sync + 'static,
        opts: SubscribeOptions,
    ) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let sub = Arc::new(Subscription {
            id,
            cb: Arc::new(cb),
            only_on_change: opts.only_on_change,
            last_hash: Mutex::new(HashMap::new()),
        });

        let mut root = self.root.lock();
        let mut node = &mut *root;
        for part in parts {
            if part == crate::subject::WILDCARD {
                break;
            }
            node = node.children.entry(part.clone()).or_default();
        }
        node.subscriptions.push(sub);

        SubscriptionHandle(id)
    }

    pub fn remove(&self, handle: SubscriptionHandle) {
        self.root.lock().remove(handle.0);
    }

    /// Walk the subject parts of `msg`, invoking every subscription
    /// attached at every visited node (prefix match including the exact
    /// match at full depth). Returns the number of callbacks actually
    /// invoked (change-suppressed callbacks don't count).
    pub fn dispatch(&self, msg: &Message) -> u64 {
        // Snapshot the path of nodes to visit under the lock, then invoke
        // callbacks after releasing it so a callback may safely re-enter
        // (subscribe/unsubscribe) without deadlocking.
        let snapshot: Vec<Arc<Subscription>> = {
            let root = self.root.lock();
            let mut node = &*root;
            let mut matched = Vec::new();
            matched.extend(node.subscriptions.iter().cloned());

            for part in msg.subject.parts() {
                match node.children.get(part) {
                    Some(child) => {
                        node = child;
                        matched.extend(node.subscriptions.iter().cloned());
                    }
                    None => break,
                }
            }
            matched
        };

        snapshot.iter().filter(|sub| sub.dispatch(msg)).count() as u64
    }

    /// Subscription + node counts, for the "simple counters" surface.
    pub fn stats(&self) -> TrieStats {
        let root = self.root.lock();
        let mut stats = TrieStats::default();
        count(&root, &mut stats);
        stats
    }

    /// Invariant check used by tests: every reachable node has either a
    /// non-empty subscription list or at least one child.
    #[cfg(test)]
    fn check_pruned_invariant(&self) -> bool {
        let root = self.root.lock();
        fn walk(node: &Node, is_root: bool) -> bool {
            if !is_root && node.subscriptions.is_empty() && node.children.is_empty() {
                return false;
            }
            node.children.values().all(|c| walk(c, false))
        }
        walk(&root, true)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TrieStats {
    pub nodes: u64,
    pub subscriptions: u64,
}

fn count(node: &Node, stats: &mut TrieStats) {
    stats.nodes += 1;
    stats.subscriptions += node.subscriptions.len() as u64;
    for child in node.children.values() {
        count(child, stats);
    }
}
