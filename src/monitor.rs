//! Address-monitor collaborator contract (spec §4.5/§9) plus a portable
//! polling implementation.
//!
//! The reference watches netlink for link-address changes. This crate has
//! no netlink dependency in the pack, so the default implementation polls
//! [`crate::iface::resolve`] on a background thread and only pushes a new
//! snapshot when the address set actually changes — functionally
//! equivalent from the sender's point of view, which only ever reacts to
//! "here is the current address set", not to the underlying event source.

use std::collections::HashSet;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::iface::{InterfaceAddr, InterfaceSelector};

/// Something that can report the current set of bound IPv4 addresses
/// whenever it changes. The sender engine subscribes to this to drive its
/// socket-reopen path.
pub trait AddressMonitor: Send + Sync {
    fn subscribe(&self) -> Receiver<Vec<InterfaceAddr>>;
}

/// Polls [`crate::iface::resolve`] at a fixed interval on a dedicated
/// thread, forwarding a snapshot to every subscriber only on change.
pub struct PollingAddressMonitor {
    subscribe_tx: Sender<Sender<Vec<InterfaceAddr>>>,
    _handle: thread::JoinHandle<()>,
}

impl PollingAddressMonitor {
    pub fn start(selector: InterfaceSelector, interval: Duration) -> Self {
        let (subscribe_tx, subscribe_rx) = crossbeam_channel::unbounded::<Sender<Vec<InterfaceAddr>>>();

        let handle = thread::spawn(move || {
            let mut subscribers: Vec<Sender<Vec<InterfaceAddr>>> = Vec::new();
            let mut last: Option<HashSet<InterfaceAddr>> = None;

            loop {
                while let Ok(new_sub) = subscribe_rx.try_recv() {
                    if let Some(current) = &last {
                        let _ = new_sub.send(current.iter().cloned().collect());
                    }
                    subscribers.push(new_sub);
                }

                match crate::iface::resolve(&selector) {
                    Ok(addrs) => {
                        let set: HashSet<_> = addrs.iter().cloned().collect();
                        if last.as_ref() != Some(&set) {
                            tracing::debug!(count = addrs.len(), "interface address set changed");
                            subscribers.retain(|tx| tx.send(addrs.clone()).is_ok());
                            last = Some(set);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to enumerate interfaces");
                    }
                }

                thread::sleep(interval);
            }
        });

        Self {
            subscribe_tx,
            _handle: handle,
        }
    }
}

impl AddressMonitor for PollingAddressMonitor {
    fn subscribe(&self) -> Receiver<Vec<InterfaceAddr>> {
        let (tx, rx) = crossbeam_channel::bounded(4);
        let _ = self.subscribe_tx.send(tx);
        rx
    }
}
