//! A lightweight LAN publish/subscribe bus over IP multicast.
//!
//! Publishers [`Message::new`] a record for a `(stream, subject)` pair and
//! hand it to [`SenderEngine::publish`], which re-sends it at the
//! publisher's chosen interval until replaced or flushed. Subscribers
//! register a `(stream, subject-prefix)` interest with
//! [`ReceiverEngine::subscribe`] and get a callback per matching delivery.
//! There is no broker, no connection state, and no delivery acknowledgement
//! — this is best-effort multicast, not a message queue.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod iface;
pub mod message;
pub mod monitor;
pub mod pool;
pub mod receiver;
pub mod sender;
pub mod subject;
pub mod trie;

pub use config::Config;
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use iface::{InterfaceAddr, InterfaceSelector};
pub use message::Message;
pub use monitor::{AddressMonitor, PollingAddressMonitor};
pub use pool::MulticastPool;
pub use receiver::ReceiverEngine;
pub use sender::SenderEngine;
pub use subject::Subject;
pub use trie::SubscribeOptions;

use std::sync::Arc;

/// Bring up a sender and receiver engine sharing one dispatcher and one
/// multicast pool, resolving the configured interface set once at
/// construction, then wires a [`PollingAddressMonitor`] into the sender so
/// it reopens its sockets whenever the host's interface addresses change
/// (spec §4.5). This is the entry point most applications want; callers
/// who need finer control can construct the pieces directly instead.
pub fn bring_up(config: &Config) -> Result<(Arc<SenderEngine>, ReceiverEngine)> {
    let selector = config.resolved_selector();
    let ifaces = iface::require_nonempty(iface::resolve(&selector)?)?;
    let pool = config.pool();
    let dispatcher = Arc::new(Dispatcher::new(ifaces.clone()));

    let sender = Arc::new(SenderEngine::new(ifaces, pool));
    let receiver = ReceiverEngine::new(dispatcher, pool);

    let monitor: Arc<dyn AddressMonitor> = Arc::new(PollingAddressMonitor::start(
        selector,
        config.address_monitor_interval,
    ));
    sender.watch_address_monitor(monitor);

    Ok((sender, receiver))
}
