use std::net::Ipv4Addr;

/// Errors surfaced synchronously from the control plane (`publish`,
/// `subscribe`, subject parsing, socket setup). The data plane never
/// returns these — decode failures and per-tick send failures are logged
/// and swallowed, per the "best-effort multicast" policy.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("stream is empty")]
    StreamEmpty,

    #[error("subject is empty")]
    SubjectEmpty,

    #[error("wildcard '*' may only appear as the last subject part")]
    WildcardNotLast,

    #[error("subject contains more than one wildcard")]
    MultipleWildcards,

    #[error("wildcard subject is not allowed here")]
    WildcardNotAllowed,

    #[error("payload too short to contain a timestamp: {len} bytes")]
    InvalidSize { len: usize },

    #[error("payload is missing the stream/subject/data separators")]
    InvalidFormat,

    #[error("failed to bind socket on {addr}: {source}")]
    Bind {
        addr: Ipv4Addr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to join multicast group {group} on interface {iface}: {source}")]
    Join {
        group: Ipv4Addr,
        iface: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to leave multicast group {group} on interface {iface}: {source}")]
    Leave {
        group: Ipv4Addr,
        iface: String,
        #[source]
        source: std::io::Error,
    },

    #[error("socket write failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("no network interfaces with an IPv4 address were found")]
    NoInterfaces,

    #[error("config could not be parsed: {0}")]
    Config(#[source] serde_json::Error),

    #[error("config file could not be read: {0}")]
    ConfigIo(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
