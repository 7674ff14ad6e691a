//! Deterministic stream → multicast group address mapping.

use std::net::{Ipv4Addr, SocketAddrV4};

use sha2::{Digest, Sha256};

/// The reference process-wide default multicast port.
pub const DEFAULT_PORT: u16 = 19090;

/// A base CIDR (network address + prefix length) plus a UDP port. Maps a
/// stream label to a UDP group address deterministically: the network bits
/// come from the base address, the host bits come from `SHA-256(stream)`.
#[derive(Debug, Clone, Copy)]
pub struct MulticastPool {
    base: Ipv4Addr,
    mask: Ipv4Addr,
    port: u16,
}

impl MulticastPool {
    /// `prefix_len` is the CIDR prefix length (e.g. 16 for a `/16`).
    pub fn new(base: Ipv4Addr, prefix_len: u8, port: u16) -> Self {
        Self {
            base,
            mask: prefix_mask(prefix_len),
            port,
        }
    }

    /// `base` defaults to `239.0.0.0/16` and `port` to [`DEFAULT_PORT`],
    /// matching the reference deployment.
    pub fn default_scoped() -> Self {
        Self::new(Ipv4Addr::new(239, 0, 0, 0), 16, DEFAULT_PORT)
    }

    /// Pure function: identical inputs always yield the identical address.
    pub fn address_for_stream(&self, stream: &str) -> SocketAddrV4 {
        let digest = Sha256::digest(stream.as_bytes());
        let base_octets = self.base.octets();
        let mask_octets = self.mask.octets();

        let mut out = [0u8; 4];
        for i in 0..4 {
            out[i] = (base_octets[i] & mask_octets[i]) | (digest[i] & !mask_octets[i]);
        }

        SocketAddrV4::new(Ipv4Addr::from(out), self.port)
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

fn prefix_mask(prefix_len: u8) -> Ipv4Addr {
    let prefix_len = prefix_len.min(32);
    let bits: u32 = if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - prefix_len)
    };
    Ipv4Addr::from(bits)
}
