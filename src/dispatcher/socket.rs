//! Raw socket setup: `SO_REUSEADDR`, IPv4 multicast join/leave, and
//! ancillary-data reception of the packet's destination address
//! (`IP_PKTINFO`) so one socket can serve many multicast groups and the
//! dispatcher can tell them apart.
//!
//! Grounded on `examples/hdds-team-hdds/crates/hdds/src/transport/mobility/pktinfo.rs`
//! (the `socket2`/`libc` cmsg pattern) and on the Go reference's use of
//! `golang.org/x/net/ipv4.PacketConn` with `ipv4.FlagDst` control messages
//! (`examples/original_source/pkg/multicast/listener.go`), which is the
//! same ancillary-data idea expressed through that ecosystem's socket
//! abstraction instead of raw `libc`.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::os::unix::io::AsRawFd;

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{Error, Result};

pub const MAX_DATAGRAM: usize = 1500;

/// Open the single shared listener socket for `port`: bound to
/// `0.0.0.0:<port>`, `SO_REUSEADDR`, with destination-address ancillary
/// data enabled.
pub fn open_listener(port: u16) -> Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(|e| Error::Bind {
        addr: Ipv4Addr::UNSPECIFIED,
        source: e,
    })?;

    socket.set_reuse_address(true).map_err(|e| Error::Bind {
        addr: Ipv4Addr::UNSPECIFIED,
        source: e,
    })?;

    let bind_addr: SocketAddr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into();
    socket
        .bind(&bind_addr.into())
        .map_err(|e| Error::Bind {
            addr: Ipv4Addr::UNSPECIFIED,
            source: e,
        })?;

    enable_pktinfo(&socket).map_err(|e| Error::Bind {
        addr: Ipv4Addr::UNSPECIFIED,
        source: e,
    })?;

    tracing::debug!(port, "opened listener socket");
    Ok(socket)
}

/// Open one send socket bound to `bind_addr` (an interface's IPv4 address)
/// on an ephemeral local port, with `SO_REUSEADDR`.
pub fn open_sender(bind_addr: Ipv4Addr) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(|e| Error::Bind {
        addr: bind_addr,
        source: e,
    })?;

    socket.set_reuse_address(true).map_err(|e| Error::Bind {
        addr: bind_addr,
        source: e,
    })?;

    let addr: SocketAddr = SocketAddrV4::new(bind_addr, 0).into();
    socket.bind(&addr.into()).map_err(|e| Error::Bind {
        addr: bind_addr,
        source: e,
    })?;

    tracing::debug!(%bind_addr, "opened sender socket");
    Ok(socket.into())
}

pub fn join_group(socket: &Socket, group: Ipv4Addr, iface: Ipv4Addr, iface_name: &str) -> Result<()> {
    socket
        .join_multicast_v4(&group, &iface)
        .map(|()| {
            tracing::debug!(%group, iface = iface_name, "joined multicast group");
        })
        .map_err(|e| Error::Join {
            group,
            iface: iface_name.to_owned(),
            source: e,
        })
}

pub fn leave_group(socket: &Socket, group: Ipv4Addr, iface: Ipv4Addr, iface_name: &str) -> Result<()> {
    socket
        .leave_multicast_v4(&group, &iface)
        .map(|()| {
            tracing::debug!(%group, iface = iface_name, "left multicast group");
        })
        .map_err(|e| Error::Leave {
            group,
            iface: iface_name.to_owned(),
            source: e,
        })
}

#[cfg(target_os = "linux")]
fn enable_pktinfo(socket: &Socket) -> std::io::Result<()> {
    let fd = socket.as_raw_fd();
    let val: libc::c_int = 1;
    // SAFETY: fd is a valid, open socket owned by `socket`; val lives on the
    // stack for the duration of the call; IP_PKTINFO takes a c_int flag.
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_IP,
            libc::IP_PKTINFO,
            &val as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
fn enable_pktinfo(_socket: &Socket) -> std::io::Result<()> {
    // Destination-address ancillary data is Linux-only here; other
    // platforms fall back to a single-group-per-socket assumption upstream
    // (see `Listener::recv_with_destination`'s non-Linux branch).
    Ok(())
}

/// Block for the next datagram, returning its payload and the IPv4
/// destination address it was addressed to (the multicast group, on
/// platforms where ancillary data is available).
#[cfg(target_os = "linux")]
pub fn recv_with_destination(socket: &Socket, buf: &mut [u8]) -> std::io::Result<(usize, Ipv4Addr)> {
    use std::mem::MaybeUninit;

    let fd = socket.as_raw_fd();

    #[repr(C, align(8))]
    struct CmsgBuf([u8; 128]);
    let mut cmsg_buf = CmsgBuf([0u8; 128]);

    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    };

    let mut msg: libc::msghdr = unsafe { MaybeUninit::zeroed().assume_init() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.0.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = cmsg_buf.0.len();

    // SAFETY: fd is a valid open socket; msg is a fully initialized
    // msghdr pointing at a live iovec and a correctly sized, aligned
    // control buffer.
    let n = unsafe { libc::recvmsg(fd, &mut msg, 0) };
    if n < 0 {
        return Err(std::io::Error::last_os_error());
    }

    let mut dest = Ipv4Addr::UNSPECIFIED;

    // SAFETY: msg was populated by the successful recvmsg call above;
    // CMSG_FIRSTHDR/CMSG_NXTHDR only walk within msg_control/msg_controllen.
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::IPPROTO_IP && (*cmsg).cmsg_type == libc::IP_PKTINFO {
                let data_ptr = libc::CMSG_DATA(cmsg);
                let pktinfo: libc::in_pktinfo = std::ptr::read_unaligned(data_ptr as *const libc::in_pktinfo);
                // `s_addr` is laid out by the kernel in network byte order;
                // re-reading those same bytes natively gives the right octets.
                dest = Ipv4Addr::from(pktinfo.ipi_addr.s_addr.to_ne_bytes());
                break;
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    Ok((n as usize, dest))
}

#[cfg(not(target_os = "linux"))]
pub fn recv_with_destination(socket: &Socket, buf: &mut [u8]) -> std::io::Result<(usize, Ipv4Addr)> {
    // Without IP_PKTINFO we cannot recover the destination group address;
    // callers on these platforms should run one socket per group instead
    // of sharing a listener across groups on the same port.
    let fd = socket.as_raw_fd();
    // SAFETY: fd is a valid open socket; buf is a live, correctly sized
    // buffer for the duration of the call.
    let n = unsafe {
        libc::recv(
            fd,
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            0,
        )
    };
    if n < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok((n as usize, Ipv4Addr::UNSPECIFIED))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_sender_binds_ephemeral_port() {
        let socket = open_sender(Ipv4Addr::LOCALHOST).expect("bind");
        let addr = socket.local_addr().expect("local_addr");
        assert_ne!(addr.port(), 0);
    }
}
