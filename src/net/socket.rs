//! UDP socket setup.
//!
//! Sockets are configured through socket2 before being converted to std
//! sockets: address reuse, enlarged buffers, a receive timeout for clean
//! shutdown, and optional multicast membership.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::debug;

use crate::core::Status;

const SOCKET_BUFFER_SIZE: usize = 1024 * 1024;
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Per-interface socket options; must be applied before bind/connect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IfaceConfig {
    /// Local address to bind outgoing packets to; None picks any.
    pub outgoing_addr: Option<SocketAddr>,
    /// Multicast group to join on the bound socket.
    pub multicast_group: Option<IpAddr>,
    /// Allow address reuse on bind.
    pub reuse_addr: bool,
}

/// Bind a receiving socket with the interface options applied.
pub fn bind_socket(bind_addr: SocketAddr, config: &IfaceConfig) -> Result<UdpSocket, Status> {
    let domain = if bind_addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket =
        Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).map_err(|_| Status::BadInterface)?;

    if config.reuse_addr {
        socket
            .set_reuse_address(true)
            .map_err(|_| Status::BadInterface)?;
    }

    socket
        .bind(&bind_addr.into())
        .map_err(|_| Status::BadInterface)?;

    socket
        .set_read_timeout(Some(RECV_TIMEOUT))
        .map_err(|_| Status::BadInterface)?;
    let _ = socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE);

    let socket: UdpSocket = socket.into();

    if let Some(group) = config.multicast_group {
        match (group, bind_addr.ip()) {
            (IpAddr::V4(group), IpAddr::V4(_)) => {
                let iface = match config.outgoing_addr {
                    Some(SocketAddr::V4(addr)) => *addr.ip(),
                    _ => Ipv4Addr::UNSPECIFIED,
                };
                socket
                    .join_multicast_v4(&group, &iface)
                    .map_err(|_| Status::BadInterface)?;
            }
            (IpAddr::V6(group), IpAddr::V6(_)) => {
                socket
                    .join_multicast_v6(&group, 0)
                    .map_err(|_| Status::BadInterface)?;
            }
            _ => return Err(Status::BadConfig),
        }
        debug!(%group, "joined multicast group");
    }

    Ok(socket)
}

/// Create a sending socket directed at `remote_addr`.
pub fn connect_socket(
    remote_addr: SocketAddr,
    config: &IfaceConfig,
) -> Result<UdpSocket, Status> {
    let local = config.outgoing_addr.unwrap_or_else(|| {
        if remote_addr.is_ipv4() {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
        } else {
            SocketAddr::new(IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED), 0)
        }
    });

    let domain = if remote_addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket =
        Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).map_err(|_| Status::BadInterface)?;

    if config.reuse_addr {
        socket
            .set_reuse_address(true)
            .map_err(|_| Status::BadInterface)?;
    }
    socket.bind(&local.into()).map_err(|_| Status::BadInterface)?;
    let _ = socket.set_send_buffer_size(SOCKET_BUFFER_SIZE);

    let socket: UdpSocket = socket.into();
    socket
        .connect(remote_addr)
        .map_err(|_| Status::BadInterface)?;
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_and_connect_loopback() {
        let recv = bind_socket("127.0.0.1:0".parse().unwrap(), &IfaceConfig::default()).unwrap();
        let recv_addr = recv.local_addr().unwrap();

        let send = connect_socket(recv_addr, &IfaceConfig::default()).unwrap();
        send.send(b"ping").unwrap();

        let mut buf = [0u8; 16];
        let (n, _) = recv.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
    }

    #[test]
    fn test_reuse_addr() {
        let config = IfaceConfig {
            reuse_addr: true,
            ..Default::default()
        };
        let a = bind_socket("127.0.0.1:0".parse().unwrap(), &config).unwrap();
        assert!(a.local_addr().unwrap().port() != 0);
    }
}
