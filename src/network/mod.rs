//! Socket setup and host address helpers

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use tokio::net::{TcpListener, TcpSocket};

/// Pending-connection queue length for listening sockets
pub const LISTEN_BACKLOG: u32 = 10;

/// Binds a listening TCP socket with `SO_REUSEADDR` set
///
/// Address reuse lets a restarted server take its port back while old
/// connections linger in TIME_WAIT. Binding still fails if another socket
/// is listening on the port.
pub fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

/// Returns true for `localhost` and loopback IP literals
pub fn is_loopback_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.trim_matches(|c| c == '[' || c == ']')
        .parse::<IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}

/// Returns the address of the interface used for outbound traffic
///
/// No packet is sent: connecting a UDP socket only selects a route. Falls
/// back to the IPv4 loopback address when no route exists.
pub fn local_ip() -> IpAddr {
    let probe = || -> io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(10, 255, 255, 255), 1))?;
        Ok(socket.local_addr()?.ip())
    };
    probe().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_loopback_host() {
        assert!(is_loopback_host("localhost"));
        assert!(is_loopback_host("LOCALHOST"));
        assert!(is_loopback_host("127.0.0.1"));
        assert!(is_loopback_host("127.1.2.3"));
        assert!(is_loopback_host("::1"));
        assert!(is_loopback_host("[::1]"));
        assert!(!is_loopback_host("192.168.1.10"));
        assert!(!is_loopback_host("example.com"));
    }

    #[test]
    fn test_local_ip_is_not_unspecified() {
        assert!(!local_ip().is_unspecified());
    }

    #[tokio::test]
    async fn test_bind_listener_rejects_port_in_use() {
        let first = bind_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = first.local_addr().unwrap();

        assert!(bind_listener(addr).is_err());

        drop(first);
        assert!(bind_listener(addr).is_ok());
    }
}
