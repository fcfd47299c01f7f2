//! UDP socket construction and address resolution for channels.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::str::FromStr;

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{Error, Result};

/// Address-family selection for channel binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindFamily {
    /// Take whatever resolution yields first
    #[default]
    Auto,
    V4,
    V6,
}

impl BindFamily {
    /// Parse the numeric spellings `0`, `4`, `6`.
    pub fn from_numeric(value: u8) -> Result<Self> {
        match value {
            0 => Ok(BindFamily::Auto),
            4 => Ok(BindFamily::V4),
            6 => Ok(BindFamily::V6),
            other => Err(Error::InvalidBindFamily(other.to_string())),
        }
    }

    /// The wildcard host used when no bind host is given.
    pub fn default_bind_host(&self) -> &'static str {
        match self {
            BindFamily::V6 => "::",
            _ => "0.0.0.0",
        }
    }

    fn matches(&self, addr: &SocketAddr) -> bool {
        match self {
            BindFamily::Auto => true,
            BindFamily::V4 => addr.is_ipv4(),
            BindFamily::V6 => addr.is_ipv6(),
        }
    }
}

impl FromStr for BindFamily {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" | "unspec" | "any" => Ok(BindFamily::Auto),
            "ipv4" | "inet" | "af_inet" => Ok(BindFamily::V4),
            "ipv6" | "inet6" | "af_inet6" => Ok(BindFamily::V6),
            other => Err(Error::InvalidBindFamily(other.to_string())),
        }
    }
}

/// Resolve `host:port` to a UDP address of the requested family.
pub(crate) fn resolve_udp_addr(host: &str, port: u16, family: BindFamily) -> Result<SocketAddr> {
    let candidates = (host, port)
        .to_socket_addrs()
        .map_err(|_| Error::AddrResolve(host.to_string(), port))?;
    for addr in candidates {
        if family.matches(&addr) {
            return Ok(addr);
        }
    }
    Err(Error::AddrResolve(host.to_string(), port))
}

/// Create a nonblocking UDP socket bound to `addr`, returning it together
/// with the kernel-assigned local address.
pub(crate) fn bind_udp_socket(addr: SocketAddr) -> Result<(UdpSocket, SocketAddr)> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    let local = socket.local_addr()?.as_socket().ok_or_else(|| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "socket has a non-inet local address",
        ))
    })?;
    Ok((socket.into(), local))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_spellings() {
        for s in ["auto", "unspec", "any"] {
            assert_eq!(s.parse::<BindFamily>().unwrap(), BindFamily::Auto);
        }
        for s in ["ipv4", "inet", "af_inet"] {
            assert_eq!(s.parse::<BindFamily>().unwrap(), BindFamily::V4);
        }
        for s in ["ipv6", "inet6", "af_inet6"] {
            assert_eq!(s.parse::<BindFamily>().unwrap(), BindFamily::V6);
        }
        assert!("tcp".parse::<BindFamily>().is_err());
    }

    #[test]
    fn numeric_families() {
        assert_eq!(BindFamily::from_numeric(0).unwrap(), BindFamily::Auto);
        assert_eq!(BindFamily::from_numeric(4).unwrap(), BindFamily::V4);
        assert_eq!(BindFamily::from_numeric(6).unwrap(), BindFamily::V6);
        assert!(BindFamily::from_numeric(5).is_err());
    }

    #[test]
    fn default_bind_hosts() {
        assert_eq!(BindFamily::Auto.default_bind_host(), "0.0.0.0");
        assert_eq!(BindFamily::V4.default_bind_host(), "0.0.0.0");
        assert_eq!(BindFamily::V6.default_bind_host(), "::");
    }

    #[test]
    fn bind_ephemeral_v4() {
        let addr = resolve_udp_addr("127.0.0.1", 0, BindFamily::V4).unwrap();
        let (_socket, local) = bind_udp_socket(addr).unwrap();
        assert!(local.is_ipv4());
        assert_ne!(local.port(), 0);
    }

    #[test]
    fn family_filter_applies() {
        let addr = resolve_udp_addr("127.0.0.1", 0, BindFamily::Auto).unwrap();
        assert!(addr.is_ipv4());
        assert!(resolve_udp_addr("127.0.0.1", 0, BindFamily::V6).is_err());
    }
}
