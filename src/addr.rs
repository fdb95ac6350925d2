
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Transport is the protocol an endpoint speaks. Unlike a plain socket
/// address pair, it participates in equality and hashing, so a UDP and a TCP
/// endpoint on the same port are distinct keys.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Transport {
    Udp,
    Tcp,
    Tls,
}

impl Transport {
    /// True for the stream transports that carry framed datagrams.
    pub fn is_reliable(&self) -> bool {
        matches!(self, Transport::Tcp | Transport::Tls)
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Transport::Udp => "udp",
            Transport::Tcp => "tcp",
            Transport::Tls => "tls",
        };
        write!(f, "{s}")
    }
}

/// TransportAddress is (ip, port, transport). Two addresses are equal iff
/// all three components match.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TransportAddress {
    pub ip: IpAddr,
    pub port: u16,
    pub transport: Transport,
}

impl TransportAddress {
    pub fn new(ip: IpAddr, port: u16, transport: Transport) -> Self {
        TransportAddress {
            ip,
            port,
            transport,
        }
    }

    pub fn from_socket_addr(addr: SocketAddr, transport: Transport) -> Self {
        TransportAddress {
            ip: addr.ip(),
            port: addr.port(),
            transport,
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl fmt::Display for TransportAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.transport, self.socket_addr())
    }
}
