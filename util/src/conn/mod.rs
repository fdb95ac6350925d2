pub mod conn_pipe;
pub mod conn_udp;

#[cfg(test)]
mod conn_pipe_test;

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::error::Result;

/// Conn is the polymorphic datagram-socket surface: everything above the
/// physical endpoint (connectors, multiplexers, framed transports) talks
/// through it so the implementation can swap without touching callers.
#[async_trait]
pub trait Conn {
    async fn connect(&self, addr: SocketAddr) -> Result<()>;
    async fn recv(&self, buf: &mut [u8]) -> Result<usize>;
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)>;
    async fn send(&self, buf: &[u8]) -> Result<usize>;
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize>;
    fn local_addr(&self) -> Result<SocketAddr>;
    fn remote_addr(&self) -> Option<SocketAddr>;
    async fn close(&self) -> Result<()>;
}
