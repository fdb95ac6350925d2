use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

use super::Conn;
use crate::error::{Error, Result};

/// Creates two connected in-memory datagram endpoints. Everything sent on
/// one side is received on the other, one packet per recv call.
pub fn pipe() -> (PipeConn, PipeConn) {
    let addr_a = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 1);
    let addr_b = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 2);

    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();

    (
        PipeConn {
            local_addr: addr_a,
            peer_addr: addr_b,
            write_tx: b_tx,
            read_rx: Mutex::new(a_rx),
        },
        PipeConn {
            local_addr: addr_b,
            peer_addr: addr_a,
            write_tx: a_tx,
            read_rx: Mutex::new(b_rx),
        },
    )
}

pub struct PipeConn {
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    write_tx: mpsc::UnboundedSender<Vec<u8>>,
    read_rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl PipeConn {
    async fn read_packet(&self, buf: &mut [u8]) -> Result<usize> {
        let mut read_rx = self.read_rx.lock().await;
        let packet = match read_rx.recv().await {
            Some(packet) => packet,
            None => return Err(Error::ErrClosedConn),
        };

        let n = std::cmp::min(buf.len(), packet.len());
        buf[..n].copy_from_slice(&packet[..n]);
        Ok(n)
    }
}

#[async_trait]
impl Conn for PipeConn {
    async fn connect(&self, _addr: SocketAddr) -> Result<()> {
        Err(Error::ErrNotApplicable)
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        self.read_packet(buf).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        let n = self.read_packet(buf).await?;
        Ok((n, self.peer_addr))
    }

    async fn send(&self, buf: &[u8]) -> Result<usize> {
        self.write_tx
            .send(buf.to_vec())
            .map_err(|_| Error::ErrClosedConn)?;
        Ok(buf.len())
    }

    async fn send_to(&self, buf: &[u8], _target: SocketAddr) -> Result<usize> {
        self.send(buf).await
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local_addr)
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.peer_addr)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
