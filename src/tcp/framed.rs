use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use util::Conn;

use crate::error::{Error, Result};

/// Size of the RFC 4571 length prefix.
pub const FRAME_HEADER_SIZE: usize = 2;

struct FrameReader {
    stream: OwnedReadHalf,
    /// Bytes consumed by stream classification before the stream was handed
    /// over; drained ahead of the socket.
    preread: Vec<u8>,
}

impl FrameReader {
    /// Fills `buf` completely from the preread bytes and then the stream.
    async fn read_full(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        let mut filled = 0;
        if !self.preread.is_empty() {
            let n = std::cmp::min(self.preread.len(), buf.len());
            buf[..n].copy_from_slice(&self.preread[..n]);
            self.preread.drain(..n);
            filled = n;
        }
        if filled < buf.len() {
            self.stream.read_exact(&mut buf[filled..]).await?;
        }
        Ok(())
    }
}

/// FramedTcpConn carries datagram semantics over a TCP byte stream using the
/// RFC 4571 encapsulation: each frame is a 2-byte big-endian payload length
/// followed by the payload.
pub struct FramedTcpConn {
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    reader: AsyncMutex<FrameReader>,
    writer: AsyncMutex<OwnedWriteHalf>,
}

impl FramedTcpConn {
    pub fn new(stream: TcpStream) -> Result<Self> {
        FramedTcpConn::with_preread(stream, Vec::new())
    }

    /// Wraps a stream whose first `preread` bytes were already consumed by a
    /// classifier; they are replayed ahead of the socket.
    pub fn with_preread(stream: TcpStream, preread: Vec<u8>) -> Result<Self> {
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();

        Ok(FramedTcpConn {
            local_addr,
            peer_addr,
            reader: AsyncMutex::new(FrameReader {
                stream: read_half,
                preread,
            }),
            writer: AsyncMutex::new(write_half),
        })
    }

    /// Reads one frame into `buf`, returning the payload length. A stream
    /// that ends before the 2-byte length arrives is a hole punch; an EOF
    /// inside the frame fails the receive.
    pub async fn read_frame(&self, buf: &mut [u8]) -> Result<usize> {
        let mut reader = self.reader.lock().await;

        let mut header = [0u8; FRAME_HEADER_SIZE];
        if reader.read_full(&mut header).await.is_err() {
            return Err(Error::ErrHolePunch);
        }
        let len = u16::from_be_bytes(header) as usize;

        let mut payload = vec![0u8; len];
        reader.read_full(&mut payload).await?;

        let n = std::cmp::min(len, buf.len());
        buf[..n].copy_from_slice(&payload[..n]);
        Ok(n)
    }

    /// Writes one frame. The frame is assembled first so the stream lock is
    /// held only for a single write.
    pub async fn write_frame(&self, payload: &[u8]) -> Result<usize> {
        if payload.len() > u16::MAX as usize {
            return Err(Error::Other(format!(
                "payload of {} bytes exceeds the 16-bit frame length",
                payload.len()
            )));
        }

        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        frame.extend_from_slice(payload);

        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        Ok(payload.len())
    }
}

#[async_trait]
impl Conn for FramedTcpConn {
    async fn connect(&self, _addr: SocketAddr) -> util::error::Result<()> {
        Err(util::Error::ErrNotApplicable)
    }

    async fn recv(&self, buf: &mut [u8]) -> util::error::Result<usize> {
        self.read_frame(buf)
            .await
            .map_err(|err| util::Error::Other(err.to_string()))
    }

    async fn recv_from(&self, buf: &mut [u8]) -> util::error::Result<(usize, SocketAddr)> {
        let n = self
            .read_frame(buf)
            .await
            .map_err(|err| util::Error::Other(err.to_string()))?;
        Ok((n, self.peer_addr))
    }

    async fn send(&self, buf: &[u8]) -> util::error::Result<usize> {
        self.write_frame(buf)
            .await
            .map_err(|err| util::Error::Other(err.to_string()))
    }

    async fn send_to(&self, buf: &[u8], _target: SocketAddr) -> util::error::Result<usize> {
        self.send(buf).await
    }

    fn local_addr(&self) -> util::error::Result<SocketAddr> {
        Ok(self.local_addr)
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.peer_addr)
    }

    async fn close(&self) -> util::error::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.shutdown().await?;
        Ok(())
    }
}
