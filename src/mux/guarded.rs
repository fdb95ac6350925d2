
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use util::Conn;

use crate::error::{Error, Result};

/// GuardedConn makes closing a datagram socket safe while receives are in
/// flight: receivers hold the read side of a lock for the duration of the
/// call, `close` wakes them, then takes the write side, so it returns only
/// after every receiver has left.
pub struct GuardedConn {
    conn: Arc<dyn Conn + Send + Sync>,
    closed: RwLock<bool>,
    closed_tx: watch::Sender<bool>,
}

impl GuardedConn {
    pub fn new(conn: Arc<dyn Conn + Send + Sync>) -> Self {
        let (closed_tx, _) = watch::channel(false);
        GuardedConn {
            conn,
            closed: RwLock::new(false),
            closed_tx,
        }
    }

    pub async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        // Hold the read side while blocked in the socket call.
        let closed = self.closed.read().await;
        if *closed {
            return Err(Error::ErrClosed);
        }

        let mut closed_rx = self.closed_tx.subscribe();
        tokio::select! {
            res = self.conn.recv_from(buf) => Ok(res?),
            _ = closed_rx.changed() => Err(Error::ErrClosed),
        }
    }

    pub async fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize> {
        let closed = self.closed.read().await;
        if *closed {
            return Err(Error::ErrClosed);
        }
        Ok(self.conn.send_to(buf, target).await?)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.conn.local_addr()?)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }

    /// Wakes blocked receivers, waits for them to leave the receive call,
    /// then closes the underlying socket. Never returns an error upward;
    /// close failures are logged.
    pub async fn close(&self) {
        let _ = self.closed_tx.send(true);

        let mut closed = self.closed.write().await;
        if *closed {
            return;
        }
        *closed = true;

        if let Err(err) = self.conn.close().await {
            log::debug!("closing underlying socket: {err}");
        }
    }
}
