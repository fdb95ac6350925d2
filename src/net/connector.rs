use std::io::ErrorKind;
use std::sync::Arc;

use tokio::sync::mpsc;
use util::Conn;

use super::RawMessage;
use crate::addr::TransportAddress;
use crate::error::{Error, Result};

/// Receive MTU for a single datagram.
pub(crate) const RECEIVE_MTU: usize = 1500;

/// A fatal connector failure, reported to the owning manager so it can evict
/// the connector from its index.
#[derive(Debug)]
pub(crate) struct ConnectorError {
    pub listen_address: TransportAddress,
    pub remote_address: Option<TransportAddress>,
    pub error: Error,
}

/// Connector runs the receive loop for one endpoint: it reads datagrams from
/// the underlying socket, tags them with the (local, remote) transport
/// addresses and queues them for asynchronous processing.
pub(crate) struct Connector {
    conn: Arc<dyn Conn + Send + Sync>,
    listen_address: TransportAddress,
    remote_address: Option<TransportAddress>,
    close_tx: util::sync::Mutex<Option<mpsc::Sender<()>>>,
}

impl Connector {
    pub(crate) fn new(
        conn: Arc<dyn Conn + Send + Sync>,
        listen_address: TransportAddress,
        remote_address: Option<TransportAddress>,
    ) -> Self {
        Connector {
            conn,
            listen_address,
            remote_address,
            close_tx: util::sync::Mutex::new(None),
        }
    }

    pub(crate) fn listen_address(&self) -> TransportAddress {
        self.listen_address
    }

    pub(crate) fn remote_address(&self) -> Option<TransportAddress> {
        self.remote_address
    }

    /// Spawns the reader. Received datagrams go to `msg_tx`; a fatal error is
    /// reported once on `error_tx` and ends the loop.
    pub(crate) fn start(
        &self,
        msg_tx: mpsc::Sender<RawMessage>,
        error_tx: mpsc::UnboundedSender<ConnectorError>,
    ) {
        let (close_tx, mut close_rx) = mpsc::channel(1);
        {
            let mut tx = self.close_tx.lock();
            *tx = Some(close_tx);
        }

        let conn = Arc::clone(&self.conn);
        let listen_address = self.listen_address;
        let remote_address = self.remote_address;
        let transport = listen_address.transport;

        tokio::spawn(async move {
            let mut buf = vec![0u8; RECEIVE_MTU];

            loop {
                tokio::select! {
                    _ = close_rx.recv() => return,
                    res = conn.recv_from(&mut buf) => match res {
                        Ok((n, addr)) => {
                            let remote = TransportAddress::from_socket_addr(addr, transport);
                            let msg = RawMessage::new(&buf, n, remote, listen_address);
                            if msg_tx.send(msg).await.is_err() {
                                // Processing pool is gone; the manager is
                                // stopping.
                                return;
                            }
                        }
                        Err(util::Error::Io(err))
                            if matches!(
                                err.0.kind(),
                                ErrorKind::TimedOut
                                    | ErrorKind::WouldBlock
                                    | ErrorKind::Interrupted
                                    | ErrorKind::ConnectionReset
                            ) =>
                        {
                            log::debug!("{listen_address}: transient receive error: {err}");
                            continue;
                        }
                        Err(err) => {
                            log::warn!("{listen_address}: receive failed, stopping: {err}");
                            let _ = error_tx.send(ConnectorError {
                                listen_address,
                                remote_address,
                                error: err.into(),
                            });
                            return;
                        }
                    }
                }
            }
        });
    }

    /// Writes one datagram to `dst` (ignored when the socket is connected).
    pub(crate) async fn send(&self, bytes: &[u8], dst: TransportAddress) -> Result<()> {
        if self.remote_address.is_some() {
            self.conn.send(bytes).await?;
        } else {
            self.conn.send_to(bytes, dst.socket_addr()).await?;
        }
        Ok(())
    }

    /// Closes the socket; the reader observes the close and exits. Errors are
    /// swallowed here and surface through the reader's error sink instead.
    pub(crate) async fn stop(&self) {
        {
            let mut tx = self.close_tx.lock();
            tx.take();
        }
        if let Err(err) = self.conn.close().await {
            log::debug!("{}: close: {err}", self.listen_address);
        }
    }
}
