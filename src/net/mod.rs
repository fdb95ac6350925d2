pub(crate) mod connector;
mod raw;

#[cfg(test)]
mod net_test;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use util::sync::Mutex;
use util::Conn;

pub use raw::RawMessage;

use crate::addr::{Transport, TransportAddress};
use crate::error::{Error, Result};
use self::connector::{Connector, ConnectorError};

/// Number of concurrent message-processing workers.
const POOL_SIZE: usize = 8;

/// Depth of the queue feeding the workers.
const QUEUE_SIZE: usize = 512;

/// Consumer of received datagrams. The stack implements this; the manager
/// only sees the seam so the two can be constructed in either order.
#[async_trait]
pub trait RawMessageProcessor {
    async fn process_message(&self, msg: RawMessage);
}

type ConnectorIndex = HashMap<TransportAddress, HashMap<Option<TransportAddress>, Arc<Connector>>>;

/// NetAccessManager owns every connector and the worker pool that decodes
/// and dispatches what they receive. Keys are `(local, remote?)`, one index
/// per transport kind; a `None` remote matches any source (unconnected UDP).
pub struct NetAccessManager {
    udp_connectors: Mutex<ConnectorIndex>,
    tcp_connectors: Mutex<ConnectorIndex>,

    msg_tx: mpsc::Sender<RawMessage>,
    error_tx: mpsc::UnboundedSender<ConnectorError>,

    workers: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl NetAccessManager {
    pub fn new(processor: Weak<dyn RawMessageProcessor + Send + Sync>) -> Arc<Self> {
        let (msg_tx, msg_rx) = mpsc::channel(QUEUE_SIZE);
        let (error_tx, error_rx) = mpsc::unbounded_channel();

        let manager = Arc::new(NetAccessManager {
            udp_connectors: Mutex::new(HashMap::new()),
            tcp_connectors: Mutex::new(HashMap::new()),
            msg_tx,
            error_tx,
            workers: Mutex::new(Vec::with_capacity(POOL_SIZE)),
            stopped: AtomicBool::new(false),
        });

        manager.start_workers(msg_rx, processor);
        NetAccessManager::start_error_watcher(Arc::downgrade(&manager), error_rx);

        manager
    }

    fn index_for(&self, transport: Transport) -> &Mutex<ConnectorIndex> {
        match transport {
            Transport::Udp => &self.udp_connectors,
            Transport::Tcp | Transport::Tls => &self.tcp_connectors,
        }
    }

    fn start_workers(
        self: &Arc<Self>,
        msg_rx: mpsc::Receiver<RawMessage>,
        processor: Weak<dyn RawMessageProcessor + Send + Sync>,
    ) {
        let msg_rx = Arc::new(AsyncMutex::new(msg_rx));
        let mut workers = self.workers.lock();

        for _ in 0..POOL_SIZE {
            let msg_rx = Arc::clone(&msg_rx);
            let processor = processor.clone();

            workers.push(tokio::spawn(async move {
                loop {
                    let msg = {
                        let mut rx = msg_rx.lock().await;
                        rx.recv().await
                    };
                    let msg = match msg {
                        Some(msg) => msg,
                        None => return,
                    };
                    match processor.upgrade() {
                        Some(processor) => processor.process_message(msg).await,
                        None => return,
                    }
                }
            }));
        }
    }

    /// Evicts connectors that reported a fatal receive error.
    fn start_error_watcher(
        manager: Weak<NetAccessManager>,
        mut error_rx: mpsc::UnboundedReceiver<ConnectorError>,
    ) {
        tokio::spawn(async move {
            while let Some(err) = error_rx.recv().await {
                let manager = match manager.upgrade() {
                    Some(manager) => manager,
                    None => return,
                };
                log::warn!(
                    "evicting connector {} after fatal error: {}",
                    err.listen_address,
                    err.error
                );
                manager
                    .remove_socket(err.listen_address, err.remote_address)
                    .await;
            }
        });
    }

    /// Registers a socket and starts its receive loop. Adding a socket for an
    /// existing `(local, remote?)` key is a no-op with a warning.
    pub fn add_socket(
        &self,
        conn: Arc<dyn Conn + Send + Sync>,
        local: TransportAddress,
        remote: Option<TransportAddress>,
    ) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::ErrStackStopped);
        }

        let connector = Arc::new(Connector::new(conn, local, remote));
        {
            let mut index = self.index_for(local.transport).lock();
            let submap = index.entry(local).or_default();
            if submap.contains_key(&remote) {
                log::warn!("connector for {local} (remote {remote:?}) already exists");
                return Ok(());
            }
            submap.insert(remote, Arc::clone(&connector));
        }

        connector.start(self.msg_tx.clone(), self.error_tx.clone());
        Ok(())
    }

    /// Stops and removes the connector for the given key. Empty per-local
    /// submaps are pruned.
    pub async fn remove_socket(
        &self,
        local: TransportAddress,
        remote: Option<TransportAddress>,
    ) {
        let removed = {
            let mut index = self.index_for(local.transport).lock();
            let removed = match index.get_mut(&local) {
                Some(submap) => submap.remove(&remote),
                None => None,
            };
            if index.get(&local).is_some_and(|submap| submap.is_empty()) {
                index.remove(&local);
            }
            removed
        };

        if let Some(connector) = removed {
            connector.stop().await;
        }
    }

    /// Sends raw bytes through the connector matching `(local, remote)`. UDP
    /// falls back to the wildcard-remote connector; otherwise `ErrNoRoute`.
    pub async fn send(
        &self,
        bytes: &[u8],
        local: TransportAddress,
        remote: TransportAddress,
    ) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::ErrStackStopped);
        }

        let connector = {
            let index = self.index_for(local.transport).lock();
            index.get(&local).and_then(|submap| {
                submap.get(&Some(remote)).cloned().or_else(|| {
                    if local.transport == Transport::Udp {
                        submap.get(&None).cloned()
                    } else {
                        None
                    }
                })
            })
        };

        match connector {
            Some(connector) => connector.send(bytes, remote).await,
            None => Err(Error::ErrNoRoute),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Total stop: cancels in-flight processing and stops every connector.
    /// Once this returns, no further message reaches the processor.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        let workers: Vec<JoinHandle<()>> = {
            let mut workers = self.workers.lock();
            workers.drain(..).collect()
        };
        for worker in &workers {
            worker.abort();
        }
        for worker in workers {
            let _ = worker.await;
        }

        let connectors: Vec<Arc<Connector>> = {
            let mut all = Vec::new();
            for index in [&self.udp_connectors, &self.tcp_connectors] {
                let mut index = index.lock();
                for (_, submap) in index.drain() {
                    all.extend(submap.into_values());
                }
            }
            all
        };
        for connector in connectors {
            connector.stop().await;
        }
    }
}
