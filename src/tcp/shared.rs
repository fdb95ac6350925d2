use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::{timeout, Duration};
use util::sync::Mutex;

use crate::error::{Error, Result};
use crate::mux::match_fn::MatchFunc;

/// Connections that cannot be classified within this window are closed.
pub const DEFAULT_ABANDON_TIMEOUT: Duration = Duration::from_secs(15);

/// Upper bound on the startup bytes inspected per connection.
const MAX_PREREAD: usize = 128;

/// Accept-queue depth per logical endpoint.
const BACKLOG: usize = 32;

/// A connection routed to a logical endpoint: the stream, the startup bytes
/// already consumed by classification, and the peer address.
pub struct RoutedStream {
    pub stream: TcpStream,
    pub preread: Vec<u8>,
    pub peer_addr: SocketAddr,
}

/// One logical server endpoint sharing the physical listener. Connections
/// whose startup bytes its filter accepts arrive on `accept`.
pub struct SharedTcpEndpoint {
    filter: MatchFunc,
    accept_tx: mpsc::Sender<RoutedStream>,
    accept_rx: AsyncMutex<mpsc::Receiver<RoutedStream>>,
}

impl SharedTcpEndpoint {
    /// Waits for the next connection routed to this endpoint.
    pub async fn accept(&self) -> Result<RoutedStream> {
        let mut accept_rx = self.accept_rx.lock().await;
        accept_rx.recv().await.ok_or(Error::ErrClosed)
    }
}

/// SharedTcpListener lets several logical endpoints share one physical TCP
/// listening socket. Each accepted connection is routed to the first
/// endpoint whose filter accepts its first bytes; connections that never
/// deliver enough bytes to classify are closed after the abandonment
/// timeout.
pub struct SharedTcpListener {
    local_addr: SocketAddr,
    endpoints: Mutex<Vec<Arc<SharedTcpEndpoint>>>,
    close_tx: Mutex<Option<mpsc::Sender<()>>>,
    abandon_timeout: Duration,
}

impl SharedTcpListener {
    /// Binds the physical socket. `reuse_address` maps to SO_REUSEADDR.
    pub async fn bind(
        addr: SocketAddr,
        reuse_address: bool,
        abandon_timeout: Duration,
    ) -> Result<Arc<Self>> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(reuse_address)?;
        socket.bind(addr)?;
        let listener = socket.listen(BACKLOG as u32)?;
        let local_addr = listener.local_addr()?;

        let (close_tx, mut close_rx) = mpsc::channel(1);
        let shared = Arc::new(SharedTcpListener {
            local_addr,
            endpoints: Mutex::new(Vec::new()),
            close_tx: Mutex::new(Some(close_tx)),
            abandon_timeout,
        });

        let accept_self = Arc::clone(&shared);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = close_rx.recv() => return,
                    res = listener.accept() => match res {
                        Ok((stream, peer_addr)) => {
                            let classify_self = Arc::clone(&accept_self);
                            tokio::spawn(async move {
                                classify_self.classify(stream, peer_addr).await;
                            });
                        }
                        Err(err) => {
                            log::warn!("accept failed: {err}");
                            return;
                        }
                    }
                }
            }
        });

        Ok(shared)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Registers a logical endpoint. Registration order is routing order:
    /// the first accepting filter wins.
    pub fn register(&self, filter: MatchFunc) -> Arc<SharedTcpEndpoint> {
        let (accept_tx, accept_rx) = mpsc::channel(BACKLOG);
        let endpoint = Arc::new(SharedTcpEndpoint {
            filter,
            accept_tx,
            accept_rx: AsyncMutex::new(accept_rx),
        });

        let mut endpoints = self.endpoints.lock();
        endpoints.push(Arc::clone(&endpoint));
        endpoint
    }

    /// Stops accepting. Endpoints drain whatever was already routed.
    pub fn close(&self) {
        let mut close_tx = self.close_tx.lock();
        close_tx.take();
    }

    /// Reads startup bytes until some endpoint's filter accepts, the stream
    /// runs dry, or the abandonment timeout fires.
    async fn classify(&self, mut stream: TcpStream, peer_addr: SocketAddr) {
        let mut preread = Vec::with_capacity(MAX_PREREAD);

        let routed = timeout(self.abandon_timeout, async {
            let mut chunk = [0u8; MAX_PREREAD];
            loop {
                if !preread.is_empty() {
                    let endpoints: Vec<Arc<SharedTcpEndpoint>> = {
                        let endpoints = self.endpoints.lock();
                        endpoints.clone()
                    };
                    for endpoint in endpoints {
                        if (endpoint.filter)(&preread) {
                            return Some(endpoint);
                        }
                    }
                }
                if preread.len() >= MAX_PREREAD {
                    return None;
                }
                match stream.read(&mut chunk).await {
                    Ok(0) | Err(_) => return None,
                    Ok(n) => preread.extend_from_slice(&chunk[..n]),
                }
            }
        })
        .await;

        match routed {
            Ok(Some(endpoint)) => {
                let routed = RoutedStream {
                    stream,
                    preread,
                    peer_addr,
                };
                if endpoint.accept_tx.send(routed).await.is_err() {
                    log::debug!("endpoint gone, dropping connection from {peer_addr}");
                }
            }
            Ok(None) => {
                log::debug!("unclassifiable connection from {peer_addr}, closing");
            }
            Err(_) => {
                log::debug!(
                    "connection from {peer_addr} not classified within {:?}, closing",
                    self.abandon_timeout
                );
            }
        }
    }
}
