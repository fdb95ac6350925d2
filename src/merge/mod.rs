
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tokio::time::{Duration, Instant};
use util::buffer::Packet;
use util::sync::Mutex;
use util::Conn;

use crate::error::{Error, Result};
use crate::net::connector::RECEIVE_MTU;

/// Bound on each per-underlying queue of received datagrams.
const CONTAINER_QUEUE_SIZE: usize = 100;

/// Spare receive buffers kept per underlying.
const BUFFER_POOL_SIZE: usize = 10;

/// External filter applied to dequeued packets. Rejected packets are counted
/// and skipped; only accepted packets update the trusted remote address.
pub trait PacketAcceptor: Send + Sync {
    fn accept(&self, packet: &Packet) -> bool;
}

struct TimedPacket {
    data: Vec<u8>,
    addr: SocketAddr,
    received_at: Instant,
}

/// One underlying socket: its reader task, its bounded queue of timestamped
/// datagrams and a small pool of reusable receive buffers.
struct Container {
    conn: Arc<dyn Conn + Send + Sync>,
    queue: Mutex<VecDeque<TimedPacket>>,
    pool: Mutex<Vec<Vec<u8>>>,
    last_remote: Mutex<Option<SocketAddr>>,
    close_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl Container {
    fn new(conn: Arc<dyn Conn + Send + Sync>) -> Arc<Self> {
        Arc::new(Container {
            conn,
            queue: Mutex::new(VecDeque::with_capacity(CONTAINER_QUEUE_SIZE)),
            pool: Mutex::new(Vec::with_capacity(BUFFER_POOL_SIZE)),
            last_remote: Mutex::new(None),
            close_tx: Mutex::new(None),
        })
    }

    fn take_buffer(&self) -> Vec<u8> {
        let mut pool = self.pool.lock();
        pool.pop().unwrap_or_else(|| vec![0u8; RECEIVE_MTU])
    }

    fn return_buffer(&self, mut buf: Vec<u8>) {
        buf.resize(RECEIVE_MTU, 0);
        let mut pool = self.pool.lock();
        if pool.len() < BUFFER_POOL_SIZE {
            pool.push(buf);
        }
    }

    fn start_reader(self: &Arc<Self>, notify: Arc<Notify>) {
        let (close_tx, mut close_rx) = mpsc::channel(1);
        {
            let mut tx = self.close_tx.lock();
            *tx = Some(close_tx);
        }

        let container = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let mut buf = container.take_buffer();
                tokio::select! {
                    _ = close_rx.recv() => return,
                    res = container.conn.recv_from(&mut buf) => match res {
                        Ok((n, addr)) => {
                            {
                                let mut queue = container.queue.lock();
                                if queue.len() >= CONTAINER_QUEUE_SIZE {
                                    log::trace!("container queue full, dropping oldest");
                                    queue.pop_front();
                                }
                                queue.push_back(TimedPacket {
                                    data: buf[..n].to_vec(),
                                    addr,
                                    received_at: Instant::now(),
                                });
                            }
                            container.return_buffer(buf);
                            notify.notify_waiters();
                        }
                        Err(err) => {
                            log::debug!("merging reader stopped: {err}");
                            return;
                        }
                    }
                }
            }
        });
    }

    async fn stop(&self) {
        {
            let mut tx = self.close_tx.lock();
            tx.take();
        }
        if let Err(err) = self.conn.close().await {
            log::debug!("closing merged underlying: {err}");
        }
    }
}

struct ActiveState {
    container: Arc<Container>,
    /// Pre-set send target from an explicit selection.
    initialized_remote: Option<SocketAddr>,
    /// True when chosen by `initialize_active` rather than recency.
    explicit: bool,
}

/// MergingConn concatenates several underlying datagram sockets (UDP, or TCP
/// with length framing) into one logical socket. Receives respect the
/// arrival-timestamp order across underlyings; sends go through the active
/// underlying.
pub struct MergingConn {
    containers: Mutex<Vec<Arc<Container>>>,
    active: Mutex<Option<ActiveState>>,
    acceptor: Mutex<Option<Arc<dyn PacketAcceptor + Send + Sync>>>,
    rejected: AtomicU64,
    notify: Arc<Notify>,
    closed: AtomicBool,
}

impl Default for MergingConn {
    fn default() -> Self {
        MergingConn::new()
    }
}

impl MergingConn {
    pub fn new() -> Self {
        MergingConn {
            containers: Mutex::new(Vec::new()),
            active: Mutex::new(None),
            acceptor: Mutex::new(None),
            rejected: AtomicU64::new(0),
            notify: Arc::new(Notify::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Installs the filter applied to every dequeued packet.
    pub fn set_acceptor(&self, acceptor: Arc<dyn PacketAcceptor + Send + Sync>) {
        let mut a = self.acceptor.lock();
        *a = Some(acceptor);
    }

    /// Number of packets the acceptor has rejected so far.
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Adds an underlying socket and starts reading from it.
    pub fn add(&self, conn: Arc<dyn Conn + Send + Sync>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ErrClosed);
        }

        let mut containers = self.containers.lock();
        if containers.iter().any(|c| Arc::ptr_eq(&c.conn, &conn)) {
            return Err(Error::ErrEndpointExists);
        }

        let container = Container::new(conn);
        container.start_reader(Arc::clone(&self.notify));
        containers.push(container);
        Ok(())
    }

    /// Removes an underlying socket, stopping its reader. Every index is
    /// removable, including the first.
    pub async fn remove(&self, conn: &Arc<dyn Conn + Send + Sync>) -> Result<()> {
        let removed = {
            let mut containers = self.containers.lock();
            match containers.iter().position(|c| Arc::ptr_eq(&c.conn, conn)) {
                Some(i) => containers.remove(i),
                None => return Err(Error::ErrEndpointNotFound),
            }
        };

        {
            let mut active = self.active.lock();
            if active
                .as_ref()
                .is_some_and(|a| Arc::ptr_eq(&a.container, &removed))
            {
                *active = None;
            }
        }

        removed.stop().await;
        self.notify.notify_waiters();
        Ok(())
    }

    /// Forces the active underlying and pre-sets the remote send target,
    /// typically at nomination time.
    pub fn initialize_active(
        &self,
        conn: &Arc<dyn Conn + Send + Sync>,
        remote: SocketAddr,
    ) -> Result<()> {
        let container = {
            let containers = self.containers.lock();
            containers
                .iter()
                .find(|c| Arc::ptr_eq(&c.conn, conn))
                .cloned()
                .ok_or(Error::ErrEndpointNotFound)?
        };

        let mut active = self.active.lock();
        *active = Some(ActiveState {
            container,
            initialized_remote: Some(remote),
            explicit: true,
        });
        Ok(())
    }

    /// Sends through the active underlying: to its connected peer if any,
    /// else to the last accepted remote, else to the initialized target.
    pub async fn send(&self, buf: &[u8]) -> Result<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ErrClosed);
        }

        let (container, target) = {
            let active = self.active.lock();
            let state = active.as_ref().ok_or(Error::ErrNoActiveEndpoint)?;
            let target = state
                .container
                .conn
                .remote_addr()
                .or_else(|| *state.container.last_remote.lock())
                .or(state.initialized_remote);
            (Arc::clone(&state.container), target)
        };

        match target {
            Some(target) => Ok(container.conn.send_to(buf, target).await?),
            None => Err(Error::ErrNoActiveEndpoint),
        }
    }

    /// Receives the globally oldest packet across all underlyings, waiting
    /// up to `timeout`. Close mid-wait yields `ErrClosed`; an exhausted wait
    /// yields `ErrTimeout`.
    pub async fn receive(&self, timeout: Option<Duration>) -> Result<Packet> {
        let deadline = timeout.map(|d| Instant::now() + d);

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.closed.load(Ordering::SeqCst) {
                return Err(Error::ErrClosed);
            }

            if let Some((container, packet)) = self.pop_oldest() {
                let packet = Packet::new(packet.data, packet.addr);
                let accepted = {
                    let acceptor = self.acceptor.lock();
                    acceptor.as_ref().map_or(true, |a| a.accept(&packet))
                };
                if !accepted {
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                    continue;
                }

                // Only now is the source trusted enough to steer sends.
                {
                    let mut last_remote = container.last_remote.lock();
                    *last_remote = Some(packet.addr);
                }
                {
                    let mut active = self.active.lock();
                    let pinned = active.as_ref().is_some_and(|a| a.explicit);
                    if !pinned {
                        *active = Some(ActiveState {
                            container: Arc::clone(&container),
                            initialized_remote: None,
                            explicit: false,
                        });
                    }
                }

                return Ok(packet);
            }

            // Bounded wait for the next arrival.
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::ErrTimeout);
                    }
                    deadline - now
                }
                None => Duration::from_millis(500),
            };
            let _ = tokio::time::timeout(wait, notified).await;
        }
    }

    /// Pops the head with the oldest reception timestamp across containers.
    fn pop_oldest(&self) -> Option<(Arc<Container>, TimedPacket)> {
        let containers = self.containers.lock();

        let mut best: Option<(usize, Instant)> = None;
        for (i, container) in containers.iter().enumerate() {
            let queue = container.queue.lock();
            if let Some(head) = queue.front() {
                if best.map_or(true, |(_, at)| head.received_at < at) {
                    best = Some((i, head.received_at));
                }
            }
        }

        let (i, _) = best?;
        let container = Arc::clone(&containers[i]);
        let packet = container.queue.lock().pop_front()?;
        Some((container, packet))
    }

    /// The underlying currently selected for outbound traffic, if any.
    pub fn active_conn(&self) -> Option<Arc<dyn Conn + Send + Sync>> {
        let active = self.active.lock();
        active.as_ref().map(|a| Arc::clone(&a.container.conn))
    }

    /// Local address of the active underlying, falling back to the first one
    /// added.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        if let Some(conn) = self.active_conn() {
            return Ok(conn.local_addr()?);
        }
        let containers = self.containers.lock();
        match containers.first() {
            Some(container) => Ok(container.conn.local_addr()?),
            None => Err(Error::ErrNoActiveEndpoint),
        }
    }

    /// Closes every underlying and wakes pending receives with `ErrClosed`.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let containers: Vec<Arc<Container>> = {
            let mut containers = self.containers.lock();
            containers.drain(..).collect()
        };
        for container in containers {
            container.stop().await;
        }

        {
            let mut active = self.active.lock();
            *active = None;
        }
        self.notify.notify_waiters();
    }
}
