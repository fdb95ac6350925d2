pub mod guarded;
pub mod match_fn;

#[cfg(test)]
mod mux_test;

use std::sync::{Arc, Weak};

use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Duration;
use util::buffer::{Packet, PacketBuffer};
use util::sync::Mutex;
use util::Conn;

use crate::error::{Error, Result};
use self::guarded::GuardedConn;

/// PacketFilter decides whether a view takes a received datagram. Equality
/// between filters is identity: opening two views with the same `Arc` yields
/// the same view, while two filters with identical logic stay distinct.
pub trait PacketFilter: Send + Sync {
    fn matches(&self, packet: &Packet) -> bool;
}

/// A filter wrapping one of the [`match_fn`] classifiers (or any function of
/// the packet payload).
pub struct FnPacketFilter(pub match_fn::MatchFunc);

impl PacketFilter for FnPacketFilter {
    fn matches(&self, packet: &Packet) -> bool {
        (self.0)(&packet.data)
    }
}

struct MuxState {
    views: Vec<Arc<MuxView>>,
    closed: bool,
}

/// MuxConn splits one physical datagram endpoint into logical pseudo-sockets
/// chosen by content filters. The physical socket is owned here; views hold
/// a non-owning reference bounded by this socket's lifetime.
pub struct MuxConn {
    conn: GuardedConn,
    persistent: bool,
    state: Mutex<MuxState>,
    buffer: PacketBuffer,
    recv_guard: AsyncMutex<()>,
}

impl MuxConn {
    /// Wraps `conn`. A persistent mux stays open when its last view closes.
    pub fn new(conn: Arc<dyn Conn + Send + Sync>, persistent: bool) -> Arc<Self> {
        Arc::new(MuxConn {
            conn: GuardedConn::new(conn),
            persistent,
            state: Mutex::new(MuxState {
                views: Vec::new(),
                closed: false,
            }),
            buffer: PacketBuffer::default(),
            recv_guard: AsyncMutex::new(()),
        })
    }

    /// Opens (or returns the existing) view for `filter`. A late-opened view
    /// claims the matching backlog from the parent's receive queue.
    pub fn open_view(
        self: &Arc<Self>,
        filter: Arc<dyn PacketFilter + Send + Sync>,
    ) -> Result<Arc<MuxView>> {
        let view = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::ErrClosed);
            }
            if let Some(existing) = state
                .views
                .iter()
                .find(|v| Arc::ptr_eq(&v.filter, &filter))
            {
                return Ok(Arc::clone(existing));
            }

            let view = Arc::new(MuxView {
                filter,
                buffer: PacketBuffer::default(),
                parent: Arc::downgrade(self),
            });
            state.views.push(Arc::clone(&view));
            view
        };

        // Pull previously buffered datagrams the new filter accepts.
        for packet in self.buffer.take_matching(|p| view.filter.matches(p)) {
            if let Err(err) = view.buffer.write(packet) {
                log::warn!("dropping backlog packet for new view: {err}");
            }
        }

        Ok(view)
    }

    /// Receives a datagram that no view claimed.
    pub async fn receive(self: &Arc<Self>, timeout: Option<Duration>) -> Result<Packet> {
        self.receive_into(&self.buffer, timeout).await
    }

    pub async fn send_to(&self, buf: &[u8], target: std::net::SocketAddr) -> Result<usize> {
        self.conn.send_to(buf, target).await
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        self.conn.local_addr()
    }

    /// Closes the physical socket and every view.
    pub async fn close(&self) {
        let views = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            std::mem::take(&mut state.views)
        };

        for view in views {
            view.buffer.close();
        }
        self.buffer.close();
        self.conn.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn detach(&self, view: &MuxView) -> bool {
        let mut state = self.state.lock();
        state
            .views
            .retain(|v| !std::ptr::eq(Arc::as_ptr(v), view as *const MuxView));
        state.views.is_empty() && !state.closed
    }

    /// The shared receive path: exactly one caller performs the physical
    /// read; everyone else waits on its own buffer and is woken when the
    /// reader deposits a packet there.
    async fn receive_into(
        self: &Arc<Self>,
        buffer: &PacketBuffer,
        timeout: Option<Duration>,
    ) -> Result<Packet> {
        let work = async {
            loop {
                if let Some(packet) = buffer.try_read() {
                    return Ok(packet);
                }

                tokio::select! {
                    res = buffer.read(None) => {
                        return res.map_err(|err| match err {
                            util::Error::ErrBufferClosed => Error::ErrClosed,
                            other => other.into(),
                        });
                    }
                    guard = self.recv_guard.lock() => {
                        // Another packet may have landed while waiting for
                        // the guard.
                        if let Some(packet) = buffer.try_read() {
                            return Ok(packet);
                        }
                        let res = self.physical_receive().await;
                        drop(guard);
                        res?;
                    }
                }
            }
        };

        match timeout {
            Some(d) => tokio::time::timeout(d, work)
                .await
                .map_err(|_| Error::ErrTimeout)?,
            None => work.await,
        }
    }

    /// One physical read plus fanout: every accepting view gets its own copy
    /// of the datagram; with no acceptor it lands on the mux's own queue.
    async fn physical_receive(&self) -> Result<()> {
        let mut buf = vec![0u8; crate::net::connector::RECEIVE_MTU];
        let (n, addr) = self.conn.recv_from(&mut buf).await?;
        let packet = Packet::new(buf[..n].to_vec(), addr);

        let views: Vec<Arc<MuxView>> = {
            let state = self.state.lock();
            state.views.clone()
        };

        let mut claimed = false;
        for view in &views {
            if view.filter.matches(&packet) {
                claimed = true;
                if let Err(err) = view.buffer.write(packet.clone()) {
                    log::warn!("view buffer rejected packet: {err}");
                }
            }
        }

        if !claimed {
            if let Err(err) = self.buffer.write(packet) {
                log::warn!("receive queue rejected packet: {err}");
            }
        }

        Ok(())
    }
}

/// MuxView is the logical pseudo-socket for one filter. It receives exactly
/// the datagrams its filter accepts and sends through the parent socket. The
/// reference to the parent is non-owning; a view outliving its mux only sees
/// `ErrClosed`.
pub struct MuxView {
    filter: Arc<dyn PacketFilter + Send + Sync>,
    buffer: PacketBuffer,
    parent: Weak<MuxConn>,
}

impl MuxView {
    fn parent(&self) -> Result<Arc<MuxConn>> {
        self.parent.upgrade().ok_or(Error::ErrClosed)
    }

    pub async fn receive(&self, timeout: Option<Duration>) -> Result<Packet> {
        self.parent()?.receive_into(&self.buffer, timeout).await
    }

    pub async fn send_to(&self, buf: &[u8], target: std::net::SocketAddr) -> Result<usize> {
        self.parent()?.send_to(buf, target).await
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        self.parent()?.local_addr()
    }

    /// Detaches the view. Closing the last view of a non-persistent mux
    /// closes the physical socket too.
    pub async fn close(&self) {
        self.buffer.close();
        if let Some(parent) = self.parent.upgrade() {
            let last = parent.detach(self);
            if last && !parent.persistent {
                parent.close().await;
            }
        }
    }
}
