
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::Notify;
use tokio::time::{timeout, Duration};

use crate::error::{Error, Result};
use crate::sync::Mutex;

/// Minimum effective receive-buffer hint. Platform hints below this are
/// raised so a briefly stalled reader does not shed packets immediately.
const MIN_SIZE_HINT: usize = 1024 * 1024;

/// How many writes may happen between two refreshes of the cached hint.
const HINT_REFRESH_INTERVAL: usize = 1000;

/// Default hard cap on the number of buffered packets.
pub const DEFAULT_LIMIT_COUNT: usize = 10_000;

/// Source of the platform receive-buffer size (`SO_RCVBUF`) for the socket
/// feeding a [`PacketBuffer`]. The returned value is treated as a hint: it is
/// clamped up to 1 MiB and doubled before use.
pub trait SizeHint {
    fn recv_buffer_size(&self) -> usize;
}

/// A single buffered datagram together with the remote address it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub data: Vec<u8>,
    pub addr: SocketAddr,
}

impl Packet {
    pub fn new(data: Vec<u8>, addr: SocketAddr) -> Self {
        Packet { data, addr }
    }
}

#[derive(Default)]
struct BufferInternal {
    queue: VecDeque<Packet>,
    bytes: usize,
    closed: bool,

    limit_count: usize,
    size_hint: usize,
    writes_since_refresh: usize,
}

impl BufferInternal {
    // Effective byte budget: most recent hint, floored and doubled.
    fn byte_budget(&self) -> usize {
        std::cmp::max(self.size_hint, MIN_SIZE_HINT) * 2
    }
}

/// PacketBuffer is a bounded FIFO of received datagrams.
///
/// Writers never block. The buffer enforces a hard count cap and sheds the
/// oldest packet whenever the byte total exceeds the cached receive-buffer
/// hint while more than one packet is queued. Readers block until a packet
/// arrives, the optional timeout fires, or the buffer is closed.
pub struct PacketBuffer {
    internal: Mutex<BufferInternal>,
    notify: Arc<Notify>,
    hint: Option<Arc<dyn SizeHint + Send + Sync>>,
}

impl Default for PacketBuffer {
    fn default() -> Self {
        PacketBuffer::new(DEFAULT_LIMIT_COUNT, None)
    }
}

impl PacketBuffer {
    pub fn new(limit_count: usize, hint: Option<Arc<dyn SizeHint + Send + Sync>>) -> Self {
        let size_hint = hint
            .as_ref()
            .map(|h| h.recv_buffer_size())
            .unwrap_or(MIN_SIZE_HINT);

        PacketBuffer {
            internal: Mutex::new(BufferInternal {
                queue: VecDeque::new(),
                bytes: 0,
                closed: false,
                limit_count,
                size_hint,
                writes_since_refresh: 0,
            }),
            notify: Arc::new(Notify::new()),
            hint,
        }
    }

    /// Appends a packet, returning `ErrBufferFull` when the count cap is hit.
    /// Byte-budget overflow sheds the oldest packet instead of failing.
    pub fn write(&self, packet: Packet) -> Result<()> {
        {
            let mut b = self.internal.lock();

            if b.closed {
                return Err(Error::ErrBufferClosed);
            }
            if b.limit_count > 0 && b.queue.len() >= b.limit_count {
                return Err(Error::ErrBufferFull);
            }

            b.writes_since_refresh += 1;
            if b.writes_since_refresh >= HINT_REFRESH_INTERVAL {
                b.writes_since_refresh = 0;
                if let Some(hint) = &self.hint {
                    b.size_hint = hint.recv_buffer_size();
                }
            }

            b.bytes += packet.data.len();
            b.queue.push_back(packet);

            while b.bytes > b.byte_budget() && b.queue.len() > 1 {
                if let Some(old) = b.queue.pop_front() {
                    b.bytes -= old.data.len();
                    log::trace!("packet buffer over byte budget, dropping oldest");
                }
            }
        }

        self.notify.notify_waiters();
        Ok(())
    }

    /// Removes and returns the oldest packet. Blocks until one is available,
    /// `duration` elapses (`ErrTimeout`), or the buffer is closed and drained
    /// (`ErrBufferClosed`).
    pub async fn read(&self, duration: Option<Duration>) -> Result<Packet> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before re-checking state so a write between the check
            // and the await cannot be missed.
            notified.as_mut().enable();

            {
                let mut b = self.internal.lock();
                if let Some(packet) = b.queue.pop_front() {
                    b.bytes -= packet.data.len();
                    return Ok(packet);
                }
                if b.closed {
                    return Err(Error::ErrBufferClosed);
                }
            }

            if let Some(d) = duration {
                if timeout(d, notified).await.is_err() {
                    return Err(Error::ErrTimeout);
                }
            } else {
                notified.await;
            }
        }
    }

    /// Non-blocking variant of [`read`](Self::read).
    pub fn try_read(&self) -> Option<Packet> {
        let mut b = self.internal.lock();
        let packet = b.queue.pop_front()?;
        b.bytes -= packet.data.len();
        Some(packet)
    }

    /// Removes and returns every buffered packet `f` accepts, preserving
    /// arrival order. Used when a late-created consumer claims its backlog.
    pub fn take_matching(&self, mut f: impl FnMut(&Packet) -> bool) -> Vec<Packet> {
        let mut b = self.internal.lock();
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(b.queue.len());
        while let Some(packet) = b.queue.pop_front() {
            if f(&packet) {
                b.bytes -= packet.data.len();
                taken.push(packet);
            } else {
                kept.push_back(packet);
            }
        }
        b.queue = kept;
        taken
    }

    /// Unblocks all readers and rejects future writes. Buffered packets are
    /// still drained by subsequent reads.
    pub fn close(&self) {
        {
            let mut b = self.internal.lock();
            if b.closed {
                return;
            }
            b.closed = true;
        }
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.internal.lock().closed
    }

    /// Number of buffered packets.
    pub fn count(&self) -> usize {
        self.internal.lock().queue.len()
    }

    /// Total byte size of buffered packets.
    pub fn size(&self) -> usize {
        self.internal.lock().bytes
    }
}
