use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use stun::message::TransactionId;
use tokio::time::{Duration, Instant};
use util::sync::Mutex;

use crate::addr::TransportAddress;
use crate::error::{Error, Result};
use crate::net::NetAccessManager;

/// How long a server transaction stays reachable after its first request.
pub(crate) const SERVER_TRANSACTION_LIFETIME: Duration = Duration::from_secs(16);

struct StoredResponse {
    raw: Vec<u8>,
    local_address: TransportAddress,
    remote_address: TransportAddress,
}

/// StunServerTransaction exists from the first receipt of a request with a
/// new id until expiry or removal. It remembers the first response emitted by
/// the application so retransmitted requests are answered with byte-identical
/// bytes instead of re-invoking handlers.
pub(crate) struct StunServerTransaction {
    id: TransactionId,
    local_address: TransportAddress,
    remote_address: TransportAddress,
    started: Instant,
    response: Mutex<Option<StoredResponse>>,
}

impl StunServerTransaction {
    pub(crate) fn new(
        id: TransactionId,
        local_address: TransportAddress,
        remote_address: TransportAddress,
    ) -> Self {
        StunServerTransaction {
            id,
            local_address,
            remote_address,
            started: Instant::now(),
            response: Mutex::new(None),
        }
    }

    pub(crate) fn id(&self) -> TransactionId {
        self.id
    }

    pub(crate) fn local_address(&self) -> TransportAddress {
        self.local_address
    }

    pub(crate) fn remote_address(&self) -> TransportAddress {
        self.remote_address
    }

    pub(crate) fn is_expired(&self) -> bool {
        self.started.elapsed() > SERVER_TRANSACTION_LIFETIME
    }

    pub(crate) fn is_answered(&self) -> bool {
        self.response.lock().is_some()
    }

    /// Records the first response. A second attempt fails with
    /// `ErrTransactionAlreadyAnswered` and leaves the stored bytes untouched.
    pub(crate) fn store_response(
        &self,
        raw: Vec<u8>,
        local_address: TransportAddress,
        remote_address: TransportAddress,
    ) -> Result<()> {
        let mut response = self.response.lock();
        if response.is_some() {
            return Err(Error::ErrTransactionAlreadyAnswered);
        }
        *response = Some(StoredResponse {
            raw,
            local_address,
            remote_address,
        });
        Ok(())
    }

    /// Re-sends the stored response, if any. The bytes on the wire are always
    /// the ones originally emitted.
    pub(crate) async fn retransmit_response(&self, net: &NetAccessManager) -> Result<()> {
        let (raw, local, remote) = {
            let response = self.response.lock();
            match response.as_ref() {
                Some(r) => (r.raw.clone(), r.local_address, r.remote_address),
                None => return Ok(()),
            }
        };
        net.send(&raw, local, remote).await
    }
}

/// ServerTransactionTable indexes live server transactions by id. Expiry is
/// enforced lazily at lookup and by a sweeper whose cadence equals the
/// transaction lifetime; the sweeper self-cancels when the table drains and
/// is rescheduled by the next insertion.
#[derive(Default)]
pub(crate) struct ServerTransactionTable {
    map: Mutex<HashMap<TransactionId, Arc<StunServerTransaction>>>,
    sweeper_running: AtomicBool,
}

impl ServerTransactionTable {
    pub(crate) fn new() -> Self {
        ServerTransactionTable::default()
    }

    pub(crate) fn insert(self: &Arc<Self>, tr: Arc<StunServerTransaction>) {
        {
            let mut map = self.map.lock();
            map.insert(tr.id(), tr);
        }
        if !self.sweeper_running.swap(true, Ordering::SeqCst) {
            ServerTransactionTable::start_sweeper(Arc::downgrade(self));
        }
    }

    /// Atomically returns the live transaction for `id` or creates one. The
    /// boolean reports whether a new transaction was created.
    pub(crate) fn get_or_insert(
        self: &Arc<Self>,
        id: TransactionId,
        local_address: TransportAddress,
        remote_address: TransportAddress,
    ) -> (Arc<StunServerTransaction>, bool) {
        let (tr, created) = {
            let mut map = self.map.lock();
            let live = map.get(&id).filter(|tr| !tr.is_expired()).cloned();
            match live {
                Some(tr) => (tr, false),
                None => {
                    let tr = Arc::new(StunServerTransaction::new(id, local_address, remote_address));
                    map.insert(id, Arc::clone(&tr));
                    (tr, true)
                }
            }
        };
        if created && !self.sweeper_running.swap(true, Ordering::SeqCst) {
            ServerTransactionTable::start_sweeper(Arc::downgrade(self));
        }
        (tr, created)
    }

    /// Looks up a live transaction, removing it if it expired.
    pub(crate) fn get(&self, id: &TransactionId) -> Option<Arc<StunServerTransaction>> {
        let mut map = self.map.lock();
        let tr = map.get(id).cloned()?;
        if tr.is_expired() {
            map.remove(id);
            return None;
        }
        Some(tr)
    }

    pub(crate) fn remove(&self, id: &TransactionId) -> Option<Arc<StunServerTransaction>> {
        let mut map = self.map.lock();
        map.remove(id)
    }

    pub(crate) fn len(&self) -> usize {
        let map = self.map.lock();
        map.len()
    }

    pub(crate) fn clear(&self) {
        let mut map = self.map.lock();
        map.clear();
    }

    fn start_sweeper(table: Weak<ServerTransactionTable>) {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(SERVER_TRANSACTION_LIFETIME).await;

                let table = match table.upgrade() {
                    Some(table) => table,
                    None => return,
                };

                let mut map = table.map.lock();
                map.retain(|_, tr| !tr.is_expired());
                if map.is_empty() {
                    // Self-cancel; the next insertion reschedules us.
                    table.sweeper_running.store(false, Ordering::SeqCst);
                    return;
                }
            }
        });
    }
}
