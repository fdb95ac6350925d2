use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use stun::message::TransactionId;
use tokio::sync::mpsc;
use tokio::time::Duration;
use util::sync::Mutex;

use crate::addr::TransportAddress;
use crate::net::NetAccessManager;
use crate::stack::events::{ResponseCollector, TimeoutEvent};

/// StunClientTransaction is a retransmitting sender for one STUN request.
/// It lives in the stack index from `send_request` until a response arrives,
/// the schedule is exhausted, or it is cancelled.
pub(crate) struct StunClientTransaction {
    id: TransactionId,
    raw: Vec<u8>,
    local_address: TransportAddress,
    remote_address: TransportAddress,
    collector: Arc<dyn ResponseCollector + Send + Sync>,
    cancelled: AtomicBool,
    timer_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl StunClientTransaction {
    pub(crate) fn new(
        id: TransactionId,
        raw: Vec<u8>,
        local_address: TransportAddress,
        remote_address: TransportAddress,
        collector: Arc<dyn ResponseCollector + Send + Sync>,
    ) -> Self {
        StunClientTransaction {
            id,
            raw,
            local_address,
            remote_address,
            collector,
            cancelled: AtomicBool::new(false),
            timer_tx: Mutex::new(None),
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

    pub(crate) fn collector(&self) -> Arc<dyn ResponseCollector + Send + Sync> {
        Arc::clone(&self.collector)
    }

    /// Starts the retransmission timer: the wait doubles from `first` up to
    /// `cap`; after `max_retrans` retransmissions one more `cap` interval
    /// passes before the timeout callback fires.
    pub(crate) fn start_timer(
        self: &Arc<Self>,
        net: Arc<NetAccessManager>,
        table: Arc<ClientTransactionTable>,
        first: Duration,
        cap: Duration,
        max_retrans: u32,
    ) {
        let (timer_tx, mut timer_rx) = mpsc::channel(1);
        {
            let mut tx = self.timer_tx.lock();
            *tx = Some(timer_tx);
        }

        let tr = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = first;
            let mut n_rtx: u32 = 0;

            loop {
                let timer = tokio::time::sleep(interval);
                tokio::pin!(timer);

                tokio::select! {
                    _ = timer.as_mut() => {}
                    _ = timer_rx.recv() => return,
                }

                if tr.cancelled.load(Ordering::SeqCst) {
                    return;
                }

                if n_rtx >= max_retrans {
                    // The final cap interval elapsed with no response.
                    if table.remove(&tr.id).is_some() && !tr.cancelled.load(Ordering::SeqCst) {
                        tr.collector
                            .process_timeout(TimeoutEvent {
                                transaction_id: tr.id,
                                local_address: tr.local_address,
                                remote_address: tr.remote_address,
                            })
                            .await;
                    }
                    return;
                }

                n_rtx += 1;
                log::trace!(
                    "retransmitting {} to {} (n_rtx={n_rtx})",
                    tr.id,
                    tr.remote_address
                );
                if let Err(err) = net.send(&tr.raw, tr.local_address, tr.remote_address).await {
                    // The request may still go out on a later attempt.
                    log::warn!("retransmission of {} failed: {err}", tr.id);
                }

                interval = std::cmp::min(interval * 2, cap);
            }
        });
    }

    /// Suppresses retransmissions and any future collector callback. Does not
    /// wake the collector.
    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let mut tx = self.timer_tx.lock();
        tx.take();
    }

    /// Stops the timer without marking the transaction cancelled, used when a
    /// response arrived.
    pub(crate) fn stop_timer(&self) {
        let mut tx = self.timer_tx.lock();
        tx.take();
    }
}

/// ClientTransactionTable indexes in-flight client transactions by id.
#[derive(Default)]
pub(crate) struct ClientTransactionTable {
    map: Mutex<HashMap<TransactionId, Arc<StunClientTransaction>>>,
}

impl ClientTransactionTable {
    pub(crate) fn new() -> Self {
        ClientTransactionTable::default()
    }

    pub(crate) fn insert(&self, tr: Arc<StunClientTransaction>) {
        let mut map = self.map.lock();
        map.insert(tr.id(), tr);
    }

    pub(crate) fn get(&self, id: &TransactionId) -> Option<Arc<StunClientTransaction>> {
        let map = self.map.lock();
        map.get(id).cloned()
    }

    pub(crate) fn remove(&self, id: &TransactionId) -> Option<Arc<StunClientTransaction>> {
        let mut map = self.map.lock();
        map.remove(id)
    }

    pub(crate) fn contains(&self, id: &TransactionId) -> bool {
        let map = self.map.lock();
        map.contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        let map = self.map.lock();
        map.len()
    }

    /// Cancels everything, used on stack stop.
    pub(crate) fn cancel_all(&self) {
        let trs: Vec<Arc<StunClientTransaction>> = {
            let mut map = self.map.lock();
            map.drain().map(|(_, tr)| tr).collect()
        };
        for tr in trs {
            tr.cancel();
        }
    }
}
