pub mod blocking;
pub mod credentials;
pub mod events;

#[cfg(test)]
mod e2e_test;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use stun::attributes::*;
use stun::error_code::*;
use stun::integrity::MessageIntegrity;
use stun::message::*;
use stun::username::Username;
use tokio::time::Duration;
use util::sync::Mutex;
use util::Conn;

use crate::addr::TransportAddress;
use crate::config::StackConfig;
use crate::error::{Error, Result};
use crate::net::{NetAccessManager, RawMessage, RawMessageProcessor};
use crate::transaction::client::{ClientTransactionTable, StunClientTransaction};
use crate::transaction::server::{ServerTransactionTable, StunServerTransaction};
use self::credentials::CredentialsAuthority;
use self::events::*;

type RequestListeners = Vec<Arc<dyn RequestListener + Send + Sync>>;
type IndicationListeners = Vec<Arc<dyn IndicationListener + Send + Sync>>;

/// Outcome of request validation that must be reported to the peer.
enum Rejection {
    BadRequest(String),
    Unauthorized,
    UnknownAttributes(Vec<AttrType>),
    ServerError,
}

impl Rejection {
    fn code(&self) -> ErrorCode {
        match self {
            Rejection::BadRequest(_) => CODE_BAD_REQUEST,
            Rejection::Unauthorized => CODE_UNAUTHORIZED,
            Rejection::UnknownAttributes(_) => CODE_UNKNOWN_ATTRIBUTE,
            Rejection::ServerError => CODE_SERVER_ERROR,
        }
    }
}

/// StunStack ties the substrate together: it owns the sockets through the
/// net access manager, runs both transaction tables, verifies message
/// authenticity and routes decoded messages to per-address collectors.
pub struct StunStack {
    config: StackConfig,
    net: Arc<NetAccessManager>,
    client_transactions: Arc<ClientTransactionTable>,
    server_transactions: Arc<ServerTransactionTable>,

    credentials: Mutex<Option<Arc<dyn CredentialsAuthority + Send + Sync>>>,

    request_listeners: Mutex<HashMap<TransportAddress, RequestListeners>>,
    global_request_listeners: Mutex<RequestListeners>,
    indication_listeners: Mutex<HashMap<TransportAddress, IndicationListeners>>,
    old_indication_listeners: Mutex<HashMap<TransportAddress, IndicationListeners>>,

    stopped: AtomicBool,
}

impl StunStack {
    pub fn new(config: StackConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<StunStack>| {
            let net = NetAccessManager::new(
                weak.clone() as Weak<dyn RawMessageProcessor + Send + Sync>
            );
            StunStack {
                config,
                net,
                client_transactions: Arc::new(ClientTransactionTable::new()),
                server_transactions: Arc::new(ServerTransactionTable::new()),
                credentials: Mutex::new(None),
                request_listeners: Mutex::new(HashMap::new()),
                global_request_listeners: Mutex::new(Vec::new()),
                indication_listeners: Mutex::new(HashMap::new()),
                old_indication_listeners: Mutex::new(HashMap::new()),
                stopped: AtomicBool::new(false),
            }
        })
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    /// Hands a socket to the stack. Datagrams it receives start flowing
    /// through decode, validation and dispatch.
    pub fn add_socket(
        &self,
        conn: Arc<dyn Conn + Send + Sync>,
        local: TransportAddress,
        remote: Option<TransportAddress>,
    ) -> Result<()> {
        self.net.add_socket(conn, local, remote)
    }

    pub async fn remove_socket(
        &self,
        local: TransportAddress,
        remote: Option<TransportAddress>,
    ) {
        self.net.remove_socket(local, remote).await;
    }

    pub fn set_credentials_authority(
        &self,
        authority: Arc<dyn CredentialsAuthority + Send + Sync>,
    ) {
        let mut credentials = self.credentials.lock();
        *credentials = Some(authority);
    }

    pub fn add_request_listener(
        &self,
        local: TransportAddress,
        listener: Arc<dyn RequestListener + Send + Sync>,
    ) {
        let mut listeners = self.request_listeners.lock();
        listeners.entry(local).or_default().push(listener);
    }

    /// Registers a listener invoked for validated requests on every local
    /// address.
    pub fn add_global_request_listener(&self, listener: Arc<dyn RequestListener + Send + Sync>) {
        let mut listeners = self.global_request_listeners.lock();
        listeners.push(listener);
    }

    pub fn add_indication_listener(
        &self,
        local: TransportAddress,
        listener: Arc<dyn IndicationListener + Send + Sync>,
    ) {
        let mut listeners = self.indication_listeners.lock();
        listeners.entry(local).or_default().push(listener);
    }

    /// Registers a listener for indications carried in legacy RFC 3489
    /// messages; those are dispatched separately from new-style indications.
    pub fn add_old_indication_listener(
        &self,
        local: TransportAddress,
        listener: Arc<dyn IndicationListener + Send + Sync>,
    ) {
        let mut listeners = self.old_indication_listeners.lock();
        listeners.entry(local).or_default().push(listener);
    }

    /// Sends a request and registers a client transaction for it. The
    /// collector sees exactly one of `process_response` / `process_timeout`
    /// unless the transaction is cancelled first.
    pub async fn send_request(
        &self,
        request: &Message,
        remote: TransportAddress,
        local: TransportAddress,
        collector: Arc<dyn ResponseCollector + Send + Sync>,
    ) -> Result<TransactionId> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::ErrStackStopped);
        }

        let id = request.transaction_id;
        let tr = Arc::new(StunClientTransaction::new(
            id,
            request.raw.clone(),
            local,
            remote,
            collector,
        ));
        self.client_transactions.insert(Arc::clone(&tr));

        if let Err(err) = self.net.send(&request.raw, local, remote).await {
            self.client_transactions.remove(&id);
            return Err(err);
        }

        if local.transport.is_reliable() {
            // The transport retransmits for us; arm only the timeout, sized
            // to the full datagram schedule.
            tr.start_timer(
                Arc::clone(&self.net),
                Arc::clone(&self.client_transactions),
                self.total_transaction_timeout(),
                self.config.max_ctran_retrans_timer,
                0,
            );
        } else {
            tr.start_timer(
                Arc::clone(&self.net),
                Arc::clone(&self.client_transactions),
                self.config.first_ctran_retrans_after,
                self.config.max_ctran_retrans_timer,
                self.config.max_ctran_retransmissions,
            );
        }

        Ok(id)
    }

    /// Cancels a client transaction: no retransmission, response or timeout
    /// callback will run once this returns.
    pub fn cancel_transaction(&self, id: &TransactionId) {
        if let Some(tr) = self.client_transactions.remove(id) {
            tr.cancel();
        }
    }

    /// Sends a response through the server transaction matching its id.
    /// Fails with `ErrTransactionDoesNotExist` after expiry or removal and
    /// with `ErrTransactionAlreadyAnswered` on a second attempt.
    pub async fn send_response(&self, response: &Message) -> Result<()> {
        let tr = self
            .server_transactions
            .get(&response.transaction_id)
            .ok_or(Error::ErrTransactionDoesNotExist)?;

        let local = tr.local_address();
        let remote = tr.remote_address();
        tr.store_response(response.raw.clone(), local, remote)?;
        self.net.send(&response.raw, local, remote).await
    }

    /// Sends an indication; no transaction state is kept.
    pub async fn send_indication(
        &self,
        indication: &Message,
        remote: TransportAddress,
        local: TransportAddress,
    ) -> Result<()> {
        self.net.send(&indication.raw, local, remote).await
    }

    pub fn client_transaction_count(&self) -> usize {
        self.client_transactions.len()
    }

    pub fn server_transaction_count(&self) -> usize {
        self.server_transactions.len()
    }

    /// Total stop: no callback fires after this returns.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.net.stop().await;
        self.client_transactions.cancel_all();
        self.server_transactions.clear();
    }

    /// The wall-clock span of the full default schedule: every doubling
    /// retransmission wait plus the final cap interval.
    fn total_transaction_timeout(&self) -> Duration {
        let mut total = Duration::from_millis(0);
        let mut interval = self.config.first_ctran_retrans_after;
        for _ in 0..self.config.max_ctran_retransmissions {
            total += interval;
            interval = std::cmp::min(interval * 2, self.config.max_ctran_retrans_timer);
        }
        total + self.config.max_ctran_retrans_timer
    }

    async fn handle_request(&self, mut msg: Message, raw: &RawMessage) {
        let id = msg.transaction_id;
        let local = raw.local_address();
        let remote = raw.remote_address();

        let (tr, created) = self
            .server_transactions
            .get_or_insert(id, local, remote);
        if !created {
            if tr.is_answered() {
                log::debug!("retransmitted request {id}, re-emitting stored response");
                if let Err(err) = tr.retransmit_response(&self.net).await {
                    log::warn!("failed to retransmit response for {id}: {err}");
                }
                if !self.config.propagate_received_retransmissions {
                    return;
                }
            } else {
                // Same id, first response still pending; drop the duplicate.
                log::trace!("request {id} already in progress, dropping duplicate");
                return;
            }
        }

        if let Err(rejection) = self.validate_request(&mut msg) {
            if let Err(err) = self.reject(&tr, &msg, rejection).await {
                log::warn!("failed to send error response for {id}: {err}");
            }
            return;
        }

        let event = RequestEvent {
            message: msg.clone(),
            local_address: local,
            remote_address: remote,
        };

        let listeners: RequestListeners = {
            let by_addr = self.request_listeners.lock();
            let global = self.global_request_listeners.lock();
            by_addr
                .get(&local)
                .into_iter()
                .flatten()
                .chain(global.iter())
                .cloned()
                .collect()
        };

        let mut failed = false;
        for listener in listeners {
            if let Err(err) = listener.process_request(&event).await {
                log::warn!("request listener failed for {id}: {err}");
                failed = true;
            }
        }

        if failed && !tr.is_answered() {
            if let Err(err) = self.reject(&tr, &msg, Rejection::ServerError).await {
                log::warn!("failed to send 500 for {id}: {err}");
            }
        }
    }

    async fn handle_response(&self, msg: Message, raw: &RawMessage) {
        let id = msg.transaction_id;

        let tr = if self.config.keep_ctrans_after_a_response {
            self.client_transactions.get(&id)
        } else {
            self.client_transactions.remove(&id)
        };

        match tr {
            None => {
                // Phantom response.
                log::trace!("no client transaction for response {id}, dropping");
            }
            Some(tr) => {
                tr.stop_timer();
                tr.collector()
                    .process_response(ResponseEvent {
                        message: msg,
                        local_address: raw.local_address(),
                        remote_address: raw.remote_address(),
                    })
                    .await;
            }
        }
    }

    async fn handle_indication(&self, msg: Message, raw: &RawMessage) {
        let local = raw.local_address();
        let registry = if msg.transaction_id.is_legacy() {
            &self.old_indication_listeners
        } else {
            &self.indication_listeners
        };

        let listeners: IndicationListeners = {
            let by_addr = registry.lock();
            match by_addr.get(&local) {
                Some(listeners) => listeners.clone(),
                None => return,
            }
        };

        let event = IndicationEvent {
            message: msg,
            local_address: local,
            remote_address: raw.remote_address(),
        };
        for listener in listeners {
            listener.process_indication(&event).await;
        }
    }

    /// The validation chain for incoming requests.
    fn validate_request(&self, msg: &mut Message) -> std::result::Result<(), Rejection> {
        let authority = {
            let credentials = self.credentials.lock();
            credentials.clone()
        };

        let username = Username::get_from(msg).ok();

        if let (Some(username), Some(authority)) = (&username, &authority) {
            if !authority.has_username(&username.local) {
                return Err(Rejection::Unauthorized);
            }
        }

        if msg.contains(ATTR_MESSAGE_INTEGRITY) {
            let username = match &username {
                Some(username) => username,
                None => {
                    return Err(Rejection::BadRequest(
                        "MESSAGE-INTEGRITY present without USERNAME".to_owned(),
                    ))
                }
            };

            if let Some(authority) = &authority {
                let key = match authority.key_for(&username.local) {
                    Some(key) => key,
                    None => return Err(Rejection::Unauthorized),
                };
                if MessageIntegrity(key).check(msg).is_err() {
                    return Err(Rejection::Unauthorized);
                }
            }
        } else if self.config.require_message_integrity {
            return Err(Rejection::Unauthorized);
        }

        let unknown: Vec<AttrType> = msg
            .attributes
            .0
            .iter()
            .map(|a| a.typ)
            .filter(|t| t.required() && !is_known_attribute(*t))
            .collect();
        if !unknown.is_empty() {
            return Err(Rejection::UnknownAttributes(unknown));
        }

        Ok(())
    }

    /// Builds and sends the STUN error response for a failed request. The
    /// response is stored on the server transaction so retransmitted requests
    /// re-emit the same bytes.
    async fn reject(
        &self,
        tr: &Arc<StunServerTransaction>,
        request: &Message,
        rejection: Rejection,
    ) -> Result<()> {
        let mut response = Message::new();
        response.transaction_id = request.transaction_id;
        response.set_type(MessageType::new(request.typ.method, CLASS_ERROR_RESPONSE));
        response.write_header();

        match &rejection {
            Rejection::BadRequest(reason) => {
                ErrorCodeAttribute {
                    code: CODE_BAD_REQUEST,
                    reason: reason.clone().into_bytes(),
                }
                .add_to(&mut response)?;
            }
            Rejection::UnknownAttributes(types) => {
                rejection.code().add_to(&mut response)?;
                UnknownAttrs(types.clone()).add_to(&mut response)?;
            }
            _ => {
                rejection.code().add_to(&mut response)?;
            }
        }

        if let Some(software) = &self.config.software {
            Software(software.clone()).add_to(&mut response)?;
        }

        let local = tr.local_address();
        let remote = tr.remote_address();
        tr.store_response(response.raw.clone(), local, remote)?;
        self.net.send(&response.raw, local, remote).await
    }
}

/// Attribute types this stack understands; everything else in the
/// comprehension-required range draws a 420.
fn is_known_attribute(t: AttrType) -> bool {
    matches!(
        t,
        ATTR_MAPPED_ADDRESS
            | ATTR_USERNAME
            | ATTR_MESSAGE_INTEGRITY
            | ATTR_ERROR_CODE
            | ATTR_UNKNOWN_ATTRIBUTES
            | ATTR_REALM
            | ATTR_NONCE
            | ATTR_XORMAPPED_ADDRESS
    )
}

#[async_trait]
impl RawMessageProcessor for StunStack {
    async fn process_message(&self, raw: RawMessage) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }

        let mut msg = Message::new();
        if let Err(err) = msg.unmarshal_binary(raw.bytes()) {
            log::debug!(
                "dropping undecodable packet from {}: {err}",
                raw.remote_address()
            );
            return;
        }

        if msg.typ.is_request() {
            self.handle_request(msg, &raw).await;
        } else if msg.typ.is_response() {
            self.handle_response(msg, &raw).await;
        } else if msg.typ.is_indication() {
            self.handle_indication(msg, &raw).await;
        }
    }
}
