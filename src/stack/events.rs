use async_trait::async_trait;
use stun::message::{Message, TransactionId};

use crate::addr::TransportAddress;
use crate::error::Result;

/// A validated request delivered to request listeners.
#[derive(Debug, Clone)]
pub struct RequestEvent {
    pub message: Message,
    pub local_address: TransportAddress,
    pub remote_address: TransportAddress,
}

impl RequestEvent {
    pub fn transaction_id(&self) -> TransactionId {
        self.message.transaction_id
    }
}

/// An indication delivered to indication listeners.
#[derive(Debug, Clone)]
pub struct IndicationEvent {
    pub message: Message,
    pub local_address: TransportAddress,
    pub remote_address: TransportAddress,
}

/// A response delivered to the collector of the matching client transaction.
#[derive(Debug, Clone)]
pub struct ResponseEvent {
    pub message: Message,
    pub local_address: TransportAddress,
    pub remote_address: TransportAddress,
}

impl ResponseEvent {
    pub fn transaction_id(&self) -> TransactionId {
        self.message.transaction_id
    }
}

/// Delivered once when a client transaction exhausts its retransmissions.
#[derive(Debug, Clone)]
pub struct TimeoutEvent {
    pub transaction_id: TransactionId,
    pub local_address: TransportAddress,
    pub remote_address: TransportAddress,
}

/// RequestListener handles validated incoming requests. Returning an error
/// makes the stack answer with a 500 Server Error; it never kills the
/// dispatch pool.
#[async_trait]
pub trait RequestListener {
    async fn process_request(&self, event: &RequestEvent) -> Result<()>;
}

/// IndicationListener handles incoming indications for one local address.
#[async_trait]
pub trait IndicationListener {
    async fn process_indication(&self, event: &IndicationEvent);
}

/// ResponseCollector receives the terminal event of a client transaction:
/// exactly one of `process_response` or `process_timeout`, unless the
/// transaction was cancelled first, in which case neither fires.
#[async_trait]
pub trait ResponseCollector {
    async fn process_response(&self, event: ResponseEvent);
    async fn process_timeout(&self, event: TimeoutEvent);
}
