use std::sync::Arc;

use async_trait::async_trait;
use stun::message::Message;
use tokio::sync::mpsc;

use super::events::{ResponseCollector, ResponseEvent, TimeoutEvent};
use super::StunStack;
use crate::addr::TransportAddress;
use crate::error::{Error, Result};

enum Outcome {
    Response(ResponseEvent),
    Timeout,
}

struct OneShotCollector {
    tx: mpsc::Sender<Outcome>,
}

#[async_trait]
impl ResponseCollector for OneShotCollector {
    async fn process_response(&self, event: ResponseEvent) {
        let _ = self.tx.send(Outcome::Response(event)).await;
    }

    async fn process_timeout(&self, _event: TimeoutEvent) {
        let _ = self.tx.send(Outcome::Timeout).await;
    }
}

/// BlockingRequestSender turns the callback-driven client transaction into a
/// plain awaitable call: send a request, get the response back, or
/// `ErrTimeout` after the full retransmission schedule.
pub struct BlockingRequestSender {
    stack: Arc<StunStack>,
}

impl BlockingRequestSender {
    pub fn new(stack: Arc<StunStack>) -> Self {
        BlockingRequestSender { stack }
    }

    /// Sends `request` and waits for its terminal event.
    pub async fn send_request_and_wait(
        &self,
        request: &Message,
        remote: TransportAddress,
        local: TransportAddress,
    ) -> Result<ResponseEvent> {
        let (tx, mut rx) = mpsc::channel(1);
        self.stack
            .send_request(request, remote, local, Arc::new(OneShotCollector { tx }))
            .await?;

        match rx.recv().await {
            Some(Outcome::Response(event)) => Ok(event),
            Some(Outcome::Timeout) => Err(Error::ErrTimeout),
            // The stack was stopped underneath us.
            None => Err(Error::ErrStackStopped),
        }
    }
}
