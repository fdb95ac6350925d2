use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use stun::integrity::MessageIntegrity;
use stun::message::*;
use stun::username::Username;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use util::conn::conn_pipe::{pipe, PipeConn};
use util::Conn;

use super::credentials::StaticCredentialsAuthority;
use super::*;
use crate::addr::Transport;

fn addr(port: u16) -> TransportAddress {
    TransportAddress::new(
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
        port,
        Transport::Udp,
    )
}

/// Drops the first `drop_first` outbound datagrams, then behaves normally.
struct LossyConn {
    inner: PipeConn,
    drop_first: usize,
    sent: AtomicUsize,
}

#[async_trait]
impl Conn for LossyConn {
    async fn connect(&self, a: SocketAddr) -> util::error::Result<()> {
        self.inner.connect(a).await
    }

    async fn recv(&self, buf: &mut [u8]) -> util::error::Result<usize> {
        self.inner.recv(buf).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> util::error::Result<(usize, SocketAddr)> {
        self.inner.recv_from(buf).await
    }

    async fn send(&self, buf: &[u8]) -> util::error::Result<usize> {
        if self.sent.fetch_add(1, Ordering::SeqCst) < self.drop_first {
            return Ok(buf.len());
        }
        self.inner.send(buf).await
    }

    async fn send_to(&self, buf: &[u8], _target: SocketAddr) -> util::error::Result<usize> {
        self.send(buf).await
    }

    fn local_addr(&self) -> util::error::Result<SocketAddr> {
        self.inner.local_addr()
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.remote_addr()
    }

    async fn close(&self) -> util::error::Result<()> {
        self.inner.close().await
    }
}

/// Answers binding requests with an authenticated success response.
struct AuthenticatedResponder {
    stack: Arc<StunStack>,
    key: Vec<u8>,
    invocations: AtomicUsize,
}

#[async_trait]
impl RequestListener for AuthenticatedResponder {
    async fn process_request(&self, event: &RequestEvent) -> Result<()> {
        self.invocations.fetch_add(1, Ordering::SeqCst);

        let mut response = Message::new();
        response.transaction_id = event.message.transaction_id;
        response.set_type(BINDING_SUCCESS);
        response.write_header();
        MessageIntegrity(self.key.clone()).add_to(&mut response)?;
        self.stack.send_response(&response).await
    }
}

struct WaitingCollector {
    tx: mpsc::UnboundedSender<ResponseEvent>,
}

#[async_trait]
impl ResponseCollector for WaitingCollector {
    async fn process_response(&self, event: ResponseEvent) {
        let _ = self.tx.send(event);
    }

    async fn process_timeout(&self, _event: TimeoutEvent) {}
}

fn authenticated_binding_request(key: &[u8]) -> Message {
    let mut request = Message::new();
    request.set_type(BINDING_REQUEST);
    request.transaction_id = TransactionId::new();
    request.write_header();
    Username::new("alice", "bob")
        .add_to(&mut request)
        .unwrap();
    MessageIntegrity(key.to_vec())
        .add_to(&mut request)
        .unwrap();
    request
}

#[tokio::test]
async fn test_authenticated_round_trip_between_two_stacks() {
    let (client_conn, server_conn) = pipe();
    let client_addr = addr(1);
    let server_addr = addr(2);
    let key = b"secret".to_vec();

    let server = StunStack::new(StackConfig::default().with_require_message_integrity(true));
    let authority = Arc::new(StaticCredentialsAuthority::new());
    authority.add_short_term("alice", "secret");
    server.set_credentials_authority(authority);
    server
        .add_socket(Arc::new(server_conn), server_addr, None)
        .unwrap();

    let responder = Arc::new(AuthenticatedResponder {
        stack: Arc::clone(&server),
        key: key.clone(),
        invocations: AtomicUsize::new(0),
    });
    server.add_request_listener(
        server_addr,
        Arc::clone(&responder) as Arc<dyn RequestListener + Send + Sync>,
    );

    let client = StunStack::new(StackConfig::default());
    client
        .add_socket(Arc::new(client_conn), client_addr, None)
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let request = authenticated_binding_request(&key);
    client
        .send_request(
            &request,
            server_addr,
            client_addr,
            Arc::new(WaitingCollector { tx }),
        )
        .await
        .unwrap();

    let response = timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.message.typ, BINDING_SUCCESS);
    assert_eq!(response.message.transaction_id, request.transaction_id);

    // Verify the server's integrity over the received response bytes.
    let mut verified = response.message.clone();
    MessageIntegrity(key).check(&mut verified).unwrap();

    assert_eq!(responder.invocations.load(Ordering::SeqCst), 1);
    assert_eq!(client.client_transaction_count(), 0);

    client.stop().await;
    server.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_blocking_sender_round_trip_and_timeout() {
    use super::blocking::BlockingRequestSender;

    let (client_conn, server_conn) = pipe();
    let client_addr = addr(1);
    let server_addr = addr(2);

    let server = StunStack::new(StackConfig::default());
    server
        .add_socket(Arc::new(server_conn), server_addr, None)
        .unwrap();
    let responder = Arc::new(AuthenticatedResponder {
        stack: Arc::clone(&server),
        key: b"k".to_vec(),
        invocations: AtomicUsize::new(0),
    });
    server.add_request_listener(
        server_addr,
        Arc::clone(&responder) as Arc<dyn RequestListener + Send + Sync>,
    );

    let client = StunStack::new(StackConfig::default());
    client
        .add_socket(Arc::new(client_conn), client_addr, None)
        .unwrap();
    let sender = BlockingRequestSender::new(Arc::clone(&client));

    let mut request = Message::new();
    request.set_type(BINDING_REQUEST);
    request.transaction_id = TransactionId::new();
    request.write_header();

    let response = sender
        .send_request_and_wait(&request, server_addr, client_addr)
        .await
        .unwrap();
    assert_eq!(response.message.transaction_id, request.transaction_id);

    // Against a dead peer the call resolves to a timeout after the schedule.
    server.stop().await;
    let mut lost = Message::new();
    lost.set_type(BINDING_REQUEST);
    lost.transaction_id = TransactionId::new();
    lost.write_header();

    let err = sender
        .send_request_and_wait(&lost, server_addr, client_addr)
        .await
        .unwrap_err();
    assert_eq!(err, Error::ErrTimeout);

    client.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_request_survives_early_loss_through_retransmission() {
    let (client_conn, server_conn) = pipe();
    let client_addr = addr(1);
    let server_addr = addr(2);

    let server = StunStack::new(StackConfig::default());
    server
        .add_socket(Arc::new(server_conn), server_addr, None)
        .unwrap();
    let responder = Arc::new(AuthenticatedResponder {
        stack: Arc::clone(&server),
        key: b"k".to_vec(),
        invocations: AtomicUsize::new(0),
    });
    server.add_request_listener(
        server_addr,
        Arc::clone(&responder) as Arc<dyn RequestListener + Send + Sync>,
    );

    let client = StunStack::new(StackConfig::default());
    // The original send and the first retransmission vanish on the wire.
    let lossy = LossyConn {
        inner: client_conn,
        drop_first: 2,
        sent: AtomicUsize::new(0),
    };
    client
        .add_socket(Arc::new(lossy), client_addr, None)
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut request = Message::new();
    request.set_type(BINDING_REQUEST);
    request.transaction_id = TransactionId::new();
    request.write_header();

    client
        .send_request(
            &request,
            server_addr,
            client_addr,
            Arc::new(WaitingCollector { tx }),
        )
        .await
        .unwrap();

    // The second retransmission (t=300ms) gets through and is answered.
    let response = timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.message.transaction_id, request.transaction_id);
    assert_eq!(responder.invocations.load(Ordering::SeqCst), 1);

    client.stop().await;
    server.stop().await;
}
