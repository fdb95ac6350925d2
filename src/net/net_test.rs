use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use util::conn::conn_pipe::pipe;
use util::Conn;

use super::*;

fn udp(port: u16) -> TransportAddress {
    TransportAddress::new(
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
        port,
        Transport::Udp,
    )
}

struct Recorder {
    tx: mpsc::UnboundedSender<RawMessage>,
}

#[async_trait]
impl RawMessageProcessor for Recorder {
    async fn process_message(&self, msg: RawMessage) {
        let _ = self.tx.send(msg);
    }
}

fn recorder() -> (Arc<Recorder>, mpsc::UnboundedReceiver<RawMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(Recorder { tx }), rx)
}

#[tokio::test]
async fn test_received_datagrams_reach_the_processor() {
    let (processor, mut rx) = recorder();
    let manager = NetAccessManager::new(
        Arc::downgrade(&processor) as Weak<dyn RawMessageProcessor + Send + Sync>
    );

    let (ca, cb) = pipe();
    let local = udp(3478);
    manager.add_socket(Arc::new(ca), local, None).unwrap();

    cb.send(b"hello stun").await.unwrap();

    let msg = timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg.bytes(), b"hello stun");
    // The local address is always the connector's own.
    assert_eq!(msg.local_address(), local);
    assert_eq!(msg.remote_address().transport, Transport::Udp);

    manager.stop().await;
}

#[tokio::test]
async fn test_add_socket_same_key_is_a_noop() {
    let (processor, _rx) = recorder();
    let manager = NetAccessManager::new(
        Arc::downgrade(&processor) as Weak<dyn RawMessageProcessor + Send + Sync>
    );

    let local = udp(3478);
    let (ca, _cb) = pipe();
    manager.add_socket(Arc::new(ca), local, None).unwrap();

    let (ca2, cb2) = pipe();
    manager.add_socket(Arc::new(ca2), local, None).unwrap();

    // The original connector still routes sends; the duplicate was dropped.
    manager.send(b"probe", local, udp(9000)).await.unwrap();
    let mut buf = vec![0u8; 64];
    assert!(
        timeout(Duration::from_millis(200), cb2.recv(&mut buf))
            .await
            .is_err(),
        "duplicate socket must not be wired up"
    );

    manager.stop().await;
}

#[tokio::test]
async fn test_send_prefers_exact_remote_then_wildcard() {
    let (processor, _rx) = recorder();
    let manager = NetAccessManager::new(
        Arc::downgrade(&processor) as Weak<dyn RawMessageProcessor + Send + Sync>
    );

    let local = udp(3478);
    let peer = udp(4000);

    let (wildcard, wildcard_peer) = pipe();
    manager.add_socket(Arc::new(wildcard), local, None).unwrap();

    let (connected, connected_peer) = pipe();
    manager
        .add_socket(Arc::new(connected), local, Some(peer))
        .unwrap();

    let mut buf = vec![0u8; 64];

    // Exact (local, remote) match wins.
    manager.send(b"exact", local, peer).await.unwrap();
    let n = timeout(Duration::from_secs(1), connected_peer.recv(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], b"exact");

    // An unknown remote falls back to the wildcard connector.
    manager.send(b"fallback", local, udp(5000)).await.unwrap();
    let n = timeout(Duration::from_secs(1), wildcard_peer.recv(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], b"fallback");

    manager.stop().await;
}

#[tokio::test]
async fn test_send_without_connector_is_no_route() {
    let (processor, _rx) = recorder();
    let manager = NetAccessManager::new(
        Arc::downgrade(&processor) as Weak<dyn RawMessageProcessor + Send + Sync>
    );

    assert_eq!(
        manager.send(b"x", udp(1), udp(2)).await,
        Err(Error::ErrNoRoute)
    );
}

#[tokio::test]
async fn test_remove_socket_stops_routing() {
    let (processor, _rx) = recorder();
    let manager = NetAccessManager::new(
        Arc::downgrade(&processor) as Weak<dyn RawMessageProcessor + Send + Sync>
    );

    let local = udp(3478);
    let (ca, _cb) = pipe();
    manager.add_socket(Arc::new(ca), local, None).unwrap();

    manager.remove_socket(local, None).await;
    assert_eq!(
        manager.send(b"x", local, udp(2)).await,
        Err(Error::ErrNoRoute)
    );
}

#[tokio::test]
async fn test_stop_is_total() {
    let (processor, mut rx) = recorder();
    let manager = NetAccessManager::new(
        Arc::downgrade(&processor) as Weak<dyn RawMessageProcessor + Send + Sync>
    );

    let local = udp(3478);
    let (ca, cb) = pipe();
    manager.add_socket(Arc::new(ca), local, None).unwrap();

    manager.stop().await;
    assert!(manager.is_stopped());

    // Nothing received after stop is processed.
    let _ = cb.send(b"late").await;
    assert!(timeout(Duration::from_millis(200), rx.recv()).await.is_err());

    assert_eq!(
        manager.send(b"x", local, udp(2)).await,
        Err(Error::ErrStackStopped)
    );
}
