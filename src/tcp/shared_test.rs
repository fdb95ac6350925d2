use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

use super::shared::*;
use crate::mux::match_fn::{match_http, match_tls};

async fn listener(abandon: Duration) -> std::sync::Arc<SharedTcpListener> {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    SharedTcpListener::bind(addr, true, abandon).await.unwrap()
}

fn tls_client_hello() -> Vec<u8> {
    let mut hello = vec![0u8; 16];
    hello[0] = 0x16; // handshake record
    hello[1] = 3;
    hello[2] = 1;
    hello[5] = 1; // ClientHello
    hello[9] = 3;
    hello[10] = 3;
    hello
}

#[tokio::test]
async fn test_routing_by_startup_bytes() {
    let shared = listener(DEFAULT_ABANDON_TIMEOUT).await;
    let http_endpoint = shared.register(Box::new(match_http));
    let tls_endpoint = shared.register(Box::new(match_tls));
    let addr = shared.local_addr();

    // A TLS ClientHello goes to the TLS endpoint.
    let mut tls_client = TcpStream::connect(addr).await.unwrap();
    tls_client.write_all(&tls_client_hello()).await.unwrap();

    let routed = timeout(Duration::from_secs(2), tls_endpoint.accept())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(routed.preread[0], 0x16);
    assert_eq!(routed.peer_addr, tls_client.local_addr().unwrap());

    // An HTTP request line goes to the HTTP endpoint.
    let mut http_client = TcpStream::connect(addr).await.unwrap();
    http_client
        .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
        .await
        .unwrap();

    let routed = timeout(Duration::from_secs(2), http_endpoint.accept())
        .await
        .unwrap()
        .unwrap();
    assert!(routed.preread.starts_with(b"GET "));

    shared.close();
}

#[tokio::test]
async fn test_first_matching_endpoint_wins() {
    let shared = listener(DEFAULT_ABANDON_TIMEOUT).await;
    let first = shared.register(Box::new(|b: &[u8]| !b.is_empty()));
    let second = shared.register(Box::new(|b: &[u8]| !b.is_empty()));
    let addr = shared.local_addr();

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"anything").await.unwrap();

    assert!(timeout(Duration::from_secs(2), first.accept())
        .await
        .is_ok());
    assert!(timeout(Duration::from_millis(200), second.accept())
        .await
        .is_err());

    shared.close();
}

#[tokio::test]
async fn test_unclassifiable_connection_is_closed_after_timeout() {
    // Shortened abandonment window to keep the test quick.
    let shared = listener(Duration::from_millis(200)).await;
    let _endpoint = shared.register(Box::new(match_tls));
    let addr = shared.local_addr();

    let mut client = TcpStream::connect(addr).await.unwrap();
    // One byte that classifies as nothing, then silence.
    client.write_all(&[0xaa]).await.unwrap();

    // The listener closes the connection: the client observes EOF.
    let mut buf = [0u8; 8];
    let n = timeout(Duration::from_secs(2), client.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);

    shared.close();
}

#[tokio::test]
async fn test_routed_stream_continues_after_preread() {
    let shared = listener(DEFAULT_ABANDON_TIMEOUT).await;
    let endpoint = shared.register(Box::new(match_http));
    let addr = shared.local_addr();

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"PUT /x HTTP/1.1\r\n").await.unwrap();

    let mut routed = timeout(Duration::from_secs(2), endpoint.accept())
        .await
        .unwrap()
        .unwrap();

    // Bytes sent after classification flow on the routed stream itself.
    client.write_all(b"Body").await.unwrap();
    let mut buf = [0u8; 4];
    routed.stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"Body");

    shared.close();
}
