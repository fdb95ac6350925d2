use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use super::framed::*;
use crate::error::Error;

async fn tcp_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).await.unwrap();
    let (server, _) = listener.accept().await.unwrap();
    (client, server)
}

#[tokio::test]
async fn test_write_frame_wire_layout() {
    let (client, mut server) = tcp_pair().await;
    let framed = FramedTcpConn::new(client).unwrap();

    let payload = b"abcde";
    framed.write_frame(payload).await.unwrap();

    let mut wire = vec![0u8; FRAME_HEADER_SIZE + payload.len()];
    server.read_exact(&mut wire).await.unwrap();
    assert_eq!(wire[0], 0x00);
    assert_eq!(wire[1], 0x05);
    assert_eq!(&wire[2..], payload);
}

#[tokio::test]
async fn test_read_frame_handles_partial_arrivals() {
    let (client, mut server) = tcp_pair().await;
    let framed = FramedTcpConn::new(client).unwrap();

    let reader = tokio::spawn(async move {
        let mut buf = vec![0u8; 64];
        let n = framed.read_frame(&mut buf).await?;
        Ok::<Vec<u8>, Error>(buf[..n].to_vec())
    });

    // The frame dribbles in: half the header, then the rest.
    server.write_all(&[0x00]).await.unwrap();
    tokio::time::sleep(tokio::time::Duration::from_millis(30)).await;
    server.write_all(&[0x04, b'p', b'i']).await.unwrap();
    tokio::time::sleep(tokio::time::Duration::from_millis(30)).await;
    server.write_all(&[b'n', b'g']).await.unwrap();

    let got = reader.await.unwrap().unwrap();
    assert_eq!(got, b"ping");
}

#[tokio::test]
async fn test_round_trip_both_directions() {
    let (client, server) = tcp_pair().await;
    let a = FramedTcpConn::new(client).unwrap();
    let b = FramedTcpConn::new(server).unwrap();

    a.write_frame(b"to b").await.unwrap();
    b.write_frame(b"to a").await.unwrap();

    let mut buf = vec![0u8; 64];
    let n = b.read_frame(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"to b");
    let n = a.read_frame(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"to a");
}

#[tokio::test]
async fn test_empty_payload_frame() {
    let (client, server) = tcp_pair().await;
    let a = FramedTcpConn::new(client).unwrap();
    let b = FramedTcpConn::new(server).unwrap();

    a.write_frame(b"").await.unwrap();
    let mut buf = vec![0u8; 64];
    let n = b.read_frame(&mut buf).await.unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_eof_before_length_is_hole_punch() {
    let (client, server) = tcp_pair().await;
    let framed = FramedTcpConn::new(client).unwrap();

    drop(server);

    let mut buf = vec![0u8; 64];
    assert_eq!(
        framed.read_frame(&mut buf).await.unwrap_err(),
        Error::ErrHolePunch
    );
}

#[tokio::test]
async fn test_eof_mid_frame_fails_receive() {
    let (client, mut server) = tcp_pair().await;
    let framed = FramedTcpConn::new(client).unwrap();

    // Announce 16 bytes, deliver 3, then hang up.
    server.write_all(&[0x00, 0x10, 1, 2, 3]).await.unwrap();
    drop(server);

    let mut buf = vec![0u8; 64];
    let err = framed.read_frame(&mut buf).await.unwrap_err();
    assert_ne!(err, Error::ErrHolePunch);
}

#[tokio::test]
async fn test_preread_bytes_are_replayed_first() {
    let (client, mut server) = tcp_pair().await;

    // Classification consumed the first three bytes of the frame.
    let framed = FramedTcpConn::with_preread(client, vec![0x00, 0x04, b'd']).unwrap();
    server.write_all(b"ata").await.unwrap();

    let mut buf = vec![0u8; 64];
    let n = framed.read_frame(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"data");
}
