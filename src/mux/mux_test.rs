use std::sync::Arc;

use tokio::time::{timeout, Duration};
use util::conn::conn_pipe::pipe;
use util::Conn;

use super::match_fn::*;
use super::*;

fn first_byte_filter(value: u8) -> Arc<dyn PacketFilter + Send + Sync> {
    Arc::new(FnPacketFilter(Box::new(move |b: &[u8]| {
        !b.is_empty() && b[0] == value
    })))
}

#[tokio::test]
async fn test_fanout_with_cloning() {
    let (ca, cb) = pipe();
    let mux = MuxConn::new(Arc::new(ca), false);

    // Two distinct filters with identical logic: both views take a copy.
    let view_a = mux.open_view(first_byte_filter(0x00)).unwrap();
    let view_b = mux.open_view(first_byte_filter(0x00)).unwrap();

    cb.send(&[0x00, 1, 2, 3]).await.unwrap();

    let pa = view_a.receive(Some(Duration::from_secs(2))).await.unwrap();
    let pb = view_b.receive(Some(Duration::from_secs(2))).await.unwrap();
    assert_eq!(pa.data, vec![0x00, 1, 2, 3]);
    assert_eq!(pa.data, pb.data);

    // The parent queue saw nothing.
    assert_eq!(
        mux.receive(Some(Duration::from_millis(100))).await,
        Err(Error::ErrTimeout)
    );

    mux.close().await;
}

#[tokio::test]
async fn test_unclaimed_datagram_goes_to_parent() {
    let (ca, cb) = pipe();
    let mux = MuxConn::new(Arc::new(ca), false);
    let view = mux.open_view(first_byte_filter(0x7f)).unwrap();

    cb.send(&[0x01, 9]).await.unwrap();

    let packet = mux.receive(Some(Duration::from_secs(2))).await.unwrap();
    assert_eq!(packet.data, vec![0x01, 9]);

    assert_eq!(
        view.receive(Some(Duration::from_millis(100))).await,
        Err(Error::ErrTimeout)
    );

    mux.close().await;
}

#[tokio::test]
async fn test_open_view_is_idempotent_by_filter_identity() {
    let (ca, _cb) = pipe();
    let mux = MuxConn::new(Arc::new(ca), false);

    let filter = first_byte_filter(0x2a);
    let first = mux.open_view(Arc::clone(&filter)).unwrap();
    let second = mux.open_view(filter).unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    // An equal-but-distinct filter yields a distinct view.
    let third = mux.open_view(first_byte_filter(0x2a)).unwrap();
    assert!(!Arc::ptr_eq(&first, &third));

    mux.close().await;
}

#[tokio::test]
async fn test_late_view_pulls_backlog_from_parent() {
    let (ca, cb) = pipe();
    let mux = MuxConn::new(Arc::new(ca), false);

    // A view whose filter never matches keeps the physical read running;
    // unclaimed datagrams accumulate on the parent's own queue.
    let pump = mux.open_view(first_byte_filter(0x7f)).unwrap();
    let waiter = tokio::spawn(async move { pump.receive(None).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    cb.send(&[0x55, 1]).await.unwrap();
    cb.send(&[0x55, 2]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The late view claims the buffered backlog in arrival order.
    let view = mux.open_view(first_byte_filter(0x55)).unwrap();
    let p1 = view.receive(Some(Duration::from_secs(2))).await.unwrap();
    let p2 = view.receive(Some(Duration::from_secs(2))).await.unwrap();
    assert_eq!(p1.data, vec![0x55, 1]);
    assert_eq!(p2.data, vec![0x55, 2]);

    mux.close().await;
    let res = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    assert_eq!(res, Err(Error::ErrClosed));
}

#[tokio::test]
async fn test_close_wakes_receivers() {
    let (ca, _cb) = pipe();
    let mux = MuxConn::new(Arc::new(ca), false);
    let view = mux.open_view(first_byte_filter(0x00)).unwrap();

    let waiter = tokio::spawn(async move { view.receive(None).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    mux.close().await;

    let res = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    assert_eq!(res, Err(Error::ErrClosed));
}

#[tokio::test]
async fn test_closing_last_view_closes_non_persistent_mux() {
    let (ca, _cb) = pipe();
    let mux = MuxConn::new(Arc::new(ca), false);
    let view = mux.open_view(first_byte_filter(0x00)).unwrap();

    view.close().await;
    assert!(mux.is_closed());
}

#[tokio::test]
async fn test_persistent_mux_survives_last_view() {
    let (ca, _cb) = pipe();
    let mux = MuxConn::new(Arc::new(ca), true);
    let view = mux.open_view(first_byte_filter(0x00)).unwrap();

    view.close().await;
    assert!(!mux.is_closed());

    mux.close().await;
    assert!(mux.is_closed());
}

#[tokio::test]
async fn test_stun_and_dtls_views_split_traffic() {
    let (ca, cb) = pipe();
    let mux = MuxConn::new(Arc::new(ca), false);

    let stun_view = mux
        .open_view(Arc::new(FnPacketFilter(Box::new(match_stun))))
        .unwrap();
    let dtls_view = mux
        .open_view(Arc::new(FnPacketFilter(Box::new(match_dtls))))
        .unwrap();

    let mut m = stun::message::Message::new();
    m.set_type(stun::message::BINDING_REQUEST);
    m.transaction_id = stun::message::TransactionId::new();
    m.write_header();

    cb.send(&m.raw).await.unwrap();
    cb.send(&[22, 3, 1, 0, 0]).await.unwrap(); // DTLS handshake record

    let stun_packet = stun_view
        .receive(Some(Duration::from_secs(2)))
        .await
        .unwrap();
    assert_eq!(stun_packet.data, m.raw);

    let dtls_packet = dtls_view
        .receive(Some(Duration::from_secs(2)))
        .await
        .unwrap();
    assert_eq!(dtls_packet.data[0], 22);

    mux.close().await;
}
