use super::conn_pipe::pipe;
use super::*;

#[tokio::test]
async fn test_pipe_round_trip() -> Result<()> {
    let (ca, cb) = pipe();

    ca.send(b"ping").await?;

    let mut buf = vec![0u8; 1500];
    let (n, addr) = cb.recv_from(&mut buf).await?;
    assert_eq!(&buf[..n], b"ping");
    assert_eq!(addr, ca.local_addr()?);

    cb.send(b"pong").await?;
    let n = ca.recv(&mut buf).await?;
    assert_eq!(&buf[..n], b"pong");

    Ok(())
}

#[tokio::test]
async fn test_pipe_preserves_packet_boundaries() -> Result<()> {
    let (ca, cb) = pipe();

    ca.send(b"one").await?;
    ca.send(b"two").await?;

    let mut buf = vec![0u8; 1500];
    let n = cb.recv(&mut buf).await?;
    assert_eq!(&buf[..n], b"one");
    let n = cb.recv(&mut buf).await?;
    assert_eq!(&buf[..n], b"two");

    Ok(())
}
