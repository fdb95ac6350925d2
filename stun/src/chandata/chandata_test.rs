use super::*;

#[test]
fn test_chandata_encode_udp_unpadded() -> Result<()> {
    let cd = ChannelData::new(0x4000, b"hello".to_vec());
    let raw = cd.encode(false)?;

    assert_eq!(raw.len(), CHANNEL_DATA_HEADER_SIZE + 5);
    assert_eq!(&raw[..2], &[0x40, 0x00]);
    assert_eq!(&raw[2..4], &[0x00, 0x05]);
    assert_eq!(&raw[4..], b"hello");

    Ok(())
}

#[test]
fn test_chandata_encode_stream_padded() -> Result<()> {
    let cd = ChannelData::new(0x4001, b"hello".to_vec());
    let raw = cd.encode(true)?;

    // length field counts the payload, the frame is padded to 4
    assert_eq!(raw.len(), CHANNEL_DATA_HEADER_SIZE + 8);
    assert_eq!(&raw[2..4], &[0x00, 0x05]);
    assert_eq!(&raw[9..], &[0, 0, 0]);

    Ok(())
}

#[test]
fn test_chandata_decode_round_trip() -> Result<()> {
    let cd = ChannelData::new(0x4abc, b"payload".to_vec());

    for stream in [false, true] {
        let raw = cd.encode(stream)?;
        let got = ChannelData::decode(&raw)?;
        assert_eq!(got, cd);
    }

    Ok(())
}

#[test]
fn test_chandata_rejects_bad_channel_number() {
    let cd = ChannelData::new(0x1000, vec![]);
    assert_eq!(cd.encode(false), Err(Error::ErrInvalidChannelNumber));
}

#[test]
fn test_chandata_decode_truncated() {
    assert_eq!(
        ChannelData::decode(&[0x40, 0x00, 0x00, 0x10, 1, 2]),
        Err(Error::ErrBadChannelDataLength)
    );
}

#[test]
fn test_is_channel_data() {
    assert!(is_channel_data(&[0x40, 0x00, 0x00, 0x00]));
    assert!(!is_channel_data(&[0x00, 0x01, 0x00, 0x00])); // STUN request
    assert!(!is_channel_data(&[0x80, 0x00, 0x00, 0x00])); // RTP/RTCP range
    assert!(!is_channel_data(&[0x40]));
}

#[test]
fn test_ssltcp_handshake_shape() {
    // First byte marks an SSLv2-style record, second pair is the pseudo
    // client-hello version the classifiers key on.
    assert_eq!(SSLTCP_CLIENT_HANDSHAKE.len(), 72);
    assert_eq!(SSLTCP_CLIENT_HANDSHAKE[0], 0x80);
    assert_eq!(SSLTCP_CLIENT_HANDSHAKE[2], 0x01);
    assert_eq!(SSLTCP_CLIENT_HANDSHAKE[3], 0x03);
}
