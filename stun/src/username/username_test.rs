use super::*;

fn request() -> Message {
    let mut m = Message::new();
    m.set_type(BINDING_REQUEST);
    m.transaction_id = TransactionId::new();
    m.write_header();
    m
}

#[test]
fn test_username_round_trip() -> Result<()> {
    let mut m = request();
    Username::new("alice", "bob").add_to(&mut m)?;

    assert_eq!(m.get(ATTR_USERNAME)?, b"alice:bob");

    let got = Username::get_from(&m)?;
    assert_eq!(got.local, "alice");
    assert_eq!(got.remote, "bob");

    Ok(())
}

#[test]
fn test_username_without_separator_is_all_local() -> Result<()> {
    let mut m = request();
    m.add(ATTR_USERNAME, b"justme");

    let got = Username::get_from(&m)?;
    assert_eq!(got.local, "justme");
    assert_eq!(got.remote, "");
    assert_eq!(got.to_string(), "justme");

    Ok(())
}

#[test]
fn test_username_splits_at_first_separator_only() -> Result<()> {
    let mut m = request();
    m.add(ATTR_USERNAME, b"a:b:c");

    let got = Username::get_from(&m)?;
    assert_eq!(got.local, "a");
    assert_eq!(got.remote, "b:c");

    Ok(())
}

#[test]
fn test_username_length_cap() {
    let mut m = request();
    let long = "x".repeat(600);
    assert_eq!(
        Username::new(&long, "peer").add_to(&mut m),
        Err(Error::ErrAttributeSizeOverflow)
    );
}

#[test]
fn test_username_missing() {
    let m = request();
    assert_eq!(Username::get_from(&m), Err(Error::ErrAttributeNotFound));
}
