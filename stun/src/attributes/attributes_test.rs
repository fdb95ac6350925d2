use super::*;
use crate::error::*;
use crate::message::*;

#[test]
fn test_attr_type_ranges() {
    assert!(ATTR_USERNAME.required());
    assert!(!ATTR_USERNAME.optional());
    assert!(ATTR_SOFTWARE.optional());
    assert!(!ATTR_SOFTWARE.required());
}

#[test]
fn test_attributes_get() {
    let m = {
        let mut m = Message::new();
        m.set_type(BINDING_REQUEST);
        m.transaction_id = TransactionId::new();
        m.write_header();
        m.add(ATTR_USERNAME, b"alice");
        m.add(ATTR_SOFTWARE, b"agent");
        m
    };

    let (a, found) = m.attributes.get(ATTR_SOFTWARE);
    assert!(found);
    assert_eq!(a.value, b"agent");
    assert_eq!(a.length, 5);

    let (_, found) = m.attributes.get(ATTR_NONCE);
    assert!(!found);
}

#[test]
fn test_raw_attribute_positions() -> Result<()> {
    let mut m = Message::new();
    m.set_type(BINDING_REQUEST);
    m.transaction_id = TransactionId::new();
    m.write_header();
    m.add(ATTR_USERNAME, b"ab"); // padded to 4
    m.add(ATTR_SOFTWARE, b"x");

    let mut decoded = Message::new();
    decoded.unmarshal_binary(&m.raw)?;

    let (first, _) = decoded.attributes.get(ATTR_USERNAME);
    let (second, _) = decoded.attributes.get(ATTR_SOFTWARE);
    assert_eq!(first.pos, MESSAGE_HEADER_SIZE);
    assert_eq!(
        second.pos,
        MESSAGE_HEADER_SIZE + ATTRIBUTE_HEADER_SIZE + 4 // padded USERNAME value
    );

    Ok(())
}

#[test]
fn test_nearest_padded_value_length() {
    assert_eq!(nearest_padded_value_length(0), 0);
    assert_eq!(nearest_padded_value_length(4), 4);
    assert_eq!(nearest_padded_value_length(5), 8);
    assert_eq!(nearest_padded_value_length(6), 8);
}
