
use std::fmt;

use md5::{Digest, Md5};
use ring::hmac;

use crate::attributes::*;
use crate::checks::*;
use crate::error::*;
use crate::message::*;

// separator for credentials.
pub(crate) const CREDENTIALS_SEP: &str = ":";

pub(crate) const MESSAGE_INTEGRITY_SIZE: usize = 20;

fn new_hmac(key: &[u8], message: &[u8]) -> Vec<u8> {
    let mac = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, key);
    hmac::sign(&mac, message).as_ref().to_vec()
}

// MessageIntegrity represents MESSAGE-INTEGRITY attribute: an HMAC-SHA1 over
// the message bytes preceding the attribute, with the header length field
// adjusted to include the attribute itself.
//
// RFC 5389 Section 15.4
#[derive(Default, Clone)]
pub struct MessageIntegrity(pub Vec<u8>);

impl fmt::Display for MessageIntegrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KEY: 0x{:x?}", self.0)
    }
}

impl Setter for MessageIntegrity {
    // add_to adds MESSAGE-INTEGRITY attribute to message.
    fn add_to(&self, m: &mut Message) -> Result<()> {
        for a in &m.attributes.0 {
            // FINGERPRINT must not precede MESSAGE-INTEGRITY.
            if a.typ == ATTR_FINGERPRINT {
                return Err(Error::ErrFingerprintBeforeIntegrity);
            }
        }
        // The HMAC input is the message up to and including the attribute
        // preceding MESSAGE-INTEGRITY, with the length field already
        // covering the integrity TLV.
        let length = m.length;
        m.length += (MESSAGE_INTEGRITY_SIZE + ATTRIBUTE_HEADER_SIZE) as u32;
        m.write_length();
        let v = new_hmac(&self.0, &m.raw);
        m.length = length;

        m.add(ATTR_MESSAGE_INTEGRITY, &v);

        Ok(())
    }
}

impl MessageIntegrity {
    // new_long_term_integrity returns a key for long-term credentials.
    // Password, username, and realm must be SASL-prepared.
    pub fn new_long_term_integrity(username: String, realm: String, password: String) -> Self {
        let s = [username, realm, password].join(CREDENTIALS_SEP);

        let mut h = Md5::new();
        h.update(s.as_bytes());

        MessageIntegrity(h.finalize().as_slice().to_vec())
    }

    // new_short_term_integrity returns a key for short-term credentials.
    // Password must be SASL-prepared.
    pub fn new_short_term_integrity(password: String) -> Self {
        MessageIntegrity(password.as_bytes().to_vec())
    }

    // check verifies MESSAGE-INTEGRITY. The HMAC is recomputed over the
    // reconstructed prefix [0, attribute position) of the raw bytes with the
    // length field rewritten to end at the integrity TLV, so attributes
    // appended after it (e.g. FINGERPRINT) are excluded.
    pub fn check(&self, m: &mut Message) -> Result<()> {
        let (attr, found) = m.attributes.get(ATTR_MESSAGE_INTEGRITY);
        if !found {
            return Err(Error::ErrAttributeNotFound);
        }

        let prefix_len = attr.pos;
        let adjusted_len =
            prefix_len - MESSAGE_HEADER_SIZE + ATTRIBUTE_HEADER_SIZE + MESSAGE_INTEGRITY_SIZE;

        let mut prefix = m.raw[..prefix_len].to_vec();
        prefix[2..4].copy_from_slice(&(adjusted_len as u16).to_be_bytes());

        let expected = new_hmac(&self.0, &prefix);
        check_hmac(&attr.value, &expected)
    }
}
