
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

use crate::attributes::*;
use crate::error::*;

// MAGIC_COOKIE is the fixed value that aids in distinguishing RFC 5389 STUN
// packets from packets of other protocols (and from RFC 3489 messages, whose
// header carries transaction-id bytes in its place).
//
// Defined in "STUN Message Structure", section 6.
pub const MAGIC_COOKIE: u32 = 0x2112A442;
pub const ATTRIBUTE_HEADER_SIZE: usize = 4;
pub const MESSAGE_HEADER_SIZE: usize = 20;

// TRANSACTION_ID_SIZE is the RFC 5389 transaction id length (in bytes).
pub const TRANSACTION_ID_SIZE: usize = 12; // 96 bit
// LEGACY_TRANSACTION_ID_SIZE is the RFC 3489 length: the magic-cookie field
// is part of the id.
pub const LEGACY_TRANSACTION_ID_SIZE: usize = 16; // 128 bit

// Interfaces that are implemented by message attributes, shorthands for them,
// or helpers for message fields as type or transaction id.
pub trait Setter {
    // Setter sets *Message attribute.
    fn add_to(&self, m: &mut Message) -> Result<()>;
}

// Getter parses attribute from *Message.
pub trait Getter {
    fn get_from(&mut self, m: &Message) -> Result<()>;
}

// Checker checks *Message attribute.
pub trait Checker {
    fn check(&self, m: &Message) -> Result<()>;
}

// is_message returns true if b looks like a STUN message (either RFC).
// Useful for multiplexing. is_message does not guarantee that decoding
// will be successful.
pub fn is_message(b: &[u8]) -> bool {
    if b.len() < MESSAGE_HEADER_SIZE || b[0] & 0xc0 != 0 {
        return false;
    }
    if u32::from_be_bytes([b[4], b[5], b[6], b[7]]) == MAGIC_COOKIE {
        return true;
    }
    // RFC 3489 has no cookie; fall back to a length check.
    let size = u16::from_be_bytes([b[2], b[3]]) as usize;
    b.len() == MESSAGE_HEADER_SIZE + size
}

static TRANSACTION_COUNTER: AtomicU64 = AtomicU64::new(0);

fn transaction_millis() -> u64 {
    let base = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    // Monotonic even if the wall clock steps backwards.
    let prev = TRANSACTION_COUNTER.fetch_max(base, Ordering::Relaxed);
    prev.max(base)
}

/// TransactionId is the opaque id correlating a request with its response:
/// 12 bytes for RFC 5389, 16 for RFC 3489. The random half leads and the
/// millisecond-counter half trails so that equality comparisons between ids
/// minted in the same instant diverge on the first bytes inspected.
#[derive(PartialEq, Eq, Hash, Copy, Clone)]
pub struct TransactionId {
    bytes: [u8; LEGACY_TRANSACTION_ID_SIZE],
    len: u8,
}

impl Default for TransactionId {
    fn default() -> Self {
        TransactionId {
            bytes: [0u8; LEGACY_TRANSACTION_ID_SIZE],
            len: TRANSACTION_ID_SIZE as u8,
        }
    }
}

impl TransactionId {
    /// Returns a new RFC 5389 transaction id: 48 random bits followed by the
    /// low 48 bits of the millisecond counter.
    pub fn new() -> Self {
        let mut id = TransactionId::default();
        rand::thread_rng().fill(&mut id.bytes[..6]);
        let millis = transaction_millis().to_be_bytes();
        id.bytes[6..12].copy_from_slice(&millis[2..8]);
        id
    }

    /// Returns a new RFC 3489 transaction id: 64 random bits followed by the
    /// 64-bit millisecond counter.
    pub fn new_legacy() -> Self {
        let mut id = TransactionId {
            bytes: [0u8; LEGACY_TRANSACTION_ID_SIZE],
            len: LEGACY_TRANSACTION_ID_SIZE as u8,
        };
        rand::thread_rng().fill(&mut id.bytes[..8]);
        id.bytes[8..16].copy_from_slice(&transaction_millis().to_be_bytes());
        id
    }

    pub fn from_slice(b: &[u8]) -> Result<Self> {
        match b.len() {
            TRANSACTION_ID_SIZE | LEGACY_TRANSACTION_ID_SIZE => {
                let mut id = TransactionId {
                    bytes: [0u8; LEGACY_TRANSACTION_ID_SIZE],
                    len: b.len() as u8,
                };
                id.bytes[..b.len()].copy_from_slice(b);
                Ok(id)
            }
            _ => Err(Error::ErrAttributeSizeInvalid),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// True for the 16-byte RFC 3489 form.
    pub fn is_legacy(&self) -> bool {
        self.len as usize == LEGACY_TRANSACTION_ID_SIZE
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", base64::encode(self.as_bytes()))
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", base64::encode(self.as_bytes()))
    }
}

impl Setter for TransactionId {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.transaction_id = *self;
        m.write_transaction_id();
        Ok(())
    }
}

const DEFAULT_RAW_CAPACITY: usize = 120;

/// Message represents a single STUN packet. It uses aggressive internal
/// buffering to enable zero-allocation encoding and decoding, so there are
/// some usage constraints: Message, its fields and results of m.get are
/// valid only until m.raw is not modified.
#[derive(Default, Debug, Clone)]
pub struct Message {
    pub typ: MessageType,
    pub length: u32, // len(raw) not including header
    pub transaction_id: TransactionId,
    pub attributes: Attributes,
    pub raw: Vec<u8>,
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} l={} attrs={} id={}",
            self.typ,
            self.length,
            self.attributes.0.len(),
            self.transaction_id
        )
    }
}

// Equal returns true if Message b equals to m. Ignores m.raw.
impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.typ == other.typ
            && self.transaction_id == other.transaction_id
            && self.length == other.length
            && self.attributes == other.attributes
    }
}

impl Setter for Message {
    // add_to sets b's transaction id to m's.
    //
    // Implements Setter to aid in crafting responses.
    fn add_to(&self, b: &mut Message) -> Result<()> {
        b.transaction_id = self.transaction_id;
        b.write_transaction_id();
        Ok(())
    }
}

impl Message {
    // new returns *Message with pre-allocated raw.
    pub fn new() -> Self {
        Message {
            raw: {
                let mut raw = Vec::with_capacity(DEFAULT_RAW_CAPACITY);
                raw.extend_from_slice(&[0; MESSAGE_HEADER_SIZE]);
                raw
            },
            ..Default::default()
        }
    }

    // marshal_binary returns a copy of the wire form.
    pub fn marshal_binary(&self) -> Vec<u8> {
        self.raw.clone()
    }

    // unmarshal_binary copies data in and decodes it.
    pub fn unmarshal_binary(&mut self, data: &[u8]) -> Result<()> {
        self.raw.clear();
        self.raw.extend_from_slice(data);
        self.decode()
    }

    // new_transaction_id sets m.transaction_id to a fresh random value.
    pub fn new_transaction_id(&mut self) {
        self.transaction_id = TransactionId::new();
        self.write_transaction_id();
    }

    // reset resets Message, attributes and underlying buffer length.
    pub fn reset(&mut self) {
        self.raw.clear();
        self.length = 0;
        self.attributes.0.clear();
    }

    // grow ensures that internal buffer has n length.
    fn grow(&mut self, n: usize, resize: bool) {
        if self.raw.len() >= n {
            if resize {
                self.raw.resize(n, 0);
            }
            return;
        }
        self.raw.extend_from_slice(&vec![0; n - self.raw.len()]);
    }

    // add appends a new attribute to the message.
    //
    // The value is copied into the internal buffer, so it is safe to reuse v.
    pub fn add(&mut self, t: AttrType, v: &[u8]) {
        let alloc_size = ATTRIBUTE_HEADER_SIZE + v.len();
        let first = MESSAGE_HEADER_SIZE + self.length as usize; // offset of the new TLV
        let mut last = first + alloc_size;
        self.grow(last, true);
        self.length += alloc_size as u32;

        let buf = &mut self.raw[first..last];
        buf[0..2].copy_from_slice(&t.value().to_be_bytes()); // T
        buf[2..4].copy_from_slice(&(v.len() as u16).to_be_bytes()); // L
        buf[ATTRIBUTE_HEADER_SIZE..].copy_from_slice(v); // V

        let attr = RawAttribute {
            typ: t,
            length: v.len() as u16,
            value: v.to_vec(),
            pos: first,
        };

        if attr.length as usize % PADDING != 0 {
            let bytes_to_add = nearest_padded_value_length(v.len()) - v.len();
            last += bytes_to_add;
            self.grow(last, true);
            // zero the padding so stale buffer bytes cannot leak
            for b in &mut self.raw[last - bytes_to_add..last] {
                *b = 0;
            }
            self.length += bytes_to_add as u32;
        }
        self.attributes.0.push(attr);
        self.write_length();
    }

    // write_length writes m.length to m.raw.
    pub fn write_length(&mut self) {
        self.grow(4, false);
        self.raw[2..4].copy_from_slice(&(self.length as u16).to_be_bytes());
    }

    // write_header writes the header to the underlying buffer. For RFC 5389
    // ids the magic cookie occupies bytes 4..8; a legacy 16-byte id covers
    // the cookie field entirely.
    pub fn write_header(&mut self) {
        self.grow(MESSAGE_HEADER_SIZE, false);

        self.write_type();
        self.write_length();
        if !self.transaction_id.is_legacy() {
            self.raw[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
        }
        self.write_transaction_id();
    }

    // write_transaction_id writes m.transaction_id to m.raw.
    pub fn write_transaction_id(&mut self) {
        let id = self.transaction_id.as_bytes();
        let start = MESSAGE_HEADER_SIZE - id.len();
        self.raw[start..MESSAGE_HEADER_SIZE].copy_from_slice(id);
    }

    // write_attributes encodes all m.attributes to m.raw.
    pub fn write_attributes(&mut self) {
        let attributes: Vec<RawAttribute> = self.attributes.0.drain(..).collect();
        for a in &attributes {
            self.add(a.typ, &a.value);
        }
    }

    // write_type writes m.typ to m.raw.
    pub fn write_type(&mut self) {
        self.grow(2, false);
        self.raw[..2].copy_from_slice(&self.typ.value().to_be_bytes());
    }

    // set_type sets m.typ and writes it to m.raw.
    pub fn set_type(&mut self, t: MessageType) {
        self.typ = t;
        self.write_type();
    }

    // encode re-encodes message into m.raw.
    pub fn encode(&mut self) {
        self.raw.clear();
        self.length = 0;
        self.write_header();
        self.write_attributes();
    }

    // decode decodes m.raw into m.
    pub fn decode(&mut self) -> Result<()> {
        let buf = &self.raw;
        if buf.len() < MESSAGE_HEADER_SIZE {
            return Err(Error::ErrUnexpectedHeaderEof);
        }

        let t = u16::from_be_bytes([buf[0], buf[1]]);
        let size = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        let cookie = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let full_size = MESSAGE_HEADER_SIZE + size;

        if buf.len() < full_size {
            return Err(Error::Other(format!(
                "buffer length {} is less than {} (expected message size)",
                buf.len(),
                full_size
            )));
        }

        self.typ.read_value(t);
        self.length = size as u32;
        self.transaction_id = if cookie == MAGIC_COOKIE {
            TransactionId::from_slice(&buf[8..MESSAGE_HEADER_SIZE])?
        } else {
            // RFC 3489: no cookie, the id spans the whole 16 bytes.
            TransactionId::from_slice(&buf[4..MESSAGE_HEADER_SIZE])?
        };

        self.attributes.0.clear();
        let mut offset = 0;

        while offset < size {
            let pos = MESSAGE_HEADER_SIZE + offset;
            let b = &buf[pos..full_size];
            if b.len() < ATTRIBUTE_HEADER_SIZE {
                return Err(Error::Other(format!(
                    "buffer length {} is less than {} (expected header size)",
                    b.len(),
                    ATTRIBUTE_HEADER_SIZE
                )));
            }

            let typ = AttrType(u16::from_be_bytes([b[0], b[1]]));
            let length = u16::from_be_bytes([b[2], b[3]]);
            let a_l = length as usize;
            let a_buff_l = nearest_padded_value_length(a_l);

            let b = &b[ATTRIBUTE_HEADER_SIZE..];
            offset += ATTRIBUTE_HEADER_SIZE;
            if b.len() < a_buff_l {
                return Err(Error::Other(format!(
                    "buffer length {} is less than {} (expected value size for {})",
                    b.len(),
                    a_buff_l,
                    typ
                )));
            }

            self.attributes.0.push(RawAttribute {
                typ,
                length,
                value: b[..a_l].to_vec(),
                pos,
            });
            offset += a_buff_l;
        }

        Ok(())
    }

    // clone_to clones m to b securing any further m mutations.
    pub fn clone_to(&self, b: &mut Message) -> Result<()> {
        b.raw.clear();
        b.raw.extend_from_slice(&self.raw);
        b.decode()
    }

    // contains returns true if the message has an attribute of type t.
    pub fn contains(&self, t: AttrType) -> bool {
        self.attributes.0.iter().any(|a| a.typ == t)
    }

    // get returns a copy of the value of the first attribute of type t, or
    // ErrAttributeNotFound.
    pub fn get(&self, t: AttrType) -> Result<Vec<u8>> {
        let (v, ok) = self.attributes.get(t);
        if ok {
            Ok(v.value)
        } else {
            Err(Error::ErrAttributeNotFound)
        }
    }

    // build resets the message and applies setters to it in batch, returning
    // on the first error.
    pub fn build(&mut self, setters: &[Box<dyn Setter>]) -> Result<()> {
        self.reset();
        self.write_header();
        for s in setters {
            s.add_to(self)?;
        }
        Ok(())
    }

    // check applies checkers to the message in batch, returning on the first
    // error.
    pub fn check<C: Checker>(&self, checkers: &[C]) -> Result<()> {
        for c in checkers {
            c.check(self)?;
        }
        Ok(())
    }

    // parse applies getters to the message in batch, returning on the first
    // error.
    pub fn parse<G: Getter>(&self, getters: &mut [G]) -> Result<()> {
        for c in getters {
            c.get_from(self)?;
        }
        Ok(())
    }
}

// MessageClass is an 8-bit representation of the 2-bit STUN message class.
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub struct MessageClass(pub(crate) u8);

// Possible values for message class in STUN Message Type.
pub const CLASS_REQUEST: MessageClass = MessageClass(0x00); // 0b00
pub const CLASS_INDICATION: MessageClass = MessageClass(0x01); // 0b01
pub const CLASS_SUCCESS_RESPONSE: MessageClass = MessageClass(0x02); // 0b10
pub const CLASS_ERROR_RESPONSE: MessageClass = MessageClass(0x03); // 0b11

impl fmt::Display for MessageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            CLASS_REQUEST => "request",
            CLASS_INDICATION => "indication",
            CLASS_SUCCESS_RESPONSE => "success response",
            CLASS_ERROR_RESPONSE => "error response",
            _ => "unknown message class",
        };

        write!(f, "{s}")
    }
}

// Method is a uint16 representation of the 12-bit STUN method.
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub struct Method(pub(crate) u16);

// Possible methods for STUN Message.
pub const METHOD_BINDING: Method = Method(0x001);
pub const METHOD_ALLOCATE: Method = Method(0x003);
pub const METHOD_REFRESH: Method = Method(0x004);
pub const METHOD_SEND: Method = Method(0x006);
pub const METHOD_DATA: Method = Method(0x007);
pub const METHOD_CREATE_PERMISSION: Method = Method(0x008);
pub const METHOD_CHANNEL_BIND: Method = Method(0x009);

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unknown = format!("0x{:x}", self.0);

        let s = match *self {
            METHOD_BINDING => "Binding",
            METHOD_ALLOCATE => "Allocate",
            METHOD_REFRESH => "Refresh",
            METHOD_SEND => "Send",
            METHOD_DATA => "Data",
            METHOD_CREATE_PERMISSION => "CreatePermission",
            METHOD_CHANNEL_BIND => "ChannelBind",
            _ => unknown.as_str(),
        };

        write!(f, "{s}")
    }
}

// MessageType is STUN Message Type Field.
#[derive(Default, Debug, PartialEq, Eq, Clone, Copy)]
pub struct MessageType {
    pub method: Method,      // e.g. binding
    pub class: MessageClass, // e.g. request
}

// Common STUN message types.
pub const BINDING_REQUEST: MessageType = MessageType {
    method: METHOD_BINDING,
    class: CLASS_REQUEST,
};
pub const BINDING_SUCCESS: MessageType = MessageType {
    method: METHOD_BINDING,
    class: CLASS_SUCCESS_RESPONSE,
};
pub const BINDING_ERROR: MessageType = MessageType {
    method: METHOD_BINDING,
    class: CLASS_ERROR_RESPONSE,
};

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.class)
    }
}

impl Setter for MessageType {
    // add_to sets the message type, aiding Message::build.
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.set_type(*self);
        Ok(())
    }
}

const METHOD_ABITS: u16 = 0xf; // 0b0000000000001111
const METHOD_BBITS: u16 = 0x70; // 0b0000000001110000
const METHOD_DBITS: u16 = 0xf80; // 0b0000111110000000

const METHOD_BSHIFT: u16 = 1;
const METHOD_DSHIFT: u16 = 2;

const FIRST_BIT: u16 = 0x1;
const SECOND_BIT: u16 = 0x2;

const C0BIT: u16 = FIRST_BIT;
const C1BIT: u16 = SECOND_BIT;

const CLASS_C0SHIFT: u16 = 4;
const CLASS_C1SHIFT: u16 = 7;

impl MessageType {
    pub fn new(method: Method, class: MessageClass) -> Self {
        MessageType { method, class }
    }

    // value returns the bit representation of the type: the 12 method bits
    // spliced around the C0/C1 class bits.
    pub fn value(&self) -> u16 {
        let method = self.method.0;
        let a = method & METHOD_ABITS;
        let b = method & METHOD_BBITS;
        let d = method & METHOD_DBITS;
        let method = a + (b << METHOD_BSHIFT) + (d << METHOD_DSHIFT);

        let class = self.class.0 as u16;
        let c0 = (class & C0BIT) << CLASS_C0SHIFT;
        let c1 = (class & C1BIT) << CLASS_C1SHIFT;

        method + c0 + c1
    }

    // read_value decodes the 12-bit type field.
    pub fn read_value(&mut self, value: u16) {
        let c0 = (value >> CLASS_C0SHIFT) & C0BIT;
        let c1 = (value >> CLASS_C1SHIFT) & C1BIT;
        self.class = MessageClass((c0 + c1) as u8);

        let a = value & METHOD_ABITS;
        let b = (value >> METHOD_BSHIFT) & METHOD_BBITS;
        let d = (value >> METHOD_DSHIFT) & METHOD_DBITS;
        self.method = Method(a + b + d);
    }

    pub fn is_request(&self) -> bool {
        self.class == CLASS_REQUEST
    }

    pub fn is_indication(&self) -> bool {
        self.class == CLASS_INDICATION
    }

    pub fn is_response(&self) -> bool {
        self.class == CLASS_SUCCESS_RESPONSE || self.class == CLASS_ERROR_RESPONSE
    }
}
