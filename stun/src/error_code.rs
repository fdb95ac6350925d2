
use std::collections::HashMap;
use std::fmt;

use crate::attributes::*;
use crate::checks::*;
use crate::error::*;
use crate::message::*;

// ErrorCodeAttribute represents ERROR-CODE attribute.
//
// RFC 5389 Section 15.6
#[derive(Default, Debug, PartialEq, Eq)]
pub struct ErrorCodeAttribute {
    pub code: ErrorCode,
    pub reason: Vec<u8>,
}

impl fmt::Display for ErrorCodeAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match String::from_utf8(self.reason.clone()) {
            Ok(reason) => reason,
            Err(_) => return Err(fmt::Error {}),
        };

        write!(f, "{}: {}", self.code.0, reason)
    }
}

// constants for ERROR-CODE encoding.
const ERROR_CODE_CLASS_BYTE: usize = 2;
const ERROR_CODE_NUMBER_BYTE: usize = 3;
const ERROR_CODE_REASON_START: usize = 4;
const ERROR_CODE_REASON_MAX_B: usize = 763;
const ERROR_CODE_MODULO: u16 = 100;

impl Setter for ErrorCodeAttribute {
    // add_to adds ERROR-CODE to m.
    fn add_to(&self, m: &mut Message) -> Result<()> {
        check_overflow(
            ATTR_ERROR_CODE,
            self.reason.len() + ERROR_CODE_REASON_START,
            ERROR_CODE_REASON_MAX_B + ERROR_CODE_REASON_START,
        )?;

        let mut value: Vec<u8> = Vec::with_capacity(ERROR_CODE_REASON_START + self.reason.len());

        let number = (self.code.0 % ERROR_CODE_MODULO) as u8; // error code modulo 100
        let class = (self.code.0 / ERROR_CODE_MODULO) as u8; // hundred digit
        value.extend_from_slice(&[0, 0]);
        value.push(class); // [ERROR_CODE_CLASS_BYTE]
        value.push(number); // [ERROR_CODE_NUMBER_BYTE]
        value.extend_from_slice(&self.reason); // [ERROR_CODE_REASON_START:]

        m.add(ATTR_ERROR_CODE, &value);

        Ok(())
    }
}

impl Getter for ErrorCodeAttribute {
    // get_from decodes ERROR-CODE from m.
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let v = m.get(ATTR_ERROR_CODE)?;

        if v.len() < ERROR_CODE_REASON_START {
            return Err(Error::ErrUnexpectedEof);
        }

        let class = v[ERROR_CODE_CLASS_BYTE] as u16;
        let number = v[ERROR_CODE_NUMBER_BYTE] as u16;
        self.code = ErrorCode(class * ERROR_CODE_MODULO + number);
        self.reason = v[ERROR_CODE_REASON_START..].to_vec();

        Ok(())
    }
}

// ErrorCode is code for ERROR-CODE attribute.
#[derive(PartialEq, Eq, Hash, Copy, Clone, Default, Debug)]
pub struct ErrorCode(pub u16);

impl Setter for ErrorCode {
    // add_to adds ERROR-CODE with the default reason to m. If there is no
    // default reason, returns ErrNoDefaultReason.
    fn add_to(&self, m: &mut Message) -> Result<()> {
        if let Some(reason) = ERROR_REASONS.get(self) {
            let a = ErrorCodeAttribute {
                code: *self,
                reason: reason.clone(),
            };
            a.add_to(m)
        } else {
            Err(Error::ErrNoDefaultReason)
        }
    }
}

// Possible error codes.
pub const CODE_TRY_ALTERNATE: ErrorCode = ErrorCode(300);
pub const CODE_BAD_REQUEST: ErrorCode = ErrorCode(400);
pub const CODE_UNAUTHORIZED: ErrorCode = ErrorCode(401);
pub const CODE_UNKNOWN_ATTRIBUTE: ErrorCode = ErrorCode(420);
pub const CODE_STALE_NONCE: ErrorCode = ErrorCode(438);
pub const CODE_ROLE_CONFLICT: ErrorCode = ErrorCode(487);
pub const CODE_SERVER_ERROR: ErrorCode = ErrorCode(500);

lazy_static::lazy_static! {
    pub(crate) static ref ERROR_REASONS: HashMap<ErrorCode, Vec<u8>> = {
        let mut m = HashMap::new();
        m.insert(CODE_TRY_ALTERNATE, b"Try Alternate".to_vec());
        m.insert(CODE_BAD_REQUEST, b"Bad Request".to_vec());
        m.insert(CODE_UNAUTHORIZED, b"Unauthorized".to_vec());
        m.insert(CODE_UNKNOWN_ATTRIBUTE, b"Unknown Attribute".to_vec());
        m.insert(CODE_STALE_NONCE, b"Stale Nonce".to_vec());
        m.insert(CODE_ROLE_CONFLICT, b"Role Conflict".to_vec());
        m.insert(CODE_SERVER_ERROR, b"Server Error".to_vec());
        m
    };
}

/// UNKNOWN-ATTRIBUTES payload of a 420 response: the offending
/// comprehension-required types, two bytes each.
///
/// RFC 5389 Section 15.9
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UnknownAttrs(pub Vec<AttrType>);

impl UnknownAttrs {
    pub fn get_from(m: &Message) -> Result<Self> {
        let value = m.get(ATTR_UNKNOWN_ATTRIBUTES)?;
        if value.len() % 2 != 0 {
            return Err(Error::ErrBadUnknownAttrsSize);
        }
        let types = value
            .chunks_exact(2)
            .map(|pair| AttrType(u16::from_be_bytes([pair[0], pair[1]])))
            .collect();
        Ok(UnknownAttrs(types))
    }
}

impl Setter for UnknownAttrs {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        let value: Vec<u8> = self
            .0
            .iter()
            .flat_map(|t| t.value().to_be_bytes())
            .collect();
        m.add(ATTR_UNKNOWN_ATTRIBUTES, &value);
        Ok(())
    }
}

const MAX_SOFTWARE_B: usize = 763;

/// SOFTWARE attribute, stamped on responses this stack generates itself.
///
/// RFC 5389 Section 15.10
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Software(pub String);

impl Software {
    pub fn get_from(m: &Message) -> Result<Self> {
        Ok(Software(String::from_utf8(m.get(ATTR_SOFTWARE)?)?))
    }
}

impl Setter for Software {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        check_overflow(ATTR_SOFTWARE, self.0.len(), MAX_SOFTWARE_B)?;
        m.add(ATTR_SOFTWARE, self.0.as_bytes());
        Ok(())
    }
}
