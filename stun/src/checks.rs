use subtle::ConstantTimeEq;

use crate::attributes::AttrType;
use crate::error::{Error, Result};

// check_size returns ErrAttributeSizeInvalid if got is not equal to expected.
pub fn check_size(_at: AttrType, got: usize, expected: usize) -> Result<()> {
    if got == expected {
        Ok(())
    } else {
        Err(Error::ErrAttributeSizeInvalid)
    }
}

// check_overflow returns ErrAttributeSizeOverflow if got is bigger than max.
pub fn check_overflow(_at: AttrType, got: usize, max: usize) -> Result<()> {
    if got <= max {
        Ok(())
    } else {
        Err(Error::ErrAttributeSizeOverflow)
    }
}

// check_hmac compares two HMACs in constant time.
pub fn check_hmac(got: &[u8], expected: &[u8]) -> Result<()> {
    if got.ct_eq(expected).into() {
        Ok(())
    } else {
        Err(Error::ErrIntegrityMismatch)
    }
}
