#[cfg(test)]
mod username_test;

use std::fmt;

use crate::attributes::*;
use crate::checks::check_overflow;
use crate::error::*;
use crate::message::*;

// RFC 5389 Section 15.3 caps USERNAME at 513 bytes.
const MAX_USERNAME_B: usize = 513;

// Separator between the receiver's and the sender's fragments.
const FRAGMENT_SEP: char = ':';

/// USERNAME attribute in the form connectivity checks exchange it: the
/// fragment owned by the receiving side, then the sender's, joined by `:`.
/// A name without a separator is all local fragment.
///
/// Credential checks and short-term MESSAGE-INTEGRITY keys are looked up by
/// the local fragment alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Username {
    pub local: String,
    pub remote: String,
}

impl Username {
    pub fn new(local: &str, remote: &str) -> Self {
        Username {
            local: local.to_owned(),
            remote: remote.to_owned(),
        }
    }

    /// Parses USERNAME from m, splitting at the first separator.
    pub fn get_from(m: &Message) -> Result<Self> {
        let value = String::from_utf8(m.get(ATTR_USERNAME)?)?;
        match value.split_once(FRAGMENT_SEP) {
            Some((local, remote)) => Ok(Username::new(local, remote)),
            None => Ok(Username {
                local: value,
                remote: String::new(),
            }),
        }
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.remote.is_empty() {
            write!(f, "{}", self.local)
        } else {
            write!(f, "{}{}{}", self.local, FRAGMENT_SEP, self.remote)
        }
    }
}

impl Setter for Username {
    // add_to writes the joined form, checking the RFC length cap.
    fn add_to(&self, m: &mut Message) -> Result<()> {
        let text = self.to_string();
        check_overflow(ATTR_USERNAME, text.len(), MAX_USERNAME_B)?;
        m.add(ATTR_USERNAME, text.as_bytes());
        Ok(())
    }
}
