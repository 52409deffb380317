use std::{
    fmt::{Debug, Display, Formatter},
    str::FromStr,
};

use rand::{rngs::OsRng, RngCore};

/// Length of the session ids.
pub const SID_LENGTH: usize = 16;

/// Charset from which session ids are built.
const SID_CHARSET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// A session id: 16 characters drawn from `[0-9A-Za-z]`.
///
/// It is the primary key of a session in the server table for the whole
/// session lifetime, across any number of transport reconnects.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sid([u8; SID_LENGTH]);

impl Sid {
    /// Generate a new random session id from the system entropy source.
    pub fn new() -> Result<Self, std::io::Error> {
        let mut id = [0u8; SID_LENGTH];
        OsRng
            .try_fill_bytes(&mut id)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        for b in id.iter_mut() {
            *b = SID_CHARSET[(*b as usize) % SID_CHARSET.len()];
        }
        Ok(Sid(id))
    }

    fn as_str(&self) -> &str {
        // SAFETY: a Sid only ever holds bytes from SID_CHARSET
        unsafe { std::str::from_utf8_unchecked(&self.0) }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SidParseError {
    #[error("invalid sid length")]
    InvalidLength,
    #[error("invalid sid character")]
    InvalidCharset,
}

impl FromStr for Sid {
    type Err = SidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != SID_LENGTH {
            return Err(SidParseError::InvalidLength);
        }
        let mut id = [0u8; SID_LENGTH];
        for (i, b) in s.bytes().enumerate() {
            if !b.is_ascii_alphanumeric() {
                return Err(SidParseError::InvalidCharset);
            }
            id[i] = b;
        }
        Ok(Sid(id))
    }
}

impl Display for Sid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Debug for Sid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::Sid;

    #[test]
    fn sid_roundtrip() {
        let id = Sid::new().unwrap();
        let id2 = Sid::from_str(&id.to_string()).unwrap();
        assert_eq!(id, id2);
        let id = Sid::from_str("0123456789abcdef").unwrap();
        assert_eq!(id.to_string(), "0123456789abcdef");
    }

    #[test]
    fn sid_charset() {
        let id = Sid::new().unwrap();
        assert_eq!(id.to_string().len(), 16);
        assert!(id.to_string().bytes().all(|b| b.is_ascii_alphanumeric()));
    }

    #[test]
    fn sid_parse_invalid() {
        assert!(Sid::from_str("too-short").is_err());
        assert!(Sid::from_str("0123456789abcde#").is_err());
        assert!(Sid::from_str("0123456789abcdef0").is_err());
    }
}
