//! ## Wire framings
//!
//! Two framings of the same typed message model ship side by side; they are
//! not compatible with each other and one is chosen per deployment:
//! - [`Framing::Tagged`]: `<type>:<id[+]>:<endpoint>[:<data>]` frames, each
//!   wrapped in `\u{fffd}<byte-length>\u{fffd}` so several frames can share
//!   one HTTP body. A payload not starting with the wrapper rune is one
//!   self-framed message (the websocket form).
//! - [`Framing::Delimited`]: the legacy `~m~<length>~m~<body>` form, lengths
//!   counted in Unicode scalar values, with `~j~` marking JSON bodies and
//!   `~h~` heartbeats.

use crate::message::{Message, Payload};

mod delimited;
mod tagged;

/// Which of the two wire framings to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    #[default]
    Tagged,
    Delimited,
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("error serializing json payload: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed frame header")]
    MalformedHeader,
    #[error("frame length is not a positive integer")]
    InvalidLength,
    #[error("invalid message type tag")]
    InvalidType,
    #[error("invalid message id")]
    InvalidId,
    #[error("frame has too few parts")]
    MissingParts,
    #[error("frame is not valid utf-8")]
    InvalidUtf8,
}

/// Stateless encoder for one framing. Payloads are appended to the caller's
/// buffer so a whole batch can be written as a single wire unit.
#[derive(Debug, Clone)]
pub struct Encoder {
    framing: Framing,
}

impl Encoder {
    pub fn new(framing: Framing) -> Self {
        Self { framing }
    }

    pub fn encode(&self, payload: &Payload, dst: &mut Vec<u8>) -> Result<(), EncodeError> {
        match self.framing {
            Framing::Tagged => tagged::encode(payload, dst),
            Framing::Delimited => delimited::encode(payload, dst),
        }
    }
}

/// Stateful, resumable decoder.
///
/// Bytes are fed incrementally; [`decode`](Decoder::decode) yields every
/// fully framed message and keeps partial frames buffered for the next call.
/// It fails only on structurally invalid input, and a failure resets all
/// decoder state.
#[derive(Debug)]
pub struct Decoder {
    framing: Framing,
    buf: Vec<u8>,
}

impl Decoder {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            buf: Vec::new(),
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Drain every complete frame currently buffered. Returns an empty vec
    /// (not an error) on partial input.
    pub fn decode(&mut self) -> Result<Vec<Message>, DecodeError> {
        let mut out = Vec::new();
        let res = match self.framing {
            Framing::Tagged => tagged::decode(&mut self.buf, &mut out),
            Framing::Delimited => delimited::decode(&mut self.buf, &mut out),
        };
        match res {
            Ok(()) => Ok(out),
            Err(e) => {
                self.reset();
                Err(e)
            }
        }
    }

    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Number of buffered, not yet decoded bytes.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}
