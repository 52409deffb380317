//! The legacy delimiter framing: `~m~<length>~m~<body>`, where the length
//! counts Unicode scalar values of the body. A body starting with `~j~`
//! carries JSON, `~h~` a heartbeat with a numeric suffix, anything else is
//! plain text.

use crate::message::{EventBody, Message, MessageType, Payload};

use super::{DecodeError, EncodeError};

const FRAME_DELIM: &[u8] = b"~m~";
const JSON_MARK: &str = "~j~";
const HEARTBEAT_MARK: &str = "~h~";

pub(super) fn encode(payload: &Payload, dst: &mut Vec<u8>) -> Result<(), EncodeError> {
    match payload {
        Payload::Text(s) => {
            if !s.is_empty() {
                write_frame(s.chars().count(), s, dst);
            }
        }
        Payload::Json(v) => {
            let body = serde_json::to_string(v)?;
            write_marked(JSON_MARK, &body, dst);
        }
        Payload::Event { name, args } => {
            let body = serde_json::to_string(&EventBody {
                args: args.clone(),
                name: name.clone(),
            })?;
            write_marked(JSON_MARK, &body, dst);
        }
        Payload::Heartbeat(n) => {
            write_marked(HEARTBEAT_MARK, &n.to_string(), dst);
        }
        Payload::Handshake(s) => {
            write_frame(s.len(), s, dst);
        }
        Payload::Message(m) => match m.typ {
            MessageType::Text => {
                if !m.data.is_empty() {
                    write_frame(m.data.chars().count(), &m.data, dst);
                }
            }
            MessageType::Json | MessageType::Event => write_marked(JSON_MARK, &m.data, dst),
            MessageType::Heartbeat => write_marked(HEARTBEAT_MARK, &m.data, dst),
            // no wire form under this framing
            _ => {}
        },
        // connect, disconnect, ack, error and noop have no wire form under
        // this framing
        Payload::Connect(_)
        | Payload::Disconnect(_)
        | Payload::Ack { .. }
        | Payload::Error { .. }
        | Payload::Noop => {}
    }
    Ok(())
}

fn write_marked(mark: &str, body: &str, dst: &mut Vec<u8>) {
    let len = mark.chars().count() + body.chars().count();
    dst.extend_from_slice(FRAME_DELIM);
    dst.extend_from_slice(len.to_string().as_bytes());
    dst.extend_from_slice(FRAME_DELIM);
    dst.extend_from_slice(mark.as_bytes());
    dst.extend_from_slice(body.as_bytes());
}

fn write_frame(len: usize, body: &str, dst: &mut Vec<u8>) {
    dst.extend_from_slice(FRAME_DELIM);
    dst.extend_from_slice(len.to_string().as_bytes());
    dst.extend_from_slice(FRAME_DELIM);
    dst.extend_from_slice(body.as_bytes());
}

pub(super) fn decode(buf: &mut Vec<u8>, out: &mut Vec<Message>) -> Result<(), DecodeError> {
    loop {
        if buf.is_empty() {
            return Ok(());
        }
        if buf.len() < 3 {
            return if FRAME_DELIM.starts_with(buf) {
                Ok(())
            } else {
                Err(DecodeError::MalformedHeader)
            };
        }
        if &buf[..3] != FRAME_DELIM {
            return Err(DecodeError::MalformedHeader);
        }

        let mut i = 3;
        while i < buf.len() && buf[i].is_ascii_digit() {
            i += 1;
        }
        if i == 3 {
            return if buf.len() == 3 {
                Ok(())
            } else {
                Err(DecodeError::InvalidLength)
            };
        }
        if i == buf.len() {
            return Ok(()); // still reading length digits
        }
        if buf.len() < i + 3 {
            return if FRAME_DELIM.starts_with(&buf[i..]) {
                Ok(())
            } else {
                Err(DecodeError::MalformedHeader)
            };
        }
        if &buf[i..i + 3] != FRAME_DELIM {
            return Err(DecodeError::MalformedHeader);
        }

        let chars: usize = std::str::from_utf8(&buf[3..i])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(DecodeError::InvalidLength)?;
        let start = i + 3;
        let body_len = match take_chars(&buf[start..], chars) {
            Take::Partial => return Ok(()),
            Take::Invalid => return Err(DecodeError::InvalidUtf8),
            Take::Complete(len) => len,
        };
        // take_chars walked only complete utf-8 sequences
        let body = std::str::from_utf8(&buf[start..start + body_len]).unwrap();
        out.push(classify(body));
        buf.drain(..start + body_len);
    }
}

enum Take {
    Complete(usize),
    Partial,
    Invalid,
}

/// Byte length of the first `n` scalar values of `bytes`, if that many have
/// fully arrived.
fn take_chars(bytes: &[u8], n: usize) -> Take {
    let valid = match std::str::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) if e.error_len().is_some() => return Take::Invalid,
        // a trailing incomplete sequence: decode what is whole so far
        Err(e) => std::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap(),
    };
    let mut count = 0;
    for (idx, _) in valid.char_indices() {
        if count == n {
            return Take::Complete(idx);
        }
        count += 1;
    }
    if count == n {
        Take::Complete(valid.len())
    } else {
        Take::Partial
    }
}

fn classify(body: &str) -> Message {
    if let Some(rest) = body.strip_prefix(JSON_MARK) {
        Message::new(MessageType::Json, 0, false, "", rest)
    } else if let Some(rest) = body.strip_prefix(HEARTBEAT_MARK) {
        Message::new(MessageType::Heartbeat, 0, false, "", rest)
    } else {
        Message::new(MessageType::Text, 0, false, "", body)
    }
}

#[cfg(test)]
mod tests {
    use crate::payload::{Decoder, Encoder, Framing};

    use super::*;

    fn encode_one(payload: &Payload) -> String {
        let enc = Encoder::new(Framing::Delimited);
        let mut buf = Vec::new();
        enc.encode(payload, &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn decode_all(input: &str) -> Vec<Message> {
        let mut dec = Decoder::new(Framing::Delimited);
        dec.feed(input.as_bytes());
        dec.decode().unwrap()
    }

    #[test]
    fn encode_text_counts_scalar_values() {
        assert_eq!(encode_one(&Payload::Text("hello".into())), "~m~5~m~hello");
        // one length unit per character, not per byte
        assert_eq!(
            encode_one(&Payload::Text("i\u{2665}am".into())),
            "~m~4~m~i\u{2665}am"
        );
        assert_eq!(encode_one(&Payload::Text(String::new())), "");
    }

    #[test]
    fn encode_heartbeat() {
        assert_eq!(encode_one(&Payload::Heartbeat(0)), "~m~4~m~~h~0");
        assert_eq!(encode_one(&Payload::Heartbeat(13)), "~m~5~m~~h~13");
    }

    #[test]
    fn encode_handshake() {
        assert_eq!(
            encode_one(&Payload::Handshake("0123456789abcdef".into())),
            "~m~16~m~0123456789abcdef"
        );
    }

    #[test]
    fn encode_json() {
        assert_eq!(
            encode_one(&Payload::Json(serde_json::json!({"a":"b"}))),
            "~m~12~m~~j~{\"a\":\"b\"}"
        );
    }

    #[test]
    fn encode_silent_payloads() {
        assert_eq!(encode_one(&Payload::Noop), "");
        assert_eq!(encode_one(&Payload::Connect(String::new())), "");
        assert_eq!(encode_one(&Payload::Disconnect(String::new())), "");
        assert_eq!(encode_one(&Payload::Ack { id: 1, args: None }), "");
    }

    #[test]
    fn decode_text_and_markers() {
        assert_eq!(
            decode_all("~m~5~m~hello"),
            vec![Message::new(MessageType::Text, 0, false, "", "hello")]
        );
        assert_eq!(
            decode_all("~m~5~m~~h~13"),
            vec![Message::new(MessageType::Heartbeat, 0, false, "", "13")]
        );
        assert_eq!(
            decode_all("~m~12~m~~j~{\"a\":\"b\"}"),
            vec![Message::new(MessageType::Json, 0, false, "", "{\"a\":\"b\"}")]
        );
    }

    #[test]
    fn decode_multiple_frames_in_order() {
        let got = decode_all("~m~3~m~abc~m~1~m~X");
        assert_eq!(
            got,
            vec![
                Message::new(MessageType::Text, 0, false, "", "abc"),
                Message::new(MessageType::Text, 0, false, "", "X"),
            ]
        );
    }

    #[test]
    fn decode_partial_then_complete() {
        let mut dec = Decoder::new(Framing::Delimited);
        dec.feed(b"~m~3~m~ab");
        assert_eq!(dec.decode().unwrap(), vec![]);
        dec.feed(b"c");
        assert_eq!(
            dec.decode().unwrap(),
            vec![Message::new(MessageType::Text, 0, false, "", "abc")]
        );
        assert_eq!(dec.buffered(), 0);
    }

    #[test]
    fn decode_zero_length_frame_is_empty_text() {
        assert_eq!(
            decode_all("~m~0~m~"),
            vec![Message::new(MessageType::Text, 0, false, "", "")]
        );
    }

    #[test]
    fn decode_resumes_across_any_byte_split() {
        let input = "~m~4~m~i\u{2665}am~m~5~m~~h~42~m~12~m~~j~{\"a\":\"b\"}";
        let bytes = input.as_bytes();
        for i in 1..bytes.len() {
            let mut dec = Decoder::new(Framing::Delimited);
            let mut got = Vec::new();
            for chunk in bytes.chunks(i) {
                dec.feed(chunk);
                got.extend(dec.decode().unwrap());
            }
            assert_eq!(got.len(), 3, "chunk size {i}");
            assert_eq!(got[0], Message::new(MessageType::Text, 0, false, "", "i\u{2665}am"));
            assert_eq!(got[1], Message::new(MessageType::Heartbeat, 0, false, "", "42"));
            assert_eq!(got[2], Message::new(MessageType::Json, 0, false, "", "{\"a\":\"b\"}"));
            assert_eq!(dec.buffered(), 0, "chunk size {i}");
        }
    }

    #[test]
    fn decode_round_trip() {
        let enc = Encoder::new(Framing::Delimited);
        let payloads = vec![
            Payload::Text("hello".into()),
            Payload::Text("i\u{2665}am".into()),
            Payload::Heartbeat(7),
            Payload::Json(serde_json::json!({"k":[1,2,3]})),
        ];
        let mut buf = Vec::new();
        for p in &payloads {
            enc.encode(p, &mut buf).unwrap();
        }
        let mut dec = Decoder::new(Framing::Delimited);
        dec.feed(&buf);
        let got = dec.decode().unwrap();
        assert_eq!(got.len(), 4);
        assert_eq!(got[0].data(), "hello");
        assert_eq!(got[1].data(), "i\u{2665}am");
        assert_eq!(got[2].typ(), MessageType::Heartbeat);
        assert_eq!(got[2].data(), "7");
        assert_eq!(got[3].typ(), MessageType::Json);
        assert_eq!(got[3].data(), "{\"k\":[1,2,3]}");
    }

    #[test]
    fn decode_malformed_resets_state() {
        let mut dec = Decoder::new(Framing::Delimited);
        dec.feed(b"xm~3~m~abc");
        assert_eq!(dec.decode().unwrap_err(), DecodeError::MalformedHeader);
        assert_eq!(dec.buffered(), 0);

        let mut dec = Decoder::new(Framing::Delimited);
        dec.feed(b"~m~x~m~abc");
        assert_eq!(dec.decode().unwrap_err(), DecodeError::InvalidLength);

        let mut dec = Decoder::new(Framing::Delimited);
        dec.feed(b"~m~3x~~abc");
        assert_eq!(dec.decode().unwrap_err(), DecodeError::MalformedHeader);

        // usable again after the reset
        dec.feed(b"~m~2~m~ok");
        assert_eq!(dec.decode().unwrap()[0].data(), "ok");
    }
}
