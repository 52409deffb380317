//! The tagged framing: `<type>:<id[+]>:<endpoint>[:<data>]`, each frame
//! wrapped in `\u{fffd}<byte-length>\u{fffd}` on byte-stream transports.

use crate::message::{EventBody, Message, MessageType, Payload};

use super::{DecodeError, EncodeError};

/// U+FFFD, three bytes in UTF-8.
const FRAME_MARK: &[u8] = "\u{fffd}".as_bytes();

pub(super) fn encode(payload: &Payload, dst: &mut Vec<u8>) -> Result<(), EncodeError> {
    // The handshake is not a frame, it is written verbatim.
    if let Payload::Handshake(s) = payload {
        dst.extend_from_slice(s.as_bytes());
        return Ok(());
    }

    let msg = to_message(payload)?;
    let mut frame = Vec::with_capacity(8 + msg.data.len() + msg.endpoint.len());
    write_frame(&msg, &mut frame);

    dst.extend_from_slice(FRAME_MARK);
    dst.extend_from_slice(frame.len().to_string().as_bytes());
    dst.extend_from_slice(FRAME_MARK);
    dst.extend_from_slice(&frame);
    Ok(())
}

fn to_message(payload: &Payload) -> Result<Message, EncodeError> {
    let msg = match payload {
        Payload::Text(s) => Message::new(MessageType::Text, 0, false, "", s.clone()),
        Payload::Json(v) => {
            Message::new(MessageType::Json, 0, false, "", serde_json::to_string(v)?)
        }
        Payload::Event { name, args } => {
            let body = EventBody {
                args: args.clone(),
                name: name.clone(),
            };
            Message::new(MessageType::Event, 0, false, "", serde_json::to_string(&body)?)
        }
        Payload::Ack { id, args } => {
            let data = match args {
                Some(args) => format!("{id}+{}", serde_json::to_string(args)?),
                None => id.to_string(),
            };
            Message::new(MessageType::Ack, 0, false, "", data)
        }
        Payload::Error {
            endpoint,
            reason,
            advice,
        } => {
            let data = match (reason, advice) {
                (Some(r), Some(a)) => format!("{r}+{a}"),
                (Some(r), None) => r.to_string(),
                (None, Some(a)) => format!("+{a}"),
                (None, None) => String::new(),
            };
            Message::new(MessageType::Error, 0, false, endpoint.clone(), data)
        }
        Payload::Heartbeat(_) => Message::new(MessageType::Heartbeat, 0, false, "", ""),
        Payload::Connect(endpoint) => {
            Message::new(MessageType::Connect, 0, false, endpoint.clone(), "")
        }
        Payload::Disconnect(endpoint) => {
            Message::new(MessageType::Disconnect, 0, false, endpoint.clone(), "")
        }
        Payload::Noop => Message::new(MessageType::Noop, 0, false, "", ""),
        Payload::Message(m) => m.clone(),
        Payload::Handshake(_) => unreachable!("handshake is written verbatim"),
    };
    Ok(msg)
}

fn write_frame(msg: &Message, dst: &mut Vec<u8>) {
    dst.extend_from_slice(msg.typ.tag().to_string().as_bytes());
    dst.push(b':');
    if msg.id > 0 {
        dst.extend_from_slice(msg.id.to_string().as_bytes());
    }
    if msg.ack {
        dst.push(b'+');
    }
    dst.push(b':');
    dst.extend_from_slice(msg.endpoint.as_bytes());
    if !msg.data.is_empty() {
        dst.push(b':');
        dst.extend_from_slice(msg.data.as_bytes());
    }
}

pub(super) fn decode(buf: &mut Vec<u8>, out: &mut Vec<Message>) -> Result<(), DecodeError> {
    loop {
        if buf.is_empty() {
            return Ok(());
        }
        if buf[0] != FRAME_MARK[0] {
            // No wrapper rune: the whole buffer is one self-framed message.
            let msg = decode_frame(buf)?;
            buf.clear();
            out.push(msg);
            return Ok(());
        }
        if buf.len() < FRAME_MARK.len() {
            return if FRAME_MARK.starts_with(buf) {
                Ok(()) // partial mark
            } else {
                Err(DecodeError::MalformedHeader)
            };
        }
        if &buf[..3] != FRAME_MARK {
            return Err(DecodeError::MalformedHeader);
        }

        let mut i = 3;
        while i < buf.len() && buf[i].is_ascii_digit() {
            i += 1;
        }
        if i == 3 {
            return if buf.len() == 3 {
                Ok(()) // length digits not arrived yet
            } else {
                Err(DecodeError::InvalidLength)
            };
        }
        if i == buf.len() {
            return Ok(()); // still reading length digits
        }
        if buf.len() < i + 3 {
            return if FRAME_MARK.starts_with(&buf[i..]) {
                Ok(())
            } else {
                Err(DecodeError::MalformedHeader)
            };
        }
        if &buf[i..i + 3] != FRAME_MARK {
            return Err(DecodeError::MalformedHeader);
        }

        let len: usize = std::str::from_utf8(&buf[3..i])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(DecodeError::InvalidLength)?;
        let start = i + 3;
        if buf.len() < start + len {
            return Ok(()); // frame body incomplete
        }
        let msg = decode_frame(&buf[start..start + len])?;
        out.push(msg);
        buf.drain(..start + len);
    }
}

fn decode_frame(bytes: &[u8]) -> Result<Message, DecodeError> {
    let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)?;

    // [type] ':' [id ('+')] ':' [endpoint] (':' [data])
    let mut parts = text.splitn(4, ':');
    let typ = parts.next().ok_or(DecodeError::MissingParts)?;
    let id_part = parts.next().ok_or(DecodeError::MissingParts)?;
    let endpoint = parts.next().ok_or(DecodeError::MissingParts)?;
    let data = parts.next().unwrap_or("");

    let typ = typ
        .parse::<u8>()
        .ok()
        .and_then(MessageType::from_tag)
        .ok_or(DecodeError::InvalidType)?;

    let (id, ack) = match id_part.strip_suffix('+') {
        Some(rest) => (rest, true),
        None => (id_part, false),
    };
    let id = if id.is_empty() {
        0
    } else {
        id.parse::<u32>().map_err(|_| DecodeError::InvalidId)?
    };

    Ok(Message::new(typ, id, ack, endpoint, data))
}
