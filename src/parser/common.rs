use bytes::Bytes;
use serde_json::json;

use super::{Parse, ParseError, ParserState};
use crate::{
    engine::Frame,
    packet::{Packet, PacketData},
    Value,
};

/// The default socket.io packet format:
///
/// ```text
/// <packet type>[<# of binary attachments>-][<namespace>,][<acknowledgment id>][JSON payload]
/// + binary attachments as adjacent frames
/// ```
///
/// Binary payloads are replaced by `{"_placeholder":true,"num":n}` markers in
/// the JSON payload and carried as separate binary frames. Markers are
/// resolved back to [`Value::Binary`] elements at the top level of the
/// argument list; markers nested deeper inside a JSON tree are left as-is
/// (the [`Value`] model cannot hold bytes inside a JSON tree, and this
/// encoder never produces them).
#[derive(Debug, Default, Clone, Copy)]
pub struct CommonParser;

impl CommonParser {
    /// Create a new [`CommonParser`]. This is the default packet parser.
    pub fn new() -> Self {
        Self
    }
}

impl Parse for CommonParser {
    fn encode(&self, packet: Packet) -> Vec<Frame> {
        let mut bins: Vec<Bytes> = Vec::new();
        let (data, ack) = match &packet.inner {
            PacketData::Connect(Some(value)) => (Some(value.to_string()), None),
            PacketData::Connect(None) | PacketData::Disconnect => (None, None),
            PacketData::Event(args, ack) | PacketData::BinaryEvent(args, ack) => {
                (Some(serialize_args(args, &mut bins)), *ack)
            }
            PacketData::EventAck(args, ack) | PacketData::BinaryAck(args, ack) => {
                (Some(serialize_args(args, &mut bins)), Some(*ack))
            }
            PacketData::ConnectError(value) => (Some(value.to_string()), None),
        };

        let mut header = String::new();
        header.push((b'0' + packet.inner.index() as u8) as char);
        if packet.inner.is_binary() {
            header.push_str(itoa::Buffer::new().format(bins.len()));
            header.push('-');
        }
        serialize_nsp(&mut header, &packet.ns);
        if let Some(ack) = ack {
            header.push_str(itoa::Buffer::new().format(ack));
        }
        if let Some(data) = data {
            header.push_str(&data);
        }

        let mut frames = Vec::with_capacity(1 + bins.len());
        frames.push(Frame::Text(header));
        frames.extend(bins.into_iter().map(Frame::Binary));
        frames
    }

    fn decode(&self, state: &ParserState, frame: Frame) -> Result<Packet, ParseError> {
        match frame {
            Frame::Text(data) => {
                let (packet, attachments) = deserialize_header(&data)?;
                if packet.inner.is_binary() {
                    let expected = attachments.ok_or(ParseError::InvalidAttachments)?;
                    if expected == 0 {
                        return Ok(packet);
                    }
                    state.begin(packet, expected);
                    Err(ParseError::NeedsMoreBinaryData)
                } else {
                    Ok(packet)
                }
            }
            Frame::Binary(data) => {
                let mut partial = state.partial.lock().unwrap();
                let complete = match partial.as_mut() {
                    Some(p) => {
                        p.bins.push(data);
                        p.bins.len() >= p.expected
                    }
                    None => return Err(ParseError::UnexpectedBinaryPacket),
                };
                if !complete {
                    return Err(ParseError::NeedsMoreBinaryData);
                }
                let Some(mut p) = partial.take() else {
                    return Err(ParseError::UnexpectedBinaryPacket);
                };
                match &mut p.packet.inner {
                    PacketData::BinaryEvent(args, _) | PacketData::BinaryAck(args, _) => {
                        apply_attachments(args, &p.bins);
                    }
                    _ => {}
                }
                Ok(p.packet)
            }
        }
    }
}

/// Serialize an argument list to a JSON array, extracting binary elements
/// into `bins` and leaving placeholder markers in their position.
fn serialize_args(args: &[Value], bins: &mut Vec<Bytes>) -> String {
    let elements: Vec<serde_json::Value> = args
        .iter()
        .map(|arg| match arg {
            Value::Json(value) => value.clone(),
            Value::Binary(bin) => {
                let num = bins.len();
                bins.push(bin.clone());
                json!({ "_placeholder": true, "num": num })
            }
        })
        .collect();
    serde_json::Value::Array(elements).to_string()
}

fn serialize_nsp(header: &mut String, nsp: &str) {
    if !nsp.is_empty() && nsp != "/" {
        if !nsp.starts_with('/') {
            header.push('/');
        }
        header.push_str(nsp);
        header.push(',');
    }
}

fn deserialize_header(data: &str) -> Result<(Packet, Option<usize>), ParseError> {
    let bytes = data.as_bytes();
    let index = *bytes.first().ok_or(ParseError::InvalidPacketType)?;
    if !(b'0'..=b'6').contains(&index) {
        return Err(ParseError::InvalidPacketType);
    }
    let mut pos = 1;

    let attachments = if index == b'5' || index == b'6' {
        Some(read_attachments(bytes, &mut pos).ok_or(ParseError::InvalidAttachments)?)
    } else {
        None
    };

    // Custom namespaces start with a slash.
    let ns = if bytes.get(pos) == Some(&b'/') {
        read_nsp(data, &mut pos)
    } else {
        "/".to_string()
    };
    let ack = read_ack(data, &mut pos);
    let rest = &data[pos..];

    let inner = match index {
        b'0' => PacketData::Connect(if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str(rest)?)
        }),
        b'1' => PacketData::Disconnect,
        b'2' => PacketData::Event(read_args(rest)?, ack),
        b'3' => PacketData::EventAck(read_args(rest)?, ack.ok_or(ParseError::InvalidPacketType)?),
        b'4' => PacketData::ConnectError(serde_json::from_str(rest)?),
        b'5' => PacketData::BinaryEvent(read_args(rest)?, ack),
        b'6' => PacketData::BinaryAck(read_args(rest)?, ack.ok_or(ParseError::InvalidPacketType)?),
        _ => return Err(ParseError::InvalidPacketType),
    };
    let packet = Packet {
        inner,
        ns,
        options: Default::default(),
        query: None,
    };
    Ok((packet, attachments))
}

fn read_attachments(bytes: &[u8], pos: &mut usize) -> Option<usize> {
    let start = *pos;
    while let Some(c) = bytes.get(*pos) {
        if c.is_ascii_digit() {
            *pos += 1;
        } else if *c == b'-' && *pos > start {
            let count = std::str::from_utf8(&bytes[start..*pos]).ok()?.parse().ok()?;
            *pos += 1;
            return Some(count);
        } else {
            return None;
        }
    }
    None
}

fn read_nsp(data: &str, pos: &mut usize) -> String {
    let bytes = data.as_bytes();
    let start = *pos;
    while let Some(c) = bytes.get(*pos) {
        // Some clients do not end the nsp with a comma when it is the end of
        // the packet, e.g. `1/custom`.
        if *c == b',' {
            let nsp = data[start..*pos].to_string();
            *pos += 1;
            return nsp;
        }
        *pos += 1;
    }
    data[start..].to_string()
}

fn read_ack(data: &str, pos: &mut usize) -> Option<i64> {
    let bytes = data.as_bytes();
    let start = *pos;
    loop {
        match bytes.get(*pos) {
            Some(c) if c.is_ascii_digit() => *pos += 1,
            Some(b'[' | b'{') if *pos > start => return data[start..*pos].parse().ok(),
            _ => {
                *pos = start;
                return None;
            }
        }
    }
}

fn read_args(data: &str) -> Result<Vec<Value>, ParseError> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let args: Vec<serde_json::Value> = serde_json::from_str(data)?;
    Ok(args.into_iter().map(Value::Json).collect())
}

/// Swap top-level placeholder markers for their binary payloads.
fn apply_attachments(args: &mut [Value], bins: &[Bytes]) {
    for arg in args.iter_mut() {
        if let Value::Json(value) = arg {
            if let Some(num) = placeholder_num(value) {
                if let Some(bin) = bins.get(num) {
                    *arg = Value::Binary(bin.clone());
                }
            }
        }
    }
}

fn placeholder_num(value: &serde_json::Value) -> Option<usize> {
    let obj = value.as_object()?;
    obj.get("_placeholder")?
        .as_bool()?
        .then(|| obj.get("num")?.as_u64())
        .flatten()
        .map(|num| num as usize)
}
