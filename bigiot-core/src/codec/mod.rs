//! Newline-delimited JSON codec for the BigIoT wire protocol.
//!
//! ```text
//! {"M":"checkin","ID":"<device>","K":"<api key>"}\n      device → broker
//! {"M":"WELCOME TO BIGIOT", ...}\n                       broker → device
//! {"M":"checkinok", ...}\n                               broker → device
//! {"M":"update","ID":"<device>","V":{"<point>":"<v>"}}\n device → broker
//! {"M":"say","C":"play"}\n                               broker → device
//! {"M":"beat"}\n                                         device → broker
//! ```
//!
//! [`decode`] handles exactly one line. [`BigiotCodec`] splits a byte
//! stream into lines and yields messages through `tokio_util`.

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::error::BigiotError;
use crate::message::{
    METHOD_BEAT, METHOD_BEAT_SHORT, METHOD_CHECKIN, METHOD_CHECKIN_OK, METHOD_SAY, METHOD_UPDATE,
    METHOD_WELCOME, ProtocolMessage,
};

/// Longest inbound line accepted, matching the device receive buffer.
pub const MAX_LINE_LENGTH: usize = 4096;

// ── Encoding ─────────────────────────────────────────────────────

/// Field order on the wire is the declaration order here.
#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(rename = "M")]
    method: &'a str,
    #[serde(rename = "ID", skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(rename = "K", skip_serializing_if = "Option::is_none")]
    key: Option<&'a str>,
    #[serde(rename = "V", skip_serializing_if = "Option::is_none")]
    values: Option<BTreeMap<&'a str, &'a str>>,
    #[serde(rename = "C", skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

impl<'a> Envelope<'a> {
    fn bare(method: &'a str) -> Self {
        Self {
            method,
            id: None,
            key: None,
            values: None,
            content: None,
        }
    }
}

/// Encode a message as one JSON object followed by a single `\n`.
pub fn encode(msg: &ProtocolMessage) -> Result<Bytes, BigiotError> {
    let mut envelope = Envelope::bare(msg.method());
    match msg {
        ProtocolMessage::Checkin { device_id, api_key } => {
            envelope.id = Some(device_id.as_str());
            envelope.key = Some(api_key.as_str());
        }
        ProtocolMessage::Update {
            device_id,
            data_point_id,
            value,
        } => {
            envelope.id = Some(device_id.as_str());
            envelope.values = Some(BTreeMap::from([(data_point_id.as_str(), value.as_str())]));
        }
        ProtocolMessage::Command(cmd) => envelope.content = Some(cmd.to_text()),
        ProtocolMessage::Welcome | ProtocolMessage::CheckinOk | ProtocolMessage::Heartbeat => {}
    }

    let mut out = BytesMut::with_capacity(64).writer();
    serde_json::to_writer(&mut out, &envelope)?;
    let mut out = out.into_inner();
    out.put_u8(b'\n');
    Ok(out.freeze())
}

// ── Decoding ─────────────────────────────────────────────────────

/// Decode the first line of `buf` (up to the first `\n`, or the whole
/// buffer when there is none).
///
/// Returns `Ok(None)` for blank input and for well-formed objects whose
/// method is not one this client understands. Text that is not a JSON
/// object, or that has no string `"M"` field, is `MalformedMessage`.
pub fn decode(buf: &[u8]) -> Result<Option<ProtocolMessage>, BigiotError> {
    let line = match buf.iter().position(|&b| b == b'\n') {
        Some(end) => &buf[..end],
        None => buf,
    };
    let text = std::str::from_utf8(line)
        .map_err(|e| BigiotError::MalformedMessage(e.to_string()))?
        .trim();
    if text.is_empty() {
        return Ok(None);
    }

    let Value::Object(fields) = serde_json::from_str::<Value>(text)? else {
        return Err(malformed("expected a JSON object"));
    };
    let Some(Value::String(method)) = fields.get("M") else {
        return Err(malformed("missing method field"));
    };

    let msg = match method.as_str() {
        METHOD_CHECKIN => ProtocolMessage::Checkin {
            device_id: required_text(&fields, "ID")?,
            api_key: required_text(&fields, "K")?,
        },
        METHOD_WELCOME => ProtocolMessage::Welcome,
        METHOD_CHECKIN_OK => ProtocolMessage::CheckinOk,
        METHOD_UPDATE => {
            let Some(Value::Object(values)) = fields.get("V") else {
                return Err(malformed("update without a value object"));
            };
            let Some((data_point_id, value)) = values.iter().next() else {
                return Err(malformed("update with an empty value object"));
            };
            ProtocolMessage::Update {
                device_id: required_text(&fields, "ID")?,
                data_point_id: data_point_id.clone(),
                value: text_of(value).ok_or_else(|| malformed("update value is not scalar"))?,
            }
        }
        METHOD_SAY => ProtocolMessage::command_from_text(&required_text(&fields, "C")?),
        METHOD_BEAT | METHOD_BEAT_SHORT => ProtocolMessage::Heartbeat,
        other => {
            debug!(method = other, "ignoring message with unknown method");
            return Ok(None);
        }
    };
    Ok(Some(msg))
}

fn malformed(reason: &str) -> BigiotError {
    BigiotError::MalformedMessage(reason.to_string())
}

/// Strings are taken as-is, numbers as their decimal text.
fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn required_text(fields: &Map<String, Value>, key: &str) -> Result<String, BigiotError> {
    fields
        .get(key)
        .and_then(text_of)
        .ok_or_else(|| BigiotError::MalformedMessage(format!("missing field {key:?}")))
}

// ── BigiotCodec ──────────────────────────────────────────────────

/// Stream codec: one [`ProtocolMessage`] per newline-terminated line.
///
/// Lines that decode to "no message" are skipped. A malformed line is
/// consumed before the error is returned, so the caller can keep
/// decoding the rest of the buffer.
#[derive(Debug, Default)]
pub struct BigiotCodec {
    /// Bytes of `src` already scanned for a newline.
    next_index: usize,
}

impl BigiotCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pull the next message out of `src`, dropping malformed lines.
    ///
    /// Returns `None` once `src` holds no further complete message.
    pub fn next_message(&mut self, src: &mut BytesMut) -> Option<ProtocolMessage> {
        loop {
            match self.decode(src) {
                Ok(msg) => return msg,
                Err(e) => debug!("dropping inbound data: {e}"),
            }
        }
    }
}

impl Decoder for BigiotCodec {
    type Item = ProtocolMessage;
    type Error = BigiotError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(offset) = src[self.next_index..].iter().position(|&b| b == b'\n') else {
                if src.len() > MAX_LINE_LENGTH {
                    let size = src.len();
                    src.clear();
                    self.next_index = 0;
                    return Err(BigiotError::FrameTooLarge {
                        size,
                        max: MAX_LINE_LENGTH,
                    });
                }
                self.next_index = src.len();
                return Ok(None);
            };

            let line = src.split_to(self.next_index + offset + 1);
            self.next_index = 0;
            if line.len() > MAX_LINE_LENGTH + 1 {
                return Err(BigiotError::FrameTooLarge {
                    size: line.len() - 1,
                    max: MAX_LINE_LENGTH,
                });
            }
            if let Some(msg) = decode(&line)? {
                return Ok(Some(msg));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(msg) = self.decode(src)? {
            return Ok(Some(msg));
        }
        // An unterminated tail ends at the buffer end.
        let tail = src.split();
        self.next_index = 0;
        decode(&tail)
    }
}

impl Encoder<ProtocolMessage> for BigiotCodec {
    type Error = BigiotError;

    fn encode(&mut self, item: ProtocolMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&encode(&item)?);
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
