//! Protocol message types.
//!
//! Every line on the wire maps to one [`ProtocolMessage`] variant. The
//! method field `"M"` selects the variant; see [`crate::codec`] for the
//! field mapping.

use std::fmt;

// ── Method names ─────────────────────────────────────────────────

/// Client check-in (authentication request).
pub const METHOD_CHECKIN: &str = "checkin";
/// Server greeting sent right after the TCP connection opens.
pub const METHOD_WELCOME: &str = "WELCOME TO BIGIOT";
/// Server acknowledgement of a successful check-in.
pub const METHOD_CHECKIN_OK: &str = "checkinok";
/// Telemetry upload.
pub const METHOD_UPDATE: &str = "update";
/// Command envelope carrying a verb in the `"C"` field.
pub const METHOD_SAY: &str = "say";
/// Keep-alive.
pub const METHOD_BEAT: &str = "beat";
/// Short keep-alive form some peers send.
pub const METHOD_BEAT_SHORT: &str = "b";

// ── ProtocolMessage ──────────────────────────────────────────────

/// A single decoded or to-be-encoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolMessage {
    /// Authentication request sent by the device.
    Checkin { device_id: String, api_key: String },

    /// Informational greeting from the broker.
    Welcome,

    /// The broker accepted the check-in.
    CheckinOk,

    /// One sampled data-point value.
    Update {
        device_id: String,
        data_point_id: String,
        value: String,
    },

    /// A remote instruction for the local actuator.
    Command(RemoteCommand),

    /// Keep-alive.
    Heartbeat,
}

impl ProtocolMessage {
    /// The method value this variant is written with.
    pub fn method(&self) -> &'static str {
        match self {
            Self::Checkin { .. } => METHOD_CHECKIN,
            Self::Welcome => METHOD_WELCOME,
            Self::CheckinOk => METHOD_CHECKIN_OK,
            Self::Update { .. } => METHOD_UPDATE,
            Self::Command(_) => METHOD_SAY,
            Self::Heartbeat => METHOD_BEAT,
        }
    }

    /// Build a `Command` from the raw `"C"` field text.
    pub fn command_from_text(text: &str) -> Self {
        Self::Command(RemoteCommand::parse(text))
    }

    /// Convenience constructor for a bare verb.
    pub fn command(verb: &str) -> Self {
        Self::Command(RemoteCommand::new(verb, None))
    }
}

// ── RemoteCommand ────────────────────────────────────────────────

/// The verb and optional argument carried in a `say` message's `"C"` field.
///
/// Always held in the form the wire text parses back to: the verb is empty
/// or a single whitespace-free token, and the argument is trimmed and
/// non-empty. Encoding and decoding therefore preserve it exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    verb: String,
    argument: Option<String>,
}

impl RemoteCommand {
    /// Parse raw `"C"` text. The first whitespace-delimited token is the
    /// verb; the trimmed rest, if any, is the argument.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        let (verb, argument) = match text.split_once(char::is_whitespace) {
            Some((verb, rest)) => {
                let rest = rest.trim();
                (verb, (!rest.is_empty()).then(|| rest.to_string()))
            }
            None => (text, None),
        };
        Self {
            verb: verb.to_string(),
            argument,
        }
    }

    /// Build from parts, normalised exactly as the wire text would be.
    ///
    /// An empty verb followed by an argument therefore takes the argument's
    /// first token as its verb.
    pub fn new(verb: &str, argument: Option<&str>) -> Self {
        match argument {
            Some(arg) => Self::parse(&format!("{verb} {arg}")),
            None => Self::parse(verb),
        }
    }

    pub fn verb(&self) -> &str {
        &self.verb
    }

    pub fn argument(&self) -> Option<&str> {
        self.argument.as_deref()
    }

    /// The `"C"` field text.
    pub fn to_text(&self) -> String {
        match &self.argument {
            Some(arg) => format!("{} {arg}", self.verb),
            None => self.verb.clone(),
        }
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl fmt::Display for ProtocolMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Checkin { device_id, .. } => write!(f, "Checkin({device_id})"),
            Self::Welcome => write!(f, "Welcome"),
            Self::CheckinOk => write!(f, "CheckinOk"),
            Self::Update {
                data_point_id,
                value,
                ..
            } => write!(f, "Update({data_point_id}={value})"),
            Self::Command(cmd) => write!(f, "Command({cmd})"),
            Self::Heartbeat => write!(f, "Heartbeat"),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
