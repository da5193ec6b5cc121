//! Control-channel messages
//!
//! The control channel is a reliable in-order JSON side channel carried on
//! the WebRTC data channel (label `text`) or the media WebSocket. Messages
//! are `{"type": ..., "data": ...}` objects. Senders must never block a
//! media pump; implementations enqueue and let a writer task drain.

use serde_json::{json, Value};

/// A structured message on the control side-channel
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMsg {
    /// Ask the client to POST fresh input values to the input hook
    SendInput,
    /// Announce that an `AdditionalOutputs` entry was queued
    FetchOutput,
    /// A configured stopword was matched; payload is the matched token
    Stopword(String),
    Error(String),
    Warning(String),
    Log(String),
    /// The turn-taking engine detected the end of a user utterance
    PauseDetected,
    /// The next outbound audio frame starts a response
    ResponseStarting,
    /// The peer did not reach connected state within the watchdog deadline
    ConnectionTimeout,
}

impl ControlMsg {
    /// Wire-format type tag
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMsg::SendInput => "send_input",
            ControlMsg::FetchOutput => "fetch_output",
            ControlMsg::Stopword(_) => "stopword",
            ControlMsg::Error(_) => "error",
            ControlMsg::Warning(_) => "warning",
            ControlMsg::Log(_) => "log",
            ControlMsg::PauseDetected => "pause_detected",
            ControlMsg::ResponseStarting => "response_starting",
            ControlMsg::ConnectionTimeout => "connection_timeout",
        }
    }

    /// Serialize to the `{"type", "data"}` wire object
    pub fn to_json(&self) -> Value {
        let data: Value = match self {
            ControlMsg::SendInput | ControlMsg::FetchOutput => json!([]),
            ControlMsg::Stopword(word) => json!(word),
            ControlMsg::Error(msg) | ControlMsg::Warning(msg) | ControlMsg::Log(msg) => json!(msg),
            ControlMsg::PauseDetected | ControlMsg::ResponseStarting => json!(""),
            ControlMsg::ConnectionTimeout => json!(""),
        };
        json!({ "type": self.kind(), "data": data })
    }

    /// Serialize to a wire string
    pub fn to_wire(&self) -> String {
        self.to_json().to_string()
    }

    /// Parse a wire object. Lifecycle events that ride the `log` kind in
    /// older clients (`pause_detected`, `response_starting`) are folded
    /// into their first-class variants.
    pub fn from_json(value: &Value) -> Option<ControlMsg> {
        let kind = value.get("type")?.as_str()?;
        let data = value.get("data").cloned().unwrap_or(Value::Null);
        let text = || data.as_str().unwrap_or_default().to_string();
        match kind {
            "send_input" => Some(ControlMsg::SendInput),
            "fetch_output" => Some(ControlMsg::FetchOutput),
            "stopword" => Some(ControlMsg::Stopword(text())),
            "error" => Some(ControlMsg::Error(text())),
            "warning" => Some(ControlMsg::Warning(text())),
            "log" => match data.as_str() {
                Some("pause_detected") => Some(ControlMsg::PauseDetected),
                Some("response_starting") => Some(ControlMsg::ResponseStarting),
                _ => Some(ControlMsg::Log(text())),
            },
            "pause_detected" => Some(ControlMsg::PauseDetected),
            "response_starting" => Some(ControlMsg::ResponseStarting),
            "connection_timeout" => Some(ControlMsg::ConnectionTimeout),
            _ => None,
        }
    }
}

/// Outbound side of the control channel.
///
/// `send` must not block: implementations enqueue the message and a writer
/// task drains the queue to the peer. Delivery is at-least-once; dropping a
/// message when the peer is gone is acceptable.
pub trait ControlSender: Send + Sync {
    fn send(&self, msg: ControlMsg);
}
