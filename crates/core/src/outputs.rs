//! Opaque handler outputs
//!
//! Handlers may emit arbitrary structured values alongside media frames.
//! These are queued per session and pulled by the client through the
//! output hook, either one-shot or as a server-sent event stream.

use serde_json::Value;

/// An opaque tuple of values emitted by a handler
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AdditionalOutputs(pub Vec<Value>);

impl AdditionalOutputs {
    pub fn new(args: Vec<Value>) -> Self {
        Self(args)
    }

    /// The payload delivered through the output hook
    pub fn into_args(self) -> Vec<Value> {
        self.0
    }

    pub fn args(&self) -> &[Value] {
        &self.0
    }
}

impl From<Vec<Value>> for AdditionalOutputs {
    fn from(args: Vec<Value>) -> Self {
        Self(args)
    }
}
