use thiserror::Error;

/// Errors raised while handling bridge traffic or operator commands.
///
/// Only `Conflict` is meant to reach a caller as a failed request. The
/// other variants are logged where they occur and the offending message is
/// dropped, so a single bad message never stops the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// Malformed or incomplete message.
    #[error("invalid message on {topic}: {message}")]
    Validation { topic: String, message: String },

    /// A second pairing session, or a friendly name already in use.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The message references a device the registry does not know.
    #[error("unknown device: {0}")]
    Lookup(String),

    /// The bridge reported something local configuration does not allow.
    #[error("configuration prevents handling: {0}")]
    Config(String),

    /// The outbound channel to the transport is gone.
    #[error("transport unavailable: {0}")]
    Transport(String),
}

impl BridgeError {
    pub fn validation(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            topic: topic.into(),
            message: message.into(),
        }
    }
}
