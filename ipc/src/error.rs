//! Error taxonomy shared by the transport and action layers.

use thiserror::Error;

/// Errors raised by the IPC core.
///
/// Failures while decoding or dispatching an inbound message are routed to
/// the owning endpoint's exception handler; failures while encoding or
/// sending surface synchronously to the caller. There is no automatic retry
/// anywhere in this crate family.
#[derive(Debug, Error)]
pub enum IpcError {
    /// Shared memory resource creation/open/attach failure, or an oversized
    /// payload that cannot fit the fixed-size slot.
    #[error("shared memory: {0}")]
    SharedMemory(String),

    /// Use of an unregistered message type, or a duplicate registration.
    #[error("type registry: {0}")]
    Type(String),

    /// Malformed JSON, missing envelope fields, unknown type identifier, or
    /// a payload that does not match the registered type's fields.
    #[error("data format: {0}")]
    DataFormat(String),

    /// A reply arrived whose correlation id has no pending request.
    #[error("unknown correlation id `{0}` in action response")]
    BadActionId(String),
}

impl IpcError {
    pub fn shared_memory(msg: impl Into<String>) -> Self {
        Self::SharedMemory(msg.into())
    }

    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::Type(msg.into())
    }

    pub fn data_format(msg: impl Into<String>) -> Self {
        Self::DataFormat(msg.into())
    }
}
