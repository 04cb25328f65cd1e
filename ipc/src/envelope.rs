//! JSON envelope codec: `{"id": <type-identifier>, "payload": {...}}`.

use crate::error::IpcError;
use crate::message::Message;
use crate::registry::TypeRegistry;
use serde::Serialize;
use serde_json::Value;

#[derive(Serialize)]
struct Envelope {
    id: String,
    payload: Value,
}

/// Serializes `msg` into a wire envelope.
///
/// The registry supplies the type identifier; an unregistered type fails
/// with [`IpcError::Type`]. The transform itself is pure.
pub fn encode<T: Message>(registry: &TypeRegistry, msg: &T) -> Result<String, IpcError> {
    let id = registry.identifier_of::<T>()?;
    let payload = serde_json::to_value(msg)
        .map_err(|err| IpcError::data_format(format!("unable to serialize `{id}`: {err}")))?;
    serde_json::to_string(&Envelope { id, payload })
        .map_err(|err| IpcError::data_format(format!("unable to serialize envelope: {err}")))
}

/// Splits a wire envelope into its type identifier and payload tree.
///
/// Fails with [`IpcError::DataFormat`] when the input is not well-formed
/// JSON, is not an object, lacks `id` or `payload`, or `id` is not a string.
pub fn decode(raw: &str) -> Result<(String, Value), IpcError> {
    let doc: Value = serde_json::from_str(raw)
        .map_err(|err| IpcError::data_format(format!("invalid IPC JSON data: {err}")))?;

    let obj = doc
        .as_object()
        .ok_or_else(|| IpcError::data_format("IPC envelope must be a JSON object"))?;

    let id = obj
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| IpcError::data_format("IPC envelope lacks a string `id` field"))?
        .to_string();

    let payload = obj
        .get("payload")
        .cloned()
        .ok_or_else(|| IpcError::data_format("IPC envelope lacks a `payload` field"))?;

    Ok((id, payload))
}
