//! Action contracts and their derived wire types.

use ipc::{IpcError, TypeRegistry};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::marker::PhantomData;

/// One RPC contract: a stable name plus the `Params` and `Response` shapes.
///
/// The name is conventionally namespaced (`"camera::set_zoom"`); the wire
/// type identifiers derive from it and must be unique within a process's
/// registry. Both shapes serialize to JSON objects (braced field structs).
pub trait ActionContract: 'static {
    const NAME: &'static str;

    type Params: Serialize + DeserializeOwned + Clone + Send + 'static;
    type Response: Serialize + DeserializeOwned + Clone + Send + 'static;

    /// Identifier of the request wire type.
    fn action_identifier() -> String {
        format!("{}_action", Self::NAME)
    }

    /// Identifier of the reply wire type.
    fn response_identifier() -> String {
        format!("{}_response", Self::NAME)
    }
}

/// Registers both wire types of `A` with the registry.
///
/// Call once per contract at process start, before any endpoint exists.
pub fn register_contract<A: ActionContract>(registry: &TypeRegistry) -> Result<(), IpcError> {
    registry.register::<ActionData<A>>(&A::action_identifier())?;
    registry.register::<ResponseData<A>>(&A::response_identifier())?;
    Ok(())
}

/// Business-level failure reported by a server-side handler.
///
/// Travels inside the reply and reaches the client through the normal
/// handler path, distinguished by the result variant rather than a thrown
/// transport error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionError {
    pub message: String,
    pub code: i32,
}

impl ActionError {
    /// Code carried by replies synthesized when a pending request expires.
    pub const TIMEOUT_CODE: i32 = -1;

    pub fn new(message: impl Into<String>, code: i32) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }

    pub(crate) fn timed_out() -> Self {
        Self::new("request expired before a reply arrived", Self::TIMEOUT_CODE)
    }
}

/// Exactly one of a response or an error, per reply.
pub type ActionResult<A> = Result<<A as ActionContract>::Response, ActionError>;

/// Request wire shape: `{"id": <correlation-id>, <Params fields...>}`.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct ActionData<A: ActionContract> {
    pub id: String,
    #[serde(flatten)]
    pub params: A::Params,
}

impl<A: ActionContract> ActionData<A> {
    pub fn new(id: String, params: A::Params) -> Self {
        Self { id, params }
    }
}

/// Reply wire shape: `{"id", "error.set", "error.message", "error.code",
/// <Response fields...>}`; response fields are present only on success.
///
/// The response side is kept as an untyped field map so that an error reply
/// (which carries no response fields) still decodes; [`ResponseData::result`]
/// reconstructs the typed value for whichever variant the tag marks as set.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct ResponseData<A: ActionContract> {
    pub id: String,
    #[serde(rename = "error.set")]
    pub error_set: bool,
    #[serde(rename = "error.message")]
    pub error_message: String,
    #[serde(rename = "error.code")]
    pub error_code: i32,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    #[serde(skip)]
    marker: PhantomData<fn() -> A>,
}

impl<A: ActionContract> ResponseData<A> {
    pub fn success(id: String, response: &A::Response) -> Result<Self, IpcError> {
        let fields = match serde_json::to_value(response) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                return Err(IpcError::data_format(format!(
                    "response for `{}` must serialize to a JSON object",
                    A::NAME
                )))
            }
            Err(err) => {
                return Err(IpcError::data_format(format!(
                    "unable to serialize response for `{}`: {err}",
                    A::NAME
                )))
            }
        };
        Ok(Self {
            id,
            error_set: false,
            error_message: String::new(),
            error_code: 0,
            fields,
            marker: PhantomData,
        })
    }

    pub fn failure(id: String, error: ActionError) -> Self {
        Self {
            id,
            error_set: true,
            error_message: error.message,
            error_code: error.code,
            fields: Map::new(),
            marker: PhantomData,
        }
    }

    /// Reconstructs the typed outcome this reply carries.
    pub fn result(&self) -> Result<ActionResult<A>, IpcError> {
        if self.error_set {
            return Ok(Err(ActionError::new(
                self.error_message.clone(),
                self.error_code,
            )));
        }
        let response = serde_json::from_value(Value::Object(self.fields.clone())).map_err(
            |err| {
                IpcError::data_format(format!(
                    "reply `{}` does not carry a valid response: {err}",
                    A::response_identifier()
                ))
            },
        )?;
        Ok(Ok(response))
    }
}
