//! Bidirectional mapping between process-local types and wire identifiers.

use crate::error::IpcError;
use crate::message::Message;
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::RwLock;

type Constructor = Box<dyn Fn(Value) -> Result<Box<dyn Any + Send>, IpcError> + Send + Sync>;

/// Registry of concrete message types.
///
/// Each registered type is bound to a stable, user-chosen string identifier
/// and a constructor that rebuilds the typed value from an inbound parse
/// tree. The registry is an explicit object: construct it once at process
/// start, register every message type before the first send or receive, and
/// share it as `Arc<TypeRegistry>` with each endpoint.
///
/// Identifiers must be unique within a process; the convention is
/// `"<namespace>::<action-name>_action"` and `"..._response"`.
#[derive(Default)]
pub struct TypeRegistry {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    constructors: HashMap<String, Constructor>,
    identifiers: HashMap<TypeId, String>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `T` to `identifier` in both directions.
    ///
    /// Fails with [`IpcError::Type`] if the identifier is already taken or
    /// the type is already registered; the first registration stays active.
    pub fn register<T: Message>(&self, identifier: &str) -> Result<(), IpcError> {
        let mut inner = self.inner.write().expect("type registry lock poisoned");

        if inner.constructors.contains_key(identifier) {
            return Err(IpcError::type_error(format!(
                "identifier `{identifier}` is already used"
            )));
        }
        if let Some(existing) = inner.identifiers.get(&TypeId::of::<T>()) {
            return Err(IpcError::type_error(format!(
                "type is already registered as `{existing}`"
            )));
        }

        let id_owned = identifier.to_string();
        inner.constructors.insert(
            identifier.to_string(),
            Box::new(move |fields| {
                let msg: T = serde_json::from_value(fields).map_err(|err| {
                    IpcError::data_format(format!(
                        "payload does not match field bindings for `{id_owned}`: {err}"
                    ))
                })?;
                Ok(Box::new(msg))
            }),
        );
        inner
            .identifiers
            .insert(TypeId::of::<T>(), identifier.to_string());
        Ok(())
    }

    /// Returns the identifier registered for `T`.
    ///
    /// Fails with [`IpcError::Type`] if `T` was never registered.
    pub fn identifier_of<T: Message>(&self) -> Result<String, IpcError> {
        let inner = self.inner.read().expect("type registry lock poisoned");
        inner
            .identifiers
            .get(&TypeId::of::<T>())
            .cloned()
            .ok_or_else(|| {
                IpcError::type_error(format!(
                    "type `{}` is not registered",
                    std::any::type_name::<T>()
                ))
            })
    }

    /// Reconstructs a typed message from an inbound parse tree.
    ///
    /// Fails with [`IpcError::DataFormat`] if the identifier is unknown or
    /// the fields do not match the registered type.
    pub fn construct(
        &self,
        identifier: &str,
        fields: Value,
    ) -> Result<Box<dyn Any + Send>, IpcError> {
        let inner = self.inner.read().expect("type registry lock poisoned");
        let ctor = inner.constructors.get(identifier).ok_or_else(|| {
            IpcError::data_format(format!("unknown identifier `{identifier}` in IPC data"))
        })?;
        ctor(fields)
    }

    /// Whether `identifier` has a registered constructor.
    pub fn contains(&self, identifier: &str) -> bool {
        let inner = self.inner.read().expect("type registry lock poisoned");
        inner.constructors.contains_key(identifier)
    }
}
