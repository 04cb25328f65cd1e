//! Message capability trait.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Capability required of every value that travels over an endpoint.
///
/// A message produces a parse-tree representation of its fields
/// (`serde_json::to_value`) and is populated back from one
/// (`serde_json::from_value`). Concrete message types are plain serde
/// structs; there is no base-class hierarchy and no per-type boilerplate
/// beyond the derives.
///
/// The blanket impl makes any owned serde struct a message. Whether a type
/// may actually cross an endpoint is decided by the [`TypeRegistry`]: only
/// registered types have a wire identifier and an inbound constructor.
///
/// [`TypeRegistry`]: crate::TypeRegistry
pub trait Message: Serialize + DeserializeOwned + Send + 'static {}

impl<T> Message for T where T: Serialize + DeserializeOwned + Send + 'static {}
