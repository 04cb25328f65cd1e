//! # Inter-Process Communication (IPC) core
//!
//! This crate defines the typed message layer shared by both ends of an
//! endpoint: the message capability trait, the type registry, and the JSON
//! envelope codec.
//!
//! ## Philosophy
//!
//! - **Messages, not byte soup**: every payload is a typed, serializable value
//! - **Explicit registries, not statics**: the registry is constructed at
//!   process start and injected wherever it is needed
//! - **Stable identifiers on the wire**: dispatch is keyed by user-chosen
//!   strings, never by compiler-generated type names
//!
//! ## Architecture
//!
//! A typed value travels as an envelope `{"id": <type-identifier>,
//! "payload": {...}}`. The [`TypeRegistry`] maps the process-local type to
//! its identifier on encode, and supplies a constructor for inbound payloads
//! on decode. Registration happens once, before any send or receive.

pub mod envelope;
pub mod error;
pub mod message;
pub mod registry;

pub use envelope::{decode, encode};
pub use error::IpcError;
pub use message::Message;
pub use registry::TypeRegistry;
