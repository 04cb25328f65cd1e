//! # Shared-Memory Transport
//!
//! A full-duplex, byte-oriented channel between exactly one server process
//! and one client process on the same host, backed by a named POSIX
//! shared-memory object.
//!
//! ## Philosophy
//!
//! - **Handshake, not polling**: each direction is a capacity-1 slot guarded
//!   by process-shared semaphores; nobody spins, nobody loses a wakeup
//! - **One server, one client**: the pairing is enforced at attach time, not
//!   assumed
//! - **Signaled shutdown**: tearing an endpoint down wakes every thread that
//!   could be blocked on it
//!
//! ## Architecture
//!
//! The server creates the shared region and constructs two [`layout`] slots
//! in place, one per direction; the client opens the region and sees the
//! mirror image. Each [`Endpoint`] runs one background receive thread that
//! blocks on the incoming slot, decodes arriving envelopes through the
//! injected [`ipc::TypeRegistry`], and dispatches to per-type slot handlers.

mod layout;
mod endpoint;

pub use endpoint::{Endpoint, EndpointHandle, Role};
pub use layout::MAX_MESSAGE_SIZE;
