//! # Action protocol
//!
//! Correlated, asynchronous request/response/error exchanges over a
//! [`shm_transport::Endpoint`].
//!
//! ## Philosophy
//!
//! - **Correlation ids are the only truth**: replies may arrive in any
//!   order; matching is by id, never by position
//! - **Errors are data**: a business-level failure travels as the error
//!   variant of a reply, through the same handler as success
//! - **Bounded concurrency**: server-side requests run on a fixed worker
//!   pool that is joined on shutdown, not on detached threads
//!
//! ## Architecture
//!
//! An [`ActionContract`] names one RPC and its `Params`/`Response` shapes.
//! The derived wire types ([`ActionData`], [`ResponseData`]) are ordinary
//! registry messages. [`ActionServer`] turns inbound requests into pool jobs
//! and replies on the same endpoint; [`ActionClient`] owns the
//! pending-request table and routes each reply to the handler that issued
//! the matching request.

mod client;
mod contract;
mod pool;
mod server;

pub use client::ActionClient;
pub use contract::{
    register_contract, ActionContract, ActionData, ActionError, ActionResult, ResponseData,
};
pub use pool::WorkerPool;
pub use server::{generate_id, ActionServer};
