//! Server side of the action protocol.

use crate::contract::{ActionContract, ActionData, ActionResult, ResponseData};
use crate::pool::WorkerPool;
use ipc::IpcError;
use shm_transport::{Endpoint, EndpointHandle};
use std::sync::Arc;
use uuid::Uuid;

/// Produces a globally-unique opaque correlation id: 32 lowercase hex
/// characters of 128-bit randomness.
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Dispatches inbound action requests to registered handlers.
///
/// Each request becomes one job on a bounded worker pool, so requests of the
/// same action type may be processed concurrently and complete out of order;
/// the reply's correlation id is the only thing a client may rely on.
pub struct ActionServer {
    endpoint: EndpointHandle,
    pool: Arc<WorkerPool>,
}

impl ActionServer {
    /// Wraps `endpoint` with a pool of `workers` handler threads.
    pub fn new(endpoint: &Endpoint, workers: usize) -> Result<Self, IpcError> {
        Ok(Self {
            endpoint: endpoint.handle(),
            pool: Arc::new(WorkerPool::new("action-worker", workers)?),
        })
    }

    /// Registers the handler for action `A`.
    ///
    /// `handler` receives the request params and the correlation id, and
    /// returns the response-or-error that will travel back. It runs on a
    /// pool worker, never on the receive thread, so a slow handler does not
    /// stall other message types.
    pub fn register_action<A, F>(&self, handler: F) -> Result<(), IpcError>
    where
        A: ActionContract,
        F: Fn(A::Params, &str) -> ActionResult<A> + Send + Sync + 'static,
    {
        let pool = self.pool.clone();
        let handler = Arc::new(handler);

        self.endpoint
            .register_slot::<ActionData<A>, _>(move |endpoint, request| {
                let endpoint = endpoint.clone();
                let handler = handler.clone();
                let id = request.id.clone();
                let params = request.params.clone();

                pool.spawn(move || {
                    let reply = match handler(params, &id) {
                        Ok(response) => match ResponseData::<A>::success(id.clone(), &response) {
                            Ok(reply) => reply,
                            Err(err) => {
                                log::error!(
                                    "unable to encode response for `{}` (id {id}): {err}",
                                    A::NAME
                                );
                                return;
                            }
                        },
                        Err(error) => ResponseData::<A>::failure(id.clone(), error),
                    };
                    if let Err(err) = endpoint.send(&reply) {
                        log::error!("unable to send reply for `{}` (id {id}): {err}", A::NAME);
                    }
                });
                Ok(())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_ids_are_unique_hex() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let id = generate_id();
            assert_eq!(id.len(), 32);
            assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
            assert!(seen.insert(id), "correlation id collision");
        }
    }
}
