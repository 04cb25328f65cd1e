//! Client side of the action protocol.

use crate::contract::{ActionContract, ActionData, ActionError, ActionResult, ResponseData};
use crate::server::generate_id;
use ipc::IpcError;
use shm_transport::{Endpoint, EndpointHandle};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

type ResponseHandler<A> = Box<dyn FnOnce(ActionResult<A>, &str) + Send>;

struct PendingEntry<A: ActionContract> {
    handler: ResponseHandler<A>,
    sent_at: Instant,
}

/// Issues requests for one action type and routes each reply to the handler
/// that issued the matching request.
///
/// The pending-request table lives here: entries are inserted when a request
/// is sent and removed exactly once when its reply arrives (or when
/// [`expire_stale`] reclaims them). One lock guards the table; it is never
/// held across a handler invocation, so handlers may freely issue follow-up
/// requests of the same type.
///
/// Construct at most one `ActionClient` per action type per endpoint:
/// construction binds the reply slot, and a second client would steal it.
///
/// [`expire_stale`]: ActionClient::expire_stale
pub struct ActionClient<A: ActionContract> {
    endpoint: EndpointHandle,
    pending: Arc<Mutex<HashMap<String, PendingEntry<A>>>>,
}

impl<A: ActionContract> ActionClient<A> {
    /// Binds the reply slot for `A` on `endpoint` and creates an empty
    /// pending table. Both wire types of `A` must already be registered.
    pub fn new(endpoint: &Endpoint) -> Result<Self, IpcError> {
        let pending: Arc<Mutex<HashMap<String, PendingEntry<A>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let table = pending.clone();
        endpoint.register_slot::<ResponseData<A>, _>(move |_, reply| {
            // Decode first: a malformed reply must not consume the entry.
            let outcome = reply.result()?;
            let entry = table
                .lock()
                .expect("pending table lock poisoned")
                .remove(&reply.id)
                .ok_or_else(|| IpcError::BadActionId(reply.id.clone()))?;
            // Lock released; the handler may submit again without deadlock.
            (entry.handler)(outcome, &reply.id);
            Ok(())
        })?;

        Ok(Self {
            endpoint: endpoint.handle(),
            pending,
        })
    }

    /// Sends one asynchronous request and returns its correlation id.
    ///
    /// `handler` is invoked exactly once, on the endpoint's receive thread,
    /// with the typed response-or-error and the id. If the send itself fails
    /// the entry is removed again and the error is returned synchronously.
    pub fn submit<F>(&self, params: A::Params, handler: F) -> Result<String, IpcError>
    where
        F: FnOnce(ActionResult<A>, &str) + Send + 'static,
    {
        let id = generate_id();

        // Insert before sending: the reply can race the return of `send`.
        self.pending
            .lock()
            .expect("pending table lock poisoned")
            .insert(
                id.clone(),
                PendingEntry {
                    handler: Box::new(handler),
                    sent_at: Instant::now(),
                },
            );

        let request = ActionData::<A>::new(id.clone(), params);
        if let Err(err) = self.endpoint.send(&request) {
            self.pending
                .lock()
                .expect("pending table lock poisoned")
                .remove(&id);
            return Err(err);
        }

        Ok(id)
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .expect("pending table lock poisoned")
            .len()
    }

    /// Reclaims requests older than `ttl`, completing each with a timeout
    /// error ([`ActionError::TIMEOUT_CODE`]). Returns how many were expired.
    ///
    /// A request whose peer never replies would otherwise occupy the table
    /// forever; callers decide the sweep cadence.
    pub fn expire_stale(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let expired: Vec<(String, ResponseHandler<A>)> = {
            let mut table = self.pending.lock().expect("pending table lock poisoned");
            let stale: Vec<String> = table
                .iter()
                .filter(|(_, entry)| now.duration_since(entry.sent_at) >= ttl)
                .map(|(id, _)| id.clone())
                .collect();
            stale
                .into_iter()
                .filter_map(|id| table.remove(&id).map(|entry| (id, entry.handler)))
                .collect()
        };

        let count = expired.len();
        for (id, handler) in expired {
            handler(Err(ActionError::timed_out()), &id);
        }
        count
    }
}
