//! Named full-duplex IPC endpoint with per-type dispatch.

use crate::layout::{ShmRegion, SlotRef, MAX_MESSAGE_SIZE};
use ipc::{IpcError, Message, TypeRegistry};
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

/// Which side of the endpoint this process plays.
///
/// The server creates and ultimately destroys the named OS resource; the
/// client only attaches to an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

type SlotHandler =
    Arc<dyn Fn(&EndpointHandle, &(dyn Any + Send)) -> Result<(), IpcError> + Send + Sync>;
type ExceptionHandler = Arc<dyn Fn(&IpcError) + Send + Sync>;

/// Endpoint state addressable from handles and worker threads.
///
/// The mapped region itself is owned by [`Endpoint`], not by this struct:
/// handles only carry copyable [`SlotRef`]s into it, and `alive` is lowered
/// before the endpoint tears the mapping down, so an outliving handle fails
/// its next send instead of touching freed memory.
struct Shared {
    role: Role,
    name: String,
    send_slot: SlotRef,
    recv_slot: SlotRef,
    alive: AtomicBool,
    registry: Arc<TypeRegistry>,
    slots: Mutex<HashMap<String, SlotHandler>>,
    exception_handler: Mutex<Option<ExceptionHandler>>,
}

impl Shared {
    /// Writes one complete serialized message into the outgoing slot,
    /// blocking while the peer has not drained the previous one.
    fn send_raw(&self, raw: &str) -> Result<(), IpcError> {
        if !self.alive.load(Ordering::Acquire) {
            return Err(IpcError::shared_memory(format!(
                "endpoint `{}` is shut down",
                self.name
            )));
        }

        let bytes = raw.as_bytes();
        // Rejecting before the handshake means a failed send consumes no
        // permit and leaves the direction usable.
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(IpcError::shared_memory(format!(
                "IPC packet size ({}) exceeds limit ({MAX_MESSAGE_SIZE})",
                bytes.len()
            )));
        }

        let slot = self.send_slot;
        slot.wait_empty()?;
        slot.wait_guard()?;
        slot.write_message(bytes);
        slot.post_guard()?;
        slot.post_full()
    }

    fn send_message<T: Message>(&self, msg: &T) -> Result<(), IpcError> {
        let raw = ipc::encode(&self.registry, msg)?;
        self.send_raw(&raw)
    }

    fn register_slot<T, F>(self: &Arc<Self>, handler: F) -> Result<(), IpcError>
    where
        T: Message,
        F: Fn(&EndpointHandle, &T) -> Result<(), IpcError> + Send + Sync + 'static,
    {
        let identifier = self.registry.identifier_of::<T>()?;
        let erased: SlotHandler = Arc::new(move |endpoint, any| {
            let msg = any.downcast_ref::<T>().ok_or_else(|| {
                IpcError::data_format("dispatched message has an unexpected concrete type")
            })?;
            handler(endpoint, msg)
        });
        self.slots
            .lock()
            .expect("slot map lock poisoned")
            .insert(identifier, erased);
        Ok(())
    }

    /// Decodes and dispatches one inbound message on the receive thread.
    fn dispatch(self: &Arc<Self>, raw: &str) -> Result<(), IpcError> {
        let (identifier, payload) = ipc::decode(raw)?;
        let msg = self.registry.construct(&identifier, payload)?;

        let handler = self
            .slots
            .lock()
            .expect("slot map lock poisoned")
            .get(&identifier)
            .cloned()
            .ok_or_else(|| {
                IpcError::data_format(format!(
                    "IPC message type `{identifier}` is not connected to any slot"
                ))
            })?;

        let handle = EndpointHandle {
            shared: self.clone(),
        };
        handler(&handle, &*msg)
    }

    /// Routes a recoverable receive-side failure. Without a registered
    /// exception handler the failure is a programmer error and fatal.
    fn report(&self, err: IpcError) {
        let handler = self
            .exception_handler
            .lock()
            .expect("exception handler lock poisoned")
            .clone();
        match handler {
            Some(handler) => handler(&err),
            None => {
                log::error!("unhandled IPC failure on endpoint `{}`: {err}", self.name);
                std::process::abort();
            }
        }
    }
}

fn receive_loop(shared: Arc<Shared>) {
    let recv = shared.recv_slot;
    loop {
        if recv.wait_full().is_err() || recv.wait_guard().is_err() {
            // Semaphore failure only happens when the region is torn down
            // under us; nothing left to receive.
            log::warn!(
                "receive worker on `{}` lost its handshake semaphores",
                shared.name
            );
            break;
        }

        if recv.is_shutdown() {
            // Leave the slot writable so a successor peer is not stuck.
            let _ = recv.post_guard();
            let _ = recv.post_empty();
            break;
        }

        let raw = recv.read_message();
        // Dispatch completes before the empty permit is released: the Nth
        // message is fully drained before the sender's (N+1)th send can
        // proceed past its first blocking point.
        let result = match String::from_utf8(raw) {
            Ok(text) => shared.dispatch(&text),
            Err(_) => Err(IpcError::data_format("IPC message is not valid UTF-8")),
        };

        let _ = recv.post_guard();
        let _ = recv.post_empty();

        if let Err(err) = result {
            shared.report(err);
        }
    }
}

/// One process's end of a named, full-duplex shared-memory channel.
///
/// Constructing an endpoint maps the shared region (creating it in the
/// [`Role::Server`] case) and spawns the single background receive thread.
/// Dropping it signals that thread and joins it, then tears the region
/// down: the server removes the named OS resource, the client releases its
/// seat. Teardown happens on endpoint drop even while handles are still
/// alive; those handles fail their next send. A server additionally signals
/// the attached client's receiver before removing the OS resource, so no
/// peer is left permanently blocked.
pub struct Endpoint {
    shared: Arc<Shared>,
    // Held for teardown: the Drop impl joins the receive worker before this
    // field's own drop unmaps the region.
    _region: ShmRegion,
    worker: Option<thread::JoinHandle<()>>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint").finish_non_exhaustive()
    }
}

impl Endpoint {
    /// Creates (server) or attaches to (client) the named endpoint.
    ///
    /// The registry must already contain every message type this process
    /// will send or receive; it is shared, not owned.
    pub fn new(role: Role, name: &str, registry: Arc<TypeRegistry>) -> Result<Self, IpcError> {
        let region = match role {
            Role::Server => ShmRegion::create(name)?,
            Role::Client => ShmRegion::open(name)?,
        };

        let (send_slot, recv_slot) = match role {
            Role::Server => (region.slot(0), region.slot(1)),
            Role::Client => (region.slot(1), region.slot(0)),
        };

        let shared = Arc::new(Shared {
            role,
            name: name.to_string(),
            send_slot,
            recv_slot,
            alive: AtomicBool::new(true),
            registry,
            slots: Mutex::new(HashMap::new()),
            exception_handler: Mutex::new(None),
        });

        let worker = thread::Builder::new()
            .name(format!("ipc-recv-{name}"))
            .spawn({
                let shared = shared.clone();
                move || receive_loop(shared)
            })
            .map_err(|err| {
                IpcError::shared_memory(format!("unable to spawn receive worker: {err}"))
            })?;

        Ok(Self {
            shared,
            _region: region,
            worker: Some(worker),
        })
    }

    pub fn role(&self) -> Role {
        self.shared.role
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// A cheap, cloneable handle for use inside slot handlers and worker
    /// threads. Handles stay valid for the endpoint's lifetime.
    pub fn handle(&self) -> EndpointHandle {
        EndpointHandle {
            shared: self.shared.clone(),
        }
    }

    /// Sends one message, blocking while the outgoing single-item slot is
    /// occupied. Fails with [`IpcError::SharedMemory`] if the serialized
    /// form exceeds [`MAX_MESSAGE_SIZE`]; nothing is written in that case.
    pub fn send<T: Message>(&self, msg: &T) -> Result<(), IpcError> {
        self.shared.send_message(msg)
    }

    /// Binds a handler to `T`'s registered identifier. The handler runs on
    /// the receive thread; re-registering the same type replaces the
    /// previous handler.
    pub fn register_slot<T, F>(&self, handler: F) -> Result<(), IpcError>
    where
        T: Message,
        F: Fn(&EndpointHandle, &T) -> Result<(), IpcError> + Send + Sync + 'static,
    {
        self.shared.register_slot(handler)
    }

    /// Installs the handler invoked for recoverable receive-side failures,
    /// replacing any previous one. Without it such failures abort.
    pub fn register_exception_handler<F>(&self, handler: F)
    where
        F: Fn(&IpcError) + Send + Sync + 'static,
    {
        *self
            .shared
            .exception_handler
            .lock()
            .expect("exception handler lock poisoned") = Some(Arc::new(handler));
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        // Outliving handles must not touch the region once this returns.
        self.shared.alive.store(false, Ordering::Release);

        let recv = self.shared.recv_slot;
        recv.set_shutdown(true);
        let _ = recv.post_full();

        if self.shared.role == Role::Server {
            // The region is going away with us; wake the client's receiver
            // so it observes shutdown instead of blocking forever.
            let send = self.shared.send_slot;
            send.set_shutdown(true);
            let _ = send.post_full();
        }

        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }

        // Do not leave the flag set for a successor attaching to the same
        // direction.
        recv.set_shutdown(false);

        // The region field drops after this body: unmap, and for the server
        // unlink the OS resource, regardless of which handles still exist.
    }
}

/// Cloneable sending/registration handle backing an [`Endpoint`].
///
/// Slot handlers receive one of these, which is what lets a handler answer
/// on the same endpoint it was invoked from.
#[derive(Clone)]
pub struct EndpointHandle {
    shared: Arc<Shared>,
}

impl EndpointHandle {
    pub fn role(&self) -> Role {
        self.shared.role
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// See [`Endpoint::send`].
    pub fn send<T: Message>(&self, msg: &T) -> Result<(), IpcError> {
        self.shared.send_message(msg)
    }

    /// See [`Endpoint::register_slot`].
    pub fn register_slot<T, F>(&self, handler: F) -> Result<(), IpcError>
    where
        T: Message,
        F: Fn(&EndpointHandle, &T) -> Result<(), IpcError> + Send + Sync + 'static,
    {
        self.shared.register_slot(handler)
    }
}
