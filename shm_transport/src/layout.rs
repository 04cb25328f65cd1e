//! Shared-memory layout and the POSIX boundary.
//!
//! Everything in this module is compiled identically into the server and the
//! client process, so the `#[repr(C)]` structures below *are* the wire-level
//! contract for the mapped region. All unsafe code in the crate lives here.

use ipc::IpcError;
use std::ffi::CString;
use std::io;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};

/// Maximum serialized message size per slot occupancy, in bytes.
pub const MAX_MESSAGE_SIZE: usize = 4096;

/// One directional, capacity-1 message slot.
///
/// `guard` is a binary semaphore protecting the byte region, `empty`/`full`
/// implement the producer/consumer handshake: a write happens only when the
/// slot is empty, a read only when it is full. `shutdown` tells a blocked
/// receiver to exit instead of decoding.
#[repr(C)]
struct RawSlot {
    guard: libc::sem_t,
    empty: libc::sem_t,
    full: libc::sem_t,
    shutdown: AtomicU32,
    len: AtomicU32,
    bytes: [u8; MAX_MESSAGE_SIZE],
}

/// The complete mapped region: two slots composing one full-duplex link.
///
/// Slot 0 carries server-to-client traffic, slot 1 the reverse. `ready` is
/// raised by the server once in-place construction is finished;
/// `client_attached` holds the attach-time compare-and-set that enforces the
/// single-client pairing.
#[repr(C)]
struct RawChannel {
    ready: AtomicU32,
    client_attached: AtomicU32,
    slots: [RawSlot; 2],
}

fn os_error(context: String) -> IpcError {
    IpcError::shared_memory(format!("{context}: {}", io::Error::last_os_error()))
}

unsafe fn sem_init(sem: *mut libc::sem_t, value: u32, what: &str) -> Result<(), IpcError> {
    // pshared = 1: the semaphore lives in memory mapped by two processes.
    if libc::sem_init(sem, 1, value as libc::c_uint) != 0 {
        return Err(os_error(format!("unable to initialize `{what}` semaphore")));
    }
    Ok(())
}

unsafe fn sem_wait(sem: *mut libc::sem_t) -> Result<(), IpcError> {
    loop {
        if libc::sem_wait(sem) == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINTR) {
            return Err(IpcError::shared_memory(format!(
                "semaphore wait failed: {err}"
            )));
        }
        // Interrupted by a signal; retry.
    }
}

unsafe fn sem_post(sem: *mut libc::sem_t) -> Result<(), IpcError> {
    if libc::sem_post(sem) != 0 {
        return Err(os_error("semaphore post failed".to_string()));
    }
    Ok(())
}

/// Raw pointer view of one directional slot inside the mapped region.
///
/// Copyable and sendable so the receive worker and any number of senders can
/// address the same slot; all synchronization happens through the semaphores
/// it points at, never through Rust references to the shared bytes.
#[derive(Clone, Copy)]
pub(crate) struct SlotRef {
    ptr: *mut RawSlot,
}

// SAFETY: SlotRef is a plain pointer into a mapping that outlives every
// holder (the owning ShmRegion is dropped only after the receive worker has
// been joined). Cross-thread and cross-process access to the byte region is
// serialized by the guard semaphore; the flag words are atomics.
unsafe impl Send for SlotRef {}
unsafe impl Sync for SlotRef {}

impl SlotRef {
    fn init(self) -> Result<(), IpcError> {
        // SAFETY: called by the server exactly once on freshly ftruncate'd
        // (zeroed) memory, before `ready` is published.
        unsafe {
            sem_init(ptr::addr_of_mut!((*self.ptr).guard), 1, "guard")?;
            sem_init(ptr::addr_of_mut!((*self.ptr).empty), 1, "empty")?;
            sem_init(ptr::addr_of_mut!((*self.ptr).full), 0, "full")?;
        }
        Ok(())
    }

    fn destroy(self) {
        // SAFETY: called by the server during teardown, after the peer has
        // been signaled to shut down. Failure here is unreportable.
        unsafe {
            libc::sem_destroy(ptr::addr_of_mut!((*self.ptr).guard));
            libc::sem_destroy(ptr::addr_of_mut!((*self.ptr).empty));
            libc::sem_destroy(ptr::addr_of_mut!((*self.ptr).full));
        }
    }

    pub fn wait_empty(self) -> Result<(), IpcError> {
        // SAFETY: semaphore was initialized before `ready` was published.
        unsafe { sem_wait(ptr::addr_of_mut!((*self.ptr).empty)) }
    }

    pub fn post_empty(self) -> Result<(), IpcError> {
        // SAFETY: as above.
        unsafe { sem_post(ptr::addr_of_mut!((*self.ptr).empty)) }
    }

    pub fn wait_full(self) -> Result<(), IpcError> {
        // SAFETY: as above.
        unsafe { sem_wait(ptr::addr_of_mut!((*self.ptr).full)) }
    }

    pub fn post_full(self) -> Result<(), IpcError> {
        // SAFETY: as above.
        unsafe { sem_post(ptr::addr_of_mut!((*self.ptr).full)) }
    }

    pub fn wait_guard(self) -> Result<(), IpcError> {
        // SAFETY: as above.
        unsafe { sem_wait(ptr::addr_of_mut!((*self.ptr).guard)) }
    }

    pub fn post_guard(self) -> Result<(), IpcError> {
        // SAFETY: as above.
        unsafe { sem_post(ptr::addr_of_mut!((*self.ptr).guard)) }
    }

    pub fn set_shutdown(self, value: bool) {
        // SAFETY: field projection into live mapped memory; AtomicU32 access
        // needs no exclusive reference.
        let flag = unsafe { &*ptr::addr_of!((*self.ptr).shutdown) };
        flag.store(u32::from(value), Ordering::Release);
    }

    pub fn is_shutdown(self) -> bool {
        // SAFETY: as above.
        let flag = unsafe { &*ptr::addr_of!((*self.ptr).shutdown) };
        flag.load(Ordering::Acquire) != 0
    }

    /// Copies one complete message into the slot. Caller holds the guard and
    /// has already checked `bytes.len() <= MAX_MESSAGE_SIZE`.
    pub fn write_message(self, bytes: &[u8]) {
        debug_assert!(bytes.len() <= MAX_MESSAGE_SIZE);
        // SAFETY: guard semaphore gives us exclusive access to `len` and
        // `bytes`; the copy stays within the fixed-size region.
        unsafe {
            let len = &*ptr::addr_of!((*self.ptr).len);
            len.store(bytes.len() as u32, Ordering::Release);
            ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                ptr::addr_of_mut!((*self.ptr).bytes) as *mut u8,
                bytes.len(),
            );
        }
    }

    /// Copies the current message out of the slot. Caller holds the guard.
    pub fn read_message(self) -> Vec<u8> {
        // SAFETY: guard semaphore serializes access; length is clamped to
        // the region size before the copy.
        unsafe {
            let len = (*ptr::addr_of!((*self.ptr).len)).load(Ordering::Acquire) as usize;
            let len = len.min(MAX_MESSAGE_SIZE);
            let mut buf = vec![0u8; len];
            ptr::copy_nonoverlapping(
                ptr::addr_of!((*self.ptr).bytes) as *const u8,
                buf.as_mut_ptr(),
                len,
            );
            buf
        }
    }
}

/// One process's handle to the named shared-memory object.
///
/// The server (`owner == true`) creates, initializes, and ultimately unlinks
/// the OS resource; the client only opens and maps it. Attachment
/// bookkeeping lives here so that the single-client invariant is released
/// even on early drops.
pub(crate) struct ShmRegion {
    shm_name: CString,
    base: *mut RawChannel,
    owner: bool,
    attached: bool,
}

// SAFETY: the base pointer is stable for the region's lifetime and all
// shared mutation goes through SlotRef's semaphores or the atomic words.
unsafe impl Send for ShmRegion {}
unsafe impl Sync for ShmRegion {}

fn shm_name(name: &str) -> Result<CString, IpcError> {
    if name.is_empty() || name.contains('/') {
        return Err(IpcError::shared_memory(format!(
            "invalid IPC endpoint name `{name}`"
        )));
    }
    CString::new(format!("/{name}"))
        .map_err(|_| IpcError::shared_memory(format!("invalid IPC endpoint name `{name}`")))
}

impl ShmRegion {
    /// Creates and initializes the named region (server role).
    ///
    /// Any stale resource left behind by a crashed predecessor is removed
    /// first, best effort.
    pub fn create(name: &str) -> Result<Self, IpcError> {
        let shm_name = shm_name(name)?;
        let size = mem::size_of::<RawChannel>();

        // SAFETY: plain libc calls on an owned, NUL-terminated name; the fd
        // is closed on every path once the mapping exists (or on failure).
        let base = unsafe {
            libc::shm_unlink(shm_name.as_ptr());

            let fd = libc::shm_open(
                shm_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600,
            );
            if fd < 0 {
                return Err(os_error(format!("unable to create IPC endpoint `{name}`")));
            }

            if libc::ftruncate(fd, size as libc::off_t) != 0 {
                let err = os_error(format!("unable to size IPC endpoint `{name}`"));
                libc::close(fd);
                libc::shm_unlink(shm_name.as_ptr());
                return Err(err);
            }

            let base = libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            );
            libc::close(fd);
            if base == libc::MAP_FAILED {
                let err = os_error(format!("unable to map IPC endpoint `{name}`"));
                libc::shm_unlink(shm_name.as_ptr());
                return Err(err);
            }
            base as *mut RawChannel
        };

        let region = Self {
            shm_name,
            base,
            owner: true,
            attached: false,
        };

        // ftruncate on a fresh object guarantees zeroed memory, so the flag
        // words are already valid; only the semaphores need construction.
        region.slot(0).init()?;
        region.slot(1).init()?;
        region.ready().store(1, Ordering::Release);

        Ok(region)
    }

    /// Opens an existing named region and claims the client seat (client
    /// role). Fails if the region does not exist, was not yet initialized,
    /// or another client is already attached.
    pub fn open(name: &str) -> Result<Self, IpcError> {
        let shm_name = shm_name(name)?;
        let size = mem::size_of::<RawChannel>();

        // SAFETY: as in `create`; additionally the mapping size is verified
        // against the server's layout before any typed access.
        let base = unsafe {
            let fd = libc::shm_open(shm_name.as_ptr(), libc::O_RDWR, 0);
            if fd < 0 {
                return Err(os_error(format!("unable to open IPC endpoint `{name}`")));
            }

            let mut stat: libc::stat = mem::zeroed();
            if libc::fstat(fd, &mut stat) != 0 || (stat.st_size as usize) < size {
                libc::close(fd);
                return Err(IpcError::shared_memory(format!(
                    "IPC endpoint `{name}` has an unexpected layout"
                )));
            }

            let base = libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            );
            libc::close(fd);
            if base == libc::MAP_FAILED {
                return Err(os_error(format!("unable to map IPC endpoint `{name}`")));
            }
            base as *mut RawChannel
        };

        let mut region = Self {
            shm_name,
            base,
            owner: false,
            attached: false,
        };

        if region.ready().load(Ordering::Acquire) != 1 {
            return Err(IpcError::shared_memory(format!(
                "IPC endpoint `{name}` is not initialized"
            )));
        }

        if region
            .client_attached()
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(IpcError::shared_memory(format!(
                "unable to open IPC endpoint `{name}`: another client is already connected"
            )));
        }
        region.attached = true;

        Ok(region)
    }

    pub fn slot(&self, index: usize) -> SlotRef {
        debug_assert!(index < 2);
        // SAFETY: in-bounds field projection on the live mapping.
        let ptr = unsafe { ptr::addr_of_mut!((*self.base).slots[index]) };
        SlotRef { ptr }
    }

    fn ready(&self) -> &AtomicU32 {
        // SAFETY: field projection into live mapped memory.
        unsafe { &*ptr::addr_of!((*self.base).ready) }
    }

    fn client_attached(&self) -> &AtomicU32 {
        // SAFETY: as above.
        unsafe { &*ptr::addr_of!((*self.base).client_attached) }
    }
}

impl Drop for ShmRegion {
    fn drop(&mut self) {
        if self.owner {
            self.slot(0).destroy();
            self.slot(1).destroy();
        } else if self.attached {
            // Release the client seat so a successor can attach.
            self.client_attached().store(0, Ordering::Release);
        }

        // SAFETY: base/shm_name are valid; after munmap no SlotRef is used
        // (the endpoint joined its worker before dropping the region). The
        // owner removes the OS resource exactly once.
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, mem::size_of::<RawChannel>());
            if self.owner {
                libc::shm_unlink(self.shm_name.as_ptr());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_layout_is_fixed() {
        // Two processes compile this struct independently; its size must be
        // a pure function of the declaration.
        assert!(mem::size_of::<RawChannel>() > 2 * MAX_MESSAGE_SIZE);
        assert_eq!(mem::align_of::<RawChannel>() % mem::align_of::<AtomicU32>(), 0);
    }

    #[test]
    fn test_name_validation() {
        assert!(shm_name("").is_err());
        assert!(shm_name("with/slash").is_err());
        assert!(shm_name("plain-name").is_ok());
    }
}
