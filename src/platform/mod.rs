//! OS-facing IPC collaborator interface
//!
//! The instance registry consumes a small set of platform services: a
//! process-existence probe, mutually-exclusive access to the shared table
//! (the cross-process *key mutex*), mutually-exclusive access to one slot's
//! payload mailbox (the per-slot *data mutex*), an activation signal per
//! slot, and a watcher that services that signal on a background thread.
//!
//! [`windows_ipc`] implements these over named Windows primitives (shared
//! memory, mutexes, events). [`local_ipc`] implements them in-process with a
//! simulated process table; it is the default on non-Windows targets and the
//! vehicle for this crate's own multi-"process" tests.

use std::thread::JoinHandle;

use crate::error::Result;
use crate::registry::table::RegistryTable;

#[cfg(windows)]
pub mod windows_ipc;

pub mod local_ipc;

/// Callback invoked by a watcher each time its slot's activation event fires
///
/// The callback runs on the watcher's worker thread. It must not block
/// indefinitely: the watcher cannot service further redirections until it
/// returns.
pub type ActivationCallback = Box<dyn Fn() + Send + Sync>;

/// Platform IPC services consumed by the instance registry
///
/// Both closure-style accessors provide *scoped* ownership of the underlying
/// cross-process lock: the lock is released when the closure returns, on
/// every path. Implementations must not hand the lock to the caller.
pub trait IpcBackend: Send + Sync {
    /// Process id this backend connection represents
    fn current_process_id(&self) -> u32;

    /// Whether `process_id` still refers to a running process
    ///
    /// An independent OS query; callers may probe while holding the table
    /// lock without deadlock risk.
    fn process_alive(&self, process_id: u32) -> bool;

    /// Run `f` with exclusive cross-process access to the shared table
    fn with_table(&self, f: &mut dyn FnMut(&mut RegistryTable)) -> Result<()>;

    /// Run `f` with exclusive cross-process access to one slot's payload
    ///
    /// Serializes senders against the receiving instance's drain. A sender
    /// arriving while the slot's mailbox is being drained blocks here; this
    /// is the at-most-one-outstanding-message backpressure, not a queue.
    fn with_payload(
        &self,
        slot: usize,
        f: &mut dyn FnMut(&mut [u8; crate::activation::PAYLOAD_CAPACITY]),
    ) -> Result<()>;

    /// Signal the activation event of `slot`
    ///
    /// Fire-and-forget: succeeds even when no process is watching the slot,
    /// in which case the signal is simply never serviced.
    fn signal_activation(&self, slot: usize) -> Result<()>;

    /// Start a watcher servicing `slot`'s activation event with `callback`
    fn watch_activation(&self, slot: usize, callback: ActivationCallback)
    -> Result<WatcherHandle>;
}

/// Owns a watcher's worker thread; stops and joins it on drop
pub struct WatcherHandle {
    /// Idempotent stop signal understood by the worker loop
    stop: Box<dyn Fn() + Send + Sync>,
    worker: Option<JoinHandle<()>>,
}

impl WatcherHandle {
    /// Wrap a worker thread together with its stop signal
    pub(crate) fn new(stop: Box<dyn Fn() + Send + Sync>, worker: JoinHandle<()>) -> Self {
        Self {
            stop,
            worker: Some(worker),
        }
    }

    /// Stop the watcher and wait for its thread to exit
    pub fn stop(&mut self) {
        (self.stop)();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("activation watcher thread panicked");
            }
        }
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Backend wired to the real platform for this process
///
/// Windows: named shared memory, mutexes and events scoped to the current
/// executable's identity. Elsewhere: the in-process backend, which makes the
/// library behave as a single-process fallback (mirroring the non-Windows
/// stubs of the supported platform surface).
pub fn default_backend() -> Result<std::sync::Arc<dyn IpcBackend>> {
    #[cfg(windows)]
    {
        Ok(std::sync::Arc::new(windows_ipc::WindowsIpc::for_current_app()?))
    }

    #[cfg(not(windows))]
    {
        Ok(std::sync::Arc::new(local_ipc::LocalIpc::new()))
    }
}
