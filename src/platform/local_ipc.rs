//! In-process IPC backend
//!
//! Implements the [`IpcBackend`] contract without any OS-named objects: one
//! table behind a process-local mutex, a plain mutex per payload slot, and a
//! condvar-based signal per slot serviced by a worker thread.
//!
//! Two uses: the default backend on non-Windows targets, where the library
//! degrades to a functional single-process fallback, and this crate's own
//! integration tests, which need several simulated "processes" inside one
//! test binary. [`LocalIpc::connect`] opens another connection with a fresh
//! simulated process id, and [`LocalIpc::terminate`] simulates a process
//! crash so liveness reclamation can be exercised.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;

use parking_lot::{Condvar, Mutex};

use crate::activation::PAYLOAD_CAPACITY;
use crate::error::Result;
use crate::platform::{ActivationCallback, IpcBackend, WatcherHandle};
use crate::registry::table::{MAX_INSTANCES, RegistryTable};

/// Condvar-backed stand-in for a named auto-reset event
struct SlotSignal {
    state: Mutex<SignalState>,
    condvar: Condvar,
}

struct SignalState {
    /// Set by `signal_activation`, consumed by the watcher loop
    pending: bool,
    /// Tells the slot's watcher loop to exit
    shutdown: bool,
}

impl SlotSignal {
    fn new() -> Self {
        Self {
            state: Mutex::new(SignalState {
                pending: false,
                shutdown: false,
            }),
            condvar: Condvar::new(),
        }
    }
}

/// State shared by every connection to the same simulated session
struct LocalShared {
    table: Mutex<Box<RegistryTable>>,
    /// Per-slot data mutexes; held only for the duration of a write or drain
    slot_locks: Vec<Mutex<()>>,
    signals: Vec<SlotSignal>,
    /// Simulated set of live process ids
    live: Mutex<HashSet<u32>>,
    next_process_id: AtomicU32,
}

/// One simulated process's connection to a shared local session
pub struct LocalIpc {
    shared: Arc<LocalShared>,
    process_id: u32,
}

impl LocalIpc {
    /// Create a fresh session and the first connection to it
    pub fn new() -> Self {
        let shared = Arc::new(LocalShared {
            table: Mutex::new(Box::new(RegistryTable::new())),
            slot_locks: (0..MAX_INSTANCES).map(|_| Mutex::new(())).collect(),
            signals: (0..MAX_INSTANCES).map(|_| SlotSignal::new()).collect(),
            live: Mutex::new(HashSet::new()),
            next_process_id: AtomicU32::new(1000),
        });
        Self::attach(shared)
    }

    /// Open another connection to the same session with a new process id
    ///
    /// Models a second invocation of the application: it shares the table
    /// but probes and registers as a distinct process.
    pub fn connect(&self) -> Self {
        Self::attach(Arc::clone(&self.shared))
    }

    /// Simulate abrupt termination of `process_id`
    ///
    /// The process's registry record is deliberately left in place; it
    /// becomes stale and is reclaimed by the next scan, exactly as after a
    /// real process crash.
    pub fn terminate(&self, process_id: u32) {
        self.shared.live.lock().remove(&process_id);
    }

    fn attach(shared: Arc<LocalShared>) -> Self {
        let process_id = shared.next_process_id.fetch_add(1, Ordering::Relaxed);
        shared.live.lock().insert(process_id);
        tracing::debug!("local IPC connection opened as simulated process {process_id}");
        Self { shared, process_id }
    }
}

impl Default for LocalIpc {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LocalIpc {
    fn drop(&mut self) {
        // Connection lifetime models process lifetime
        self.shared.live.lock().remove(&self.process_id);
    }
}

impl IpcBackend for LocalIpc {
    fn current_process_id(&self) -> u32 {
        self.process_id
    }

    fn process_alive(&self, process_id: u32) -> bool {
        self.shared.live.lock().contains(&process_id)
    }

    fn with_table(&self, f: &mut dyn FnMut(&mut RegistryTable)) -> Result<()> {
        let mut table = self.shared.table.lock();
        f(&mut table);
        Ok(())
    }

    fn with_payload(
        &self,
        slot: usize,
        f: &mut dyn FnMut(&mut [u8; PAYLOAD_CAPACITY]),
    ) -> Result<()> {
        // Slot lock first: it is what serializes senders against the drain.
        // The table lock is only held for the actual byte access.
        let _data_guard = self.shared.slot_locks[slot].lock();
        let mut table = self.shared.table.lock();
        f(&mut table.records[slot].payload);
        Ok(())
    }

    fn signal_activation(&self, slot: usize) -> Result<()> {
        let signal = &self.shared.signals[slot];
        signal.state.lock().pending = true;
        signal.condvar.notify_all();
        Ok(())
    }

    fn watch_activation(
        &self,
        slot: usize,
        callback: ActivationCallback,
    ) -> Result<WatcherHandle> {
        // A previous watcher of this slot may have left the shutdown flag set
        self.shared.signals[slot].state.lock().shutdown = false;

        let shared = Arc::clone(&self.shared);
        let worker = thread::spawn(move || {
            let signal = &shared.signals[slot];
            loop {
                {
                    let mut state = signal.state.lock();
                    while !state.pending && !state.shutdown {
                        signal.condvar.wait(&mut state);
                    }
                    if state.shutdown {
                        break;
                    }
                    // Auto-reset semantics: consume the signal before
                    // servicing it, so a signal arriving mid-callback is
                    // serviced by the next iteration instead of lost.
                    state.pending = false;
                }
                callback();
            }
            tracing::debug!("local activation watcher for slot {slot} stopped");
        });

        let stop_shared = Arc::clone(&self.shared);
        let stop = Box::new(move || {
            let signal = &stop_shared.signals[slot];
            signal.state.lock().shutdown = true;
            signal.condvar.notify_all();
        });

        Ok(WatcherHandle::new(stop, worker))
    }
}
