//! Cross-process instance registry
//!
//! [`InstanceRegistry`] is one process's connection to the shared instance
//! table. Construction claims a slot for the process (reclaiming a dead
//! process's slot if the table is otherwise full), captures the process's
//! own startup activation arguments, and starts the activation watcher that
//! services redirected activations arriving in the slot's payload mailbox.
//!
//! Key registration follows a strict check-then-set under the cross-process
//! table mutex: of any number of processes racing to register the same key,
//! exactly one wins; the rest receive a handle referencing the winner.
//! Records of terminated processes are reclaimed as a side effect of every
//! scan, so a crashed owner never blocks its key for longer than one
//! lookup.

pub mod table;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::activation::{ActivationArguments, marshal};
use crate::error::{AppLifecycleError, Result, StringError};
use crate::instance::AppInstance;
use crate::platform::{IpcBackend, WatcherHandle};
use crate::registry::table::MAX_KEY_LEN;

/// Observer invoked when a redirected activation arrives
///
/// Runs on the activation watcher's worker thread, never the thread that
/// registered it. Observers must synchronize with their own main-thread
/// state and must not block indefinitely, or the watcher cannot service
/// subsequent redirections.
pub type ActivationObserver = Arc<dyn Fn(&ActivationArguments) + Send + Sync>;

/// Token identifying a registered activation observer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationToken(u64);

/// One process's connection to the shared instance registry
pub struct InstanceRegistry {
    backend: Arc<dyn IpcBackend>,
    process_id: u32,
    own_slot: usize,
    /// The process's own startup activation, captured exactly once
    startup_args: ActivationArguments,
    observers: Mutex<Vec<(u64, ActivationObserver)>>,
    next_token: AtomicU64,
    watcher: Mutex<Option<WatcherHandle>>,
}

impl InstanceRegistry {
    /// Connect to the shared registry, claiming a slot for this process
    ///
    /// # Errors
    ///
    /// Returns [`AppLifecycleError::RegistryFull`] when every slot belongs
    /// to a live process, or a platform error when the backing IPC
    /// primitives fail.
    pub fn new(backend: Arc<dyn IpcBackend>) -> Result<Arc<Self>> {
        let process_id = backend.current_process_id();

        let mut claimed = None;
        {
            let probe = &backend;
            backend.with_table(&mut |table| {
                // Re-attach to an existing claim first (the registry is
                // created once per process, but the slot survives a
                // re-open of the backing objects)
                if let Some(slot) = table.slot_of(process_id) {
                    claimed = Some(slot);
                    return;
                }
                for (slot, record) in table.records.iter_mut().enumerate() {
                    if !record.is_free() && probe.process_alive(record.process_id) {
                        continue;
                    }
                    if !record.is_free() {
                        debug!(
                            "reclaiming slot {slot} from terminated process {}",
                            record.process_id
                        );
                    }
                    record.claim(process_id);
                    claimed = Some(slot);
                    return;
                }
            })?;
        }
        let own_slot = claimed.ok_or(AppLifecycleError::RegistryFull)?;

        let registry = Arc::new(Self {
            backend: Arc::clone(&backend),
            process_id,
            own_slot,
            startup_args: ActivationArguments::from_environment(),
            observers: Mutex::new(Vec::new()),
            next_token: AtomicU64::new(0),
            watcher: Mutex::new(None),
        });

        // The watcher holds a weak reference: dropping the registry stops
        // redirection service instead of leaking the worker thread
        let weak = Arc::downgrade(&registry);
        let watcher = backend.watch_activation(
            own_slot,
            Box::new(move || {
                if let Some(registry) = weak.upgrade() {
                    registry.service_redirection();
                }
            }),
        )?;
        *registry.watcher.lock() = Some(watcher);

        info!("instance registered as process {process_id} in slot {own_slot}");
        Ok(registry)
    }

    /// Process id this registry represents
    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    /// Find the live owner of `key`, or become it
    ///
    /// Under the cross-process table mutex: scans for a live record holding
    /// `key`; a stale match (terminated owner) is reclaimed and the scan
    /// continues, so ownership passes to this caller rather than to a dead
    /// process's leftover entry. With no live owner, this process's own
    /// record takes the key (replacing any key it held before) and the
    /// returned handle is marked current.
    ///
    /// # Errors
    ///
    /// Rejects empty keys ([`AppLifecycleError::InvalidKey`]) and keys over
    /// [`MAX_KEY_LEN`] bytes ([`AppLifecycleError::KeyTooLong`]) before
    /// touching shared state.
    pub fn find_or_register_for_key(self: &Arc<Self>, key: &str) -> Result<AppInstance> {
        validate_key(key)?;

        let mut owner: Option<(usize, u32)> = None;
        {
            let probe = &self.backend;
            let own_slot = self.own_slot;
            let process_id = self.process_id;
            self.backend.with_table(&mut |table| {
                owner = None;
                for (slot, record) in table.records.iter_mut().enumerate() {
                    if record.is_free() {
                        continue;
                    }
                    if !probe.process_alive(record.process_id) {
                        debug!(
                            "reclaiming slot {slot} from terminated process {}",
                            record.process_id
                        );
                        record.clear();
                        continue;
                    }
                    if record.key_str() == Some(key) {
                        owner = Some((slot, record.process_id));
                        break;
                    }
                }
                if owner.is_none() {
                    table.records[own_slot].set_key(key);
                    owner = Some((own_slot, process_id));
                }
            })?;
        }

        let Some((slot, owner_pid)) = owner else {
            // The scan closure always resolves an owner; not reaching it
            // means the backend never ran it
            return Err(AppLifecycleError::Platform(StringError::new(
                "registry scan did not run",
            )));
        };

        let is_current = owner_pid == self.process_id;
        if is_current {
            info!("registered as owner of key '{key}'");
        } else {
            debug!("key '{key}' is owned by process {owner_pid}");
        }
        Ok(AppInstance::from_parts(
            Arc::clone(self),
            slot,
            owner_pid,
            key.to_string(),
            is_current,
        ))
    }

    /// Clear this process's key registration if it matches `key`
    ///
    /// Safe to call when the key was never registered, was registered by a
    /// different process, or is not a valid key at all; all of those are
    /// no-ops.
    pub fn unregister_key(&self, key: &str) -> Result<()> {
        let own_slot = self.own_slot;
        self.backend.with_table(&mut |table| {
            let record = &mut table.records[own_slot];
            if record.key_str() == Some(key) {
                record.clear_key();
                info!("unregistered key '{key}'");
            }
        })
    }

    /// Enumerate all live registered instances
    ///
    /// Dead records are reclaimed as a side effect. Order is unspecified;
    /// no two handles reference the same process id.
    pub fn instances(self: &Arc<Self>) -> Result<Vec<AppInstance>> {
        let mut live: Vec<(usize, u32, String)> = Vec::new();
        {
            let probe = &self.backend;
            self.backend.with_table(&mut |table| {
                live.clear();
                for (slot, record) in table.records.iter_mut().enumerate() {
                    if record.is_free() {
                        continue;
                    }
                    if !probe.process_alive(record.process_id) {
                        debug!(
                            "reclaiming slot {slot} from terminated process {}",
                            record.process_id
                        );
                        record.clear();
                        continue;
                    }
                    live.push((
                        slot,
                        record.process_id,
                        record.key_str().unwrap_or_default().to_string(),
                    ));
                }
            })?;
        }

        Ok(live
            .into_iter()
            .map(|(slot, process_id, key)| {
                AppInstance::from_parts(
                    Arc::clone(self),
                    slot,
                    process_id,
                    key,
                    process_id == self.process_id,
                )
            })
            .collect())
    }

    /// Forward `args` to the instance occupying `target_slot`
    ///
    /// Marshals first, so a payload that cannot fit fails before any shared
    /// state changes. The frame write happens under the target slot's data
    /// mutex and replaces an undrained previous message; the activation
    /// signal is fire-and-forget. Redirecting to an instance whose process
    /// has exited is a benign no-op observed only as a signal nobody
    /// services.
    pub(crate) fn redirect_to_slot(
        &self,
        target_slot: usize,
        args: &ActivationArguments,
    ) -> Result<()> {
        let encoded = marshal::marshal(args)?;

        self.backend.with_payload(target_slot, &mut |payload| {
            marshal::write_frame(payload, &encoded);
        })?;
        self.backend.signal_activation(target_slot)?;

        info!(
            "redirected {:?} activation to slot {target_slot}",
            args.kind()
        );
        Ok(())
    }

    /// The process's own startup activation arguments
    ///
    /// Captured once at registry construction; idempotent and independent
    /// of the redirection channel.
    pub fn activated_event_args(&self) -> ActivationArguments {
        self.startup_args.clone()
    }

    /// Register an observer for redirected activations
    pub fn on_activated(&self, observer: ActivationObserver) -> ActivationToken {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.observers.lock().push((token, observer));
        ActivationToken(token)
    }

    /// Remove a previously registered activation observer
    pub fn remove_activated(&self, token: ActivationToken) {
        self.observers.lock().retain(|(t, _)| *t != token.0);
    }

    /// Slot index claimed by this process
    pub(crate) fn own_slot(&self) -> usize {
        self.own_slot
    }

    /// Current key of this process's own record, if any
    pub(crate) fn own_key(&self) -> Result<Option<String>> {
        let own_slot = self.own_slot;
        let mut key = None;
        self.backend.with_table(&mut |table| {
            key = table.records[own_slot].key_str().map(str::to_owned);
        })?;
        Ok(key)
    }

    /// Drain the payload mailbox and notify observers
    ///
    /// Runs on the watcher's worker thread each time the activation event
    /// fires. An empty mailbox (signal raced with a previous drain) and an
    /// unparseable frame are both ignored.
    fn service_redirection(&self) {
        let mut pending = None;
        if let Err(e) = self.backend.with_payload(self.own_slot, &mut |payload| {
            pending = marshal::take_frame(payload);
        }) {
            tracing::error!("failed to drain redirected activation: {e}");
            return;
        }
        let Some(bytes) = pending else {
            return;
        };

        match marshal::unmarshal(&bytes) {
            Ok(args) => {
                info!("received redirected {:?} activation", args.kind());
                // Clone the observer list to keep the lock out of callbacks
                let observers: Vec<ActivationObserver> = self
                    .observers
                    .lock()
                    .iter()
                    .map(|(_, observer)| Arc::clone(observer))
                    .collect();
                for observer in observers {
                    observer(&args);
                }
            }
            Err(e) => warn!("discarding redirected activation that failed to unmarshal: {e}"),
        }
    }
}

impl Drop for InstanceRegistry {
    fn drop(&mut self) {
        // Stop servicing redirections; the shared record itself is
        // reclaimed lazily by other participants once the process exits
        if let Some(watcher) = self.watcher.lock().take() {
            drop(watcher);
        }
    }
}

/// Validate a key for registration or lookup
fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(AppLifecycleError::InvalidKey(
            "key must not be empty; unkeyed instances do not participate in key discovery"
                .to_string(),
        ));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(AppLifecycleError::KeyTooLong { length: key.len() });
    }
    Ok(())
}
