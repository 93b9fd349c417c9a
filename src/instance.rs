//! Public app-instance handles
//!
//! [`AppInstance`] represents one registered application process: either the
//! calling process itself (`is_current`) or a remote participant discovered
//! through key lookup or enumeration. The associated functions
//! ([`AppInstance::current`], [`AppInstance::instances`],
//! [`AppInstance::find_or_register_for_key`]) operate on the process-wide
//! registry, which is created on first use exactly once (mutex-guarded) and
//! torn down with the process. The OS releases the shared region reference
//! at exit, and other participants reclaim the record lazily.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::activation::ActivationArguments;
use crate::error::Result;
use crate::platform;
use crate::registry::{ActivationObserver, ActivationToken, InstanceRegistry};

/// Handle to one registered application instance
///
/// Handles are snapshots: `key()` reflects the key at the time the handle
/// was obtained. A remote handle stays valid as a redirection target even
/// if the remote process exits; redirecting to it then is a benign no-op.
pub struct AppInstance {
    registry: Arc<InstanceRegistry>,
    slot: usize,
    process_id: u32,
    key: String,
    is_current: bool,
}

impl AppInstance {
    pub(crate) fn from_parts(
        registry: Arc<InstanceRegistry>,
        slot: usize,
        process_id: u32,
        key: String,
        is_current: bool,
    ) -> Self {
        Self {
            registry,
            slot,
            process_id,
            key,
            is_current,
        }
    }

    /// Handle to the calling process's own instance
    ///
    /// Lazily creates and caches the process-wide registry on first call;
    /// every later call reuses it.
    pub fn current() -> Result<Self> {
        let registry = process_registry()?;
        let key = registry.own_key()?.unwrap_or_default();
        let slot = registry.own_slot();
        let process_id = registry.process_id();
        Ok(Self::from_parts(registry, slot, process_id, key, true))
    }

    /// Handles to all live registered instances of this application
    ///
    /// Records of terminated processes are reclaimed as a side effect and
    /// never returned. Order is unspecified.
    pub fn instances() -> Result<Vec<Self>> {
        process_registry()?.instances()
    }

    /// Find the live owner of `key`, or register the calling process as it
    ///
    /// Returns a handle marked current when this process won (or already
    /// held) the registration, otherwise a handle referencing the existing
    /// owner, suitable as a [`redirect_to`](Self::redirect_to) target.
    pub fn find_or_register_for_key(key: &str) -> Result<Self> {
        process_registry()?.find_or_register_for_key(key)
    }

    /// Clear the calling process's registration of `key`
    ///
    /// No-op unless this process's record currently holds exactly `key`.
    /// After unregistration the next `find_or_register_for_key(key)` caller
    /// (in any process) becomes the new owner.
    pub fn unregister_key(&self, key: &str) -> Result<()> {
        self.registry.unregister_key(key)
    }

    /// Forward activation arguments to the instance this handle references
    ///
    /// Fire-and-forget: the sender does not wait for the target to service
    /// the activation. Typical use is a secondary launch delegating to the
    /// owner it found via key lookup, then exiting. Fails with a capacity
    /// error before any shared state changes if `args` cannot fit the
    /// payload slot.
    pub fn redirect_to(&self, args: &ActivationArguments) -> Result<()> {
        self.registry.redirect_to_slot(self.slot, args)
    }

    /// The calling process's own startup activation arguments
    ///
    /// Captured once at registry creation; idempotent, not consumed by
    /// reading, and independent of any redirected activations.
    pub fn activated_event_args(&self) -> ActivationArguments {
        self.registry.activated_event_args()
    }

    /// Register an observer for activations redirected to this process
    ///
    /// The observer runs on a background worker thread; see
    /// [`ActivationObserver`] for the threading contract. Observers always
    /// attach to the calling process's instance, regardless of which handle
    /// they are registered through.
    pub fn on_activated(&self, observer: ActivationObserver) -> ActivationToken {
        self.registry.on_activated(observer)
    }

    /// Remove an observer registered with [`on_activated`](Self::on_activated)
    pub fn remove_activated(&self, token: ActivationToken) {
        self.registry.remove_activated(token);
    }

    /// The key this handle was registered or discovered under
    ///
    /// Empty for unkeyed instances.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether this handle represents the calling process
    pub fn is_current(&self) -> bool {
        self.is_current
    }

    /// Process id of the instance this handle references
    pub fn process_id(&self) -> u32 {
        self.process_id
    }
}

/// Process-wide registry, created on first use
///
/// A `OnceLock` holds the instance; the mutex serializes the first
/// construction so two racing callers cannot both claim a slot.
fn process_registry() -> Result<Arc<InstanceRegistry>> {
    static REGISTRY: OnceLock<Arc<InstanceRegistry>> = OnceLock::new();
    static INIT: Mutex<()> = Mutex::new(());

    if let Some(registry) = REGISTRY.get() {
        return Ok(Arc::clone(registry));
    }

    let _init = INIT.lock();
    if let Some(registry) = REGISTRY.get() {
        return Ok(Arc::clone(registry));
    }

    let backend = platform::default_backend()?;
    let registry = InstanceRegistry::new(backend)?;
    let _ = REGISTRY.set(Arc::clone(&registry));
    Ok(registry)
}
