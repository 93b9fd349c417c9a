//! Windows IPC backend
//!
//! Implements the [`IpcBackend`] contract with named Windows objects, all in
//! the session-local `Local\` namespace and derived from the application's
//! executable identity so every invocation of the same application finds the
//! same set:
//!
//! - a pagefile-backed named file mapping holding the [`RegistryTable`]
//!   (fresh mappings are zero-filled, which is exactly the all-free table
//!   state, so no explicit initialization handshake is needed),
//! - one named mutex serializing table scans and key registration; payload
//!   access takes it as well (after the slot's data mutex) because slot
//!   reclamation zeroes payload bytes during scans,
//! - one named mutex per slot serializing payload writes against drains,
//! - one named auto-reset event per slot used as the activation signal.
//!
//! The mapping and all named objects are OS-refcounted: they disappear when
//! the last process of the application exits.

use std::thread;

use windows::Win32::Foundation::{
    CloseHandle, HANDLE, INVALID_HANDLE_VALUE, STILL_ACTIVE, WAIT_ABANDONED, WAIT_OBJECT_0,
};
use windows::Win32::System::Memory::{
    CreateFileMappingW, FILE_MAP_ALL_ACCESS, MEMORY_MAPPED_VIEW_ADDRESS, MapViewOfFile,
    PAGE_READWRITE, UnmapViewOfFile,
};
use windows::Win32::System::Threading::{
    CreateEventW, CreateMutexW, GetExitCodeProcess, INFINITE, OpenProcess,
    PROCESS_QUERY_LIMITED_INFORMATION, ReleaseMutex, SetEvent, WaitForMultipleObjects,
    WaitForSingleObject,
};
use windows::core::{HSTRING, PCWSTR};

use crate::activation::PAYLOAD_CAPACITY;
use crate::error::{AppLifecycleError, Result, StringError};
use crate::platform::{ActivationCallback, IpcBackend, WatcherHandle};
use crate::registry::table::{MAX_INSTANCES, RegistryTable};

/// Owned Windows handle closed on drop
///
/// `HANDLE` wraps a raw pointer and is therefore not `Send`/`Sync` by
/// itself; kernel handles are process-global tokens, so sharing the wrapper
/// across threads is sound.
struct OwnedHandle(HANDLE);

#[expect(
    unsafe_code,
    reason = "kernel object handles are valid from any thread of the owning process"
)]
unsafe impl Send for OwnedHandle {}
#[expect(
    unsafe_code,
    reason = "kernel object handles are valid from any thread of the owning process"
)]
unsafe impl Sync for OwnedHandle {}

impl Drop for OwnedHandle {
    #[expect(unsafe_code, reason = "Windows FFI for CloseHandle")]
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

/// Named cross-process mutex with scoped RAII acquisition
struct NamedMutex {
    handle: OwnedHandle,
}

impl NamedMutex {
    /// Create or open the named mutex
    #[expect(unsafe_code, reason = "Windows FFI for CreateMutexW")]
    fn create_or_open(name: &str) -> Result<Self> {
        let name = HSTRING::from(name);
        // CreateMutexW opens the existing mutex when the name is taken;
        // ownership is NOT requested at creation time
        let handle = unsafe { CreateMutexW(None, false, &name)? };
        Ok(Self {
            handle: OwnedHandle(handle),
        })
    }

    /// Acquire the mutex, blocking until it is available
    ///
    /// Contention is never surfaced as an error: critical sections under
    /// these mutexes are bounded, so the wait always resolves. An abandoned
    /// mutex (previous owner died inside the critical section) still grants
    /// ownership; the table state it guards is self-healing via liveness
    /// reclamation.
    #[expect(unsafe_code, reason = "Windows FFI for WaitForSingleObject")]
    fn lock(&self) -> Result<NamedMutexGuard<'_>> {
        let wait = unsafe { WaitForSingleObject(self.handle.0, INFINITE) };
        if wait == WAIT_OBJECT_0 || wait == WAIT_ABANDONED {
            Ok(NamedMutexGuard { mutex: self })
        } else {
            Err(AppLifecycleError::Platform(StringError::new(format!(
                "mutex wait failed with status {:#x}",
                wait.0
            ))))
        }
    }
}

/// Scoped ownership of a [`NamedMutex`]; released on every exit path
struct NamedMutexGuard<'a> {
    mutex: &'a NamedMutex,
}

impl Drop for NamedMutexGuard<'_> {
    #[expect(unsafe_code, reason = "Windows FFI for ReleaseMutex")]
    fn drop(&mut self) {
        unsafe {
            if ReleaseMutex(self.mutex.handle.0).is_err() {
                tracing::error!("failed to release cross-process mutex");
            }
        }
    }
}

/// Mapped view of the shared registry table
struct MappedRegion {
    view: MEMORY_MAPPED_VIEW_ADDRESS,
    /// Keeps the mapping object alive for the lifetime of the view
    _mapping: OwnedHandle,
}

#[expect(
    unsafe_code,
    reason = "the view stays mapped for the lifetime of the region; access is serialized by named mutexes"
)]
unsafe impl Send for MappedRegion {}
#[expect(
    unsafe_code,
    reason = "the view stays mapped for the lifetime of the region; access is serialized by named mutexes"
)]
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Create or open the named table mapping
    #[expect(
        unsafe_code,
        reason = "Windows FFI for CreateFileMappingW/MapViewOfFile"
    )]
    fn create_or_open(name: &str) -> Result<Self> {
        let name = HSTRING::from(name);

        #[expect(
            clippy::cast_possible_truncation,
            reason = "RegistryTable::byte_size() is a compile-time constant well under 4 GiB"
        )]
        let size = RegistryTable::byte_size() as u32;

        // Pagefile-backed mapping: zero-filled on first creation, opened
        // as-is by later participants
        let mapping = unsafe {
            CreateFileMappingW(INVALID_HANDLE_VALUE, None, PAGE_READWRITE, 0, size, &name)?
        };
        let mapping = OwnedHandle(mapping);

        let view =
            unsafe { MapViewOfFile(mapping.0, FILE_MAP_ALL_ACCESS, 0, 0, RegistryTable::byte_size()) };
        if view.Value.is_null() {
            return Err(AppLifecycleError::WindowsApiError(
                windows::core::Error::from_thread(),
            ));
        }

        Ok(Self {
            view,
            _mapping: mapping,
        })
    }

    /// Pointer to the mapped table
    ///
    /// Dereferencing requires holding the appropriate named mutex for the
    /// part of the table touched. The view is page-aligned, sized for the
    /// table, and stays mapped for `self`'s lifetime; the layout is plain
    /// `repr(C)` data valid for any bit pattern the participants can write.
    fn table_ptr(&self) -> *mut RegistryTable {
        self.view.Value.cast::<RegistryTable>()
    }
}

impl Drop for MappedRegion {
    #[expect(unsafe_code, reason = "Windows FFI for UnmapViewOfFile")]
    fn drop(&mut self) {
        unsafe {
            if UnmapViewOfFile(self.view).is_err() {
                tracing::error!("failed to unmap instance registry view");
            }
        }
    }
}

/// [`IpcBackend`] over named Windows shared memory, mutexes and events
pub struct WindowsIpc {
    region: MappedRegion,
    table_mutex: NamedMutex,
    data_mutexes: Vec<NamedMutex>,
    identity: String,
}

impl WindowsIpc {
    /// Open the backend for the current application's identity
    ///
    /// The identity is derived from the executable name, so every
    /// invocation of the same binary in the same user session shares one
    /// registry.
    pub fn for_current_app() -> Result<Self> {
        let exe = std::env::current_exe()?;
        let identity = exe
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .ok_or_else(|| {
                AppLifecycleError::Platform(StringError::new("executable path has no file stem"))
            })?;
        Self::with_identity(&identity)
    }

    /// Open the backend for an explicit application identity
    pub fn with_identity(identity: &str) -> Result<Self> {
        let identity = sanitize_identity(identity);

        let region = MappedRegion::create_or_open(&format!(
            "Local\\{identity}_InstanceRegistry_Table"
        ))?;
        let table_mutex =
            NamedMutex::create_or_open(&format!("Local\\{identity}_InstanceRegistry_KeyMutex"))?;
        let data_mutexes = (0..MAX_INSTANCES)
            .map(|slot| {
                NamedMutex::create_or_open(&format!(
                    "Local\\{identity}_InstanceRegistry_DataMutex_{slot}"
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!("instance registry opened for identity '{identity}'");

        Ok(Self {
            region,
            table_mutex,
            data_mutexes,
            identity,
        })
    }

    /// Create or open the activation event for `slot`
    #[expect(unsafe_code, reason = "Windows FFI for CreateEventW")]
    fn activation_event(&self, slot: usize) -> Result<OwnedHandle> {
        let name = HSTRING::from(format!(
            "Local\\{}_InstanceRegistry_Activated_{slot}",
            self.identity
        ));
        // Auto-reset: one signal wakes one wait, then resets itself
        let handle = unsafe { CreateEventW(None, false, false, &name)? };
        Ok(OwnedHandle(handle))
    }
}

impl IpcBackend for WindowsIpc {
    fn current_process_id(&self) -> u32 {
        std::process::id()
    }

    /// Probe whether `process_id` is still running
    ///
    /// `OpenProcess` can succeed for an exited process while other handles
    /// keep the object alive, so the exit code is checked as well. A process
    /// that cannot be opened at all is treated as not one of ours: registry
    /// participants run as the same user and are always openable with
    /// `PROCESS_QUERY_LIMITED_INFORMATION`.
    #[expect(
        unsafe_code,
        reason = "Windows FFI for OpenProcess/GetExitCodeProcess liveness probe"
    )]
    fn process_alive(&self, process_id: u32) -> bool {
        let Ok(handle) = (unsafe {
            OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, process_id)
        }) else {
            return false;
        };
        let handle = OwnedHandle(handle);

        let mut exit_code = 0u32;
        let queried = unsafe { GetExitCodeProcess(handle.0, &raw mut exit_code) };

        #[expect(
            clippy::cast_sign_loss,
            reason = "STILL_ACTIVE (259) is a positive NTSTATUS compared against a process exit code"
        )]
        let still_active = STILL_ACTIVE.0 as u32;
        queried.is_ok() && exit_code == still_active
    }

    #[expect(unsafe_code, reason = "accesses the shared mapping under the key mutex")]
    fn with_table(&self, f: &mut dyn FnMut(&mut RegistryTable)) -> Result<()> {
        let _guard = self.table_mutex.lock()?;
        f(unsafe { &mut *self.region.table_ptr() });
        Ok(())
    }

    /// Lock order is data mutex first, then table mutex, same as the wait
    /// in `with_payload` callers racing a table scan. The table mutex is
    /// required here because reclamation (`claim`/`clear` under
    /// [`Self::with_table`]) zeroes these same payload bytes; without it a
    /// sender racing a reclaim would write the slot unsynchronized.
    #[expect(
        unsafe_code,
        reason = "projects one slot's payload out of the mapping under both guarding mutexes"
    )]
    fn with_payload(
        &self,
        slot: usize,
        f: &mut dyn FnMut(&mut [u8; PAYLOAD_CAPACITY]),
    ) -> Result<()> {
        let _data_guard = self.data_mutexes[slot].lock()?;
        let _table_guard = self.table_mutex.lock()?;
        // Project the payload through the raw pointer so no `&mut` to the
        // rest of the table ever exists on this path
        let payload = unsafe { &mut (*self.region.table_ptr()).records[slot].payload };
        f(payload);
        Ok(())
    }

    #[expect(unsafe_code, reason = "Windows FFI for SetEvent")]
    fn signal_activation(&self, slot: usize) -> Result<()> {
        let event = self.activation_event(slot)?;
        // Fire-and-forget: once SetEvent returns, delivery is the kernel's
        // responsibility; a target with no watcher simply never drains it
        unsafe { SetEvent(event.0)? };
        Ok(())
    }

    #[expect(
        unsafe_code,
        reason = "Windows FFI for the event wait loop servicing redirections"
    )]
    fn watch_activation(
        &self,
        slot: usize,
        callback: ActivationCallback,
    ) -> Result<WatcherHandle> {
        let activated = self.activation_event(slot)?;

        // Unnamed manual-reset event used purely to stop the worker
        let stop_event = unsafe { CreateEventW(None, true, false, PCWSTR::null())? };
        let stop_event = std::sync::Arc::new(OwnedHandle(stop_event));

        let stop_for_worker = std::sync::Arc::clone(&stop_event);
        let worker = thread::spawn(move || {
            loop {
                let wait = unsafe {
                    WaitForMultipleObjects(&[activated.0, stop_for_worker.0], false, INFINITE)
                };
                if wait == WAIT_OBJECT_0 {
                    callback();
                } else if wait.0 == WAIT_OBJECT_0.0 + 1 {
                    break;
                } else {
                    tracing::error!(
                        "activation watcher wait failed with status {:#x}; stopping",
                        wait.0
                    );
                    break;
                }
            }
            tracing::debug!("activation watcher for slot {slot} stopped");
        });

        let stop = Box::new(move || unsafe {
            if SetEvent(stop_event.0).is_err() {
                tracing::error!("failed to signal activation watcher stop event");
            }
        });

        Ok(WatcherHandle::new(stop, worker))
    }
}

/// Restrict an identity to characters safe inside kernel object names
fn sanitize_identity(identity: &str) -> String {
    identity
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
            c
        } else {
            '_'
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_identity_replaces_separators() {
        assert_eq!(sanitize_identity("my app\\v2"), "my_app_v2");
        assert_eq!(sanitize_identity("easyapp-1.2"), "easyapp-1.2");
    }

    #[test]
    fn test_current_process_is_alive() {
        let backend = WindowsIpc::with_identity("applifecycle_selftest").unwrap();
        assert!(backend.process_alive(std::process::id()));
    }

    #[test]
    fn test_improbable_process_id_is_dead() {
        let backend = WindowsIpc::with_identity("applifecycle_selftest").unwrap();
        // Process ids are multiples of 4; an odd huge id cannot be running
        assert!(!backend.process_alive(u32::MAX));
    }

    #[test]
    fn test_payload_writes_exclude_table_reclamation() {
        use crate::activation::PAYLOAD_CAPACITY;

        let backend =
            std::sync::Arc::new(WindowsIpc::with_identity("applifecycle_payload_race_test").unwrap());

        // One thread repeatedly reclaims the slot (zeroing its payload
        // under the table mutex) while another writes a uniform pattern
        // under the data mutex. With both paths holding the table mutex a
        // reader can only ever observe all-zeros or the full pattern.
        let reclaimer = {
            let backend = std::sync::Arc::clone(&backend);
            std::thread::spawn(move || {
                for _ in 0..200 {
                    backend
                        .with_table(&mut |table| {
                            table.records[11].claim(1);
                        })
                        .unwrap();
                }
            })
        };

        for _ in 0..200 {
            backend
                .with_payload(11, &mut |payload| {
                    payload.fill(0xAB);
                })
                .unwrap();
            backend
                .with_payload(11, &mut |payload: &mut [u8; PAYLOAD_CAPACITY]| {
                    let first = payload[0];
                    assert!(first == 0 || first == 0xAB);
                    assert!(payload.iter().all(|&b| b == first), "torn payload write");
                })
                .unwrap();
        }

        reclaimer.join().unwrap();
        backend.with_table(&mut |table| table.records[11].clear()).unwrap();
    }

    #[test]
    fn test_table_round_trips_through_mapping() {
        let backend = WindowsIpc::with_identity("applifecycle_mapping_test").unwrap();
        let pid = backend.current_process_id();

        backend
            .with_table(&mut |table| {
                table.records[7].claim(pid);
                table.records[7].set_key("mapping-test");
            })
            .unwrap();

        let mut seen = None;
        backend
            .with_table(&mut |table| {
                seen = table.records[7].key_str().map(str::to_owned);
                table.records[7].clear();
            })
            .unwrap();
        assert_eq!(seen.as_deref(), Some("mapping-test"));
    }
}
