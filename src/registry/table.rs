//! Shared instance-registry table layout
//!
//! The registry is a named, fixed-capacity table shared by every process of
//! the same logical application in one user session. The layout is plain
//! `repr(C)` data: the Windows backend maps it directly into shared memory,
//! so nothing in here may own heap allocations or carry padding that differs
//! between participants.
//!
//! One record per registered process: its process id, an optional logical
//! key (NUL-terminated UTF-8 in a fixed buffer) and the one-shot payload
//! mailbox used for activation redirection. A record with process id 0 is
//! free. Records of terminated processes are reclaimed lazily when a scan
//! notices the process id is no longer alive.

use crate::activation::PAYLOAD_CAPACITY;

/// Maximum byte length of an instance key (the buffer keeps one NUL byte)
pub const MAX_KEY_LEN: usize = 254;

/// Size of the key buffer inside a record
pub const KEY_BUF_LEN: usize = MAX_KEY_LEN + 1;

/// Number of instance slots in the shared table
pub const MAX_INSTANCES: usize = 64;

/// One registered process instance inside the shared table
#[repr(C)]
#[derive(Clone, Copy)]
pub struct InstanceRecord {
    /// Owning process id; 0 marks a free slot
    pub process_id: u32,
    /// Logical instance key, NUL-terminated UTF-8; all-zero when unkeyed
    pub key: [u8; KEY_BUF_LEN],
    /// One-shot activation mailbox (see `activation::marshal`)
    pub payload: [u8; PAYLOAD_CAPACITY],
}

impl InstanceRecord {
    /// A zeroed, unclaimed record
    pub const fn empty() -> Self {
        Self {
            process_id: 0,
            key: [0; KEY_BUF_LEN],
            payload: [0; PAYLOAD_CAPACITY],
        }
    }

    /// Whether this slot is unclaimed
    pub fn is_free(&self) -> bool {
        self.process_id == 0
    }

    /// The record's key, if one is set and decodes as UTF-8
    ///
    /// Unkeyed records (empty key) return `None`; they never participate in
    /// key-based discovery.
    pub fn key_str(&self) -> Option<&str> {
        let end = self.key.iter().position(|&b| b == 0).unwrap_or(KEY_BUF_LEN);
        if end == 0 {
            return None;
        }
        std::str::from_utf8(&self.key[..end]).ok()
    }

    /// Write `key` into the fixed key buffer
    ///
    /// Callers validate the length beforehand; anything longer than
    /// [`MAX_KEY_LEN`] bytes is truncated here only as a last-resort guard.
    pub fn set_key(&mut self, key: &str) {
        let bytes = key.as_bytes();
        let len = bytes.len().min(MAX_KEY_LEN);
        self.key[..len].copy_from_slice(&bytes[..len]);
        self.key[len..].fill(0);
    }

    /// Clear the record's key, leaving the slot claimed
    pub fn clear_key(&mut self) {
        self.key.fill(0);
    }

    /// Reset the whole slot to the free state
    pub fn clear(&mut self) {
        *self = Self::empty();
    }

    /// Claim this slot for `process_id`, clearing any stale key and payload
    pub fn claim(&mut self, process_id: u32) {
        self.clear();
        self.process_id = process_id;
    }
}

/// The shared fixed-capacity table of instance records
#[repr(C)]
pub struct RegistryTable {
    /// Instance slots; order carries no meaning
    pub records: [InstanceRecord; MAX_INSTANCES],
}

impl RegistryTable {
    /// An all-free table (fresh shared mappings are zero-filled, which is
    /// the same state)
    pub const fn new() -> Self {
        Self {
            records: [InstanceRecord::empty(); MAX_INSTANCES],
        }
    }

    /// Size of the table in bytes, for the shared mapping
    pub const fn byte_size() -> usize {
        std::mem::size_of::<Self>()
    }

    /// Find the slot claimed by `process_id`, if any
    pub fn slot_of(&self, process_id: u32) -> Option<usize> {
        self.records
            .iter()
            .position(|r| !r.is_free() && r.process_id == process_id)
    }
}

impl Default for RegistryTable {
    fn default() -> Self {
        Self::new()
    }
}
