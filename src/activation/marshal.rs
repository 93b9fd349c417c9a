//! Fixed-capacity marshaling of activation arguments
//!
//! Each instance record carries a 1024-byte payload slot used as a one-shot
//! mailbox. A marshaled message is a frame inside that slot: a 4-byte
//! little-endian length prefix followed by the serde_json encoding of the
//! [`ActivationArguments`] value. A zero length means the mailbox is empty.
//!
//! Capacity is enforced *before* anything touches the shared slot: callers
//! first [`marshal`] (which fails with `PayloadTooLarge` if the encoding does
//! not fit) and only then [`write_frame`] the pre-validated bytes.

use crate::activation::ActivationArguments;
use crate::error::{AppLifecycleError, Result};

/// Size of a record's payload slot in the shared registry, in bytes
pub const PAYLOAD_CAPACITY: usize = 1024;

/// Bytes reserved for the frame's length prefix
const LEN_PREFIX: usize = 4;

/// Maximum encoded message length that fits the payload slot
pub const MAX_MARSHALED_LEN: usize = PAYLOAD_CAPACITY - LEN_PREFIX;

/// Encode activation arguments for transfer through a payload slot
///
/// # Errors
///
/// Returns [`AppLifecycleError::PayloadTooLarge`] when the encoding exceeds
/// [`MAX_MARSHALED_LEN`] bytes. The error is raised before any shared state
/// is touched; no partial write can occur.
pub fn marshal(args: &ActivationArguments) -> Result<Vec<u8>> {
    let encoded = serde_json::to_vec(args)?;
    if encoded.len() > MAX_MARSHALED_LEN {
        return Err(AppLifecycleError::PayloadTooLarge {
            length: encoded.len(),
            max: MAX_MARSHALED_LEN,
        });
    }
    Ok(encoded)
}

/// Decode activation arguments previously produced by [`marshal`]
pub fn unmarshal(bytes: &[u8]) -> Result<ActivationArguments> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Write a pre-validated encoded message into a payload slot
///
/// Overwrites whatever frame was previously present: the slot holds at most
/// one in-flight message, and an undrained message is replaced by design.
/// `encoded` must come from [`marshal`], which guarantees it fits.
pub fn write_frame(slot: &mut [u8; PAYLOAD_CAPACITY], encoded: &[u8]) {
    debug_assert!(encoded.len() <= MAX_MARSHALED_LEN);
    #[expect(
        clippy::cast_possible_truncation,
        reason = "encoded length is bounded by MAX_MARSHALED_LEN (1020), which fits in u32"
    )]
    let len = encoded.len() as u32;
    slot[..LEN_PREFIX].copy_from_slice(&len.to_le_bytes());
    slot[LEN_PREFIX..LEN_PREFIX + encoded.len()].copy_from_slice(encoded);
    // Scrub the remainder so a shorter frame never exposes stale bytes
    slot[LEN_PREFIX + encoded.len()..].fill(0);
}

/// Take the pending message out of a payload slot, clearing it
///
/// Returns `None` when the mailbox is empty or holds a frame with a corrupt
/// length (a corrupt frame is discarded rather than propagated).
pub fn take_frame(slot: &mut [u8; PAYLOAD_CAPACITY]) -> Option<Vec<u8>> {
    let mut len_bytes = [0u8; LEN_PREFIX];
    len_bytes.copy_from_slice(&slot[..LEN_PREFIX]);
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len == 0 {
        return None;
    }
    if len > MAX_MARSHALED_LEN {
        tracing::warn!("discarding payload frame with corrupt length {len}");
        slot.fill(0);
        return None;
    }

    let message = slot[LEN_PREFIX..LEN_PREFIX + len].to_vec();
    slot.fill(0);
    Some(message)
}
