//! Activation arguments and their cross-process marshaling
//!
//! An activation describes *how* a process was invoked: a plain launch with a
//! command line, a file association, a protocol (URI) handler, or an
//! extensible "other" kind. [`arguments`] defines the variant type and
//! captures the current process's own startup activation; [`marshal`] encodes
//! activations into the fixed-size payload slot of the shared instance
//! registry so one process can forward its activation to another.

pub mod arguments;
pub mod marshal;

pub use arguments::{ActivationArguments, ActivationKind};
pub use marshal::{MAX_MARSHALED_LEN, PAYLOAD_CAPACITY};
