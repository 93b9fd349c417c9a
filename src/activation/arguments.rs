//! Activation argument variants
//!
//! Models the supported activation kinds: `Launch` (command line), `File`
//! (one or more file references), `Protocol` (URI), and an extensible
//! `Other` kind carrying an opaque payload. All variants round-trip through
//! serde, which is what makes the fixed-slot marshaling format
//! self-describing.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Discriminant for [`ActivationArguments`] variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivationKind {
    /// Plain process launch with a command line
    Launch,
    /// File-association activation
    File,
    /// Protocol (URI) activation
    Protocol,
    /// Extensible activation kind not covered by the built-in variants
    Other,
}

/// Structured description of how a process was invoked
///
/// Captured once at startup for the process's own activation (see
/// [`ActivationArguments::from_environment`]) and forwarded between
/// processes during activation redirection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivationArguments {
    /// The process was launched directly
    Launch {
        /// The full command line the process was started with
        command_line: String,
    },
    /// The process was activated to open one or more files
    File {
        /// Paths of the files to open
        paths: Vec<PathBuf>,
    },
    /// The process was activated through a registered protocol
    Protocol {
        /// The URI that triggered the activation
        uri: String,
    },
    /// An activation kind outside the built-in set
    ///
    /// The discriminator field is `name`, not `kind`: `kind` is the enum's
    /// serde tag and cannot reappear as a variant field.
    Other {
        /// Application-defined name of the activation kind
        name: String,
        /// Opaque payload associated with the activation
        data: Vec<u8>,
    },
}

impl ActivationArguments {
    /// The kind of this activation
    pub fn kind(&self) -> ActivationKind {
        match self {
            Self::Launch { .. } => ActivationKind::Launch,
            Self::File { .. } => ActivationKind::File,
            Self::Protocol { .. } => ActivationKind::Protocol,
            Self::Other { .. } => ActivationKind::Other,
        }
    }

    /// Capture the current process's own activation from its environment
    ///
    /// Independent of the redirection channel: this is how the process
    /// itself was launched. The result is captured once at registry startup
    /// and returned by value on every query, so it is idempotent and never
    /// consumed.
    pub fn from_environment() -> Self {
        let command_line = std::env::args().collect::<Vec<_>>().join(" ");
        Self::Launch { command_line }
    }
}
