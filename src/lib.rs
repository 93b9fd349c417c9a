//! `applifecycle` - cross-process app-instance lifecycle for Windows
//!
//! Lets multiple invocations of the same logical application discover each
//! other through a named shared-memory registry, elect a single owner per
//! logical key, and forward activation arguments (launch / file / protocol
//! payloads) from a newly launched process to the already-running owner,
//! waking it via cross-process synchronization primitives.
//!
//! # Typical flow
//!
//! ```no_run
//! use applifecycle::{ActivationArguments, AppInstance};
//!
//! # fn main() -> applifecycle::Result<()> {
//! let instance = AppInstance::find_or_register_for_key("main")?;
//! if instance.is_current() {
//!     // This process owns the key; service redirected activations
//!     instance.on_activated(std::sync::Arc::new(|args| {
//!         println!("redirected activation: {args:?}");
//!     }));
//! } else {
//!     // Another instance already owns the key; delegate and exit
//!     instance.redirect_to(&ActivationArguments::from_environment())?;
//!     return Ok(());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Platform support
//!
//! The shared registry is backed by named Windows objects (file mapping,
//! mutexes, events) scoped to the current user session. On other platforms
//! the crate degrades to a functional in-process fallback, which is also
//! what the test suite runs against.

// Module declarations
pub mod activation;
pub mod dynamic_dependency;
pub mod error;
pub mod instance;
pub mod platform;
pub mod registry;
pub mod utils;

// Re-export commonly used types
pub use activation::{ActivationArguments, ActivationKind};
pub use error::{AppLifecycleError, Result};
pub use instance::AppInstance;
pub use registry::{ActivationObserver, ActivationToken, InstanceRegistry};
