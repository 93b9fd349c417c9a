//! Dynamic package dependency collaborator surface
//!
//! Thin wrappers over the OS package-dependency API, consumed by
//! applications that resolve framework packages at runtime. This module
//! forwards to the OS and does not design any dependency-resolution logic
//! of its own.
//!
//! `PackageFullName` lookup from a context id has no OS-provided reverse
//! mapping; it fails fast with [`AppLifecycleError::NotImplemented`] rather
//! than guessing.

use crate::error::Result;

#[cfg(windows)]
use crate::error::AppLifecycleError;

/// Opaque identifier of a resolved package dependency context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PackageDependencyContextId(pub usize);

/// A resolved package dependency, removable when no longer needed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageDependencyContext {
    context_id: PackageDependencyContextId,
}

impl PackageDependencyContext {
    /// Wrap an existing dependency context id
    pub fn new(context_id: PackageDependencyContextId) -> Self {
        Self { context_id }
    }

    /// The context id this wrapper refers to
    pub fn context_id(&self) -> PackageDependencyContextId {
        self.context_id
    }

    /// Full name of the package this context resolved to
    ///
    /// # Errors
    ///
    /// Always fails with [`crate::AppLifecycleError::NotImplemented`]:
    /// the OS offers no context-id-to-package lookup.
    pub fn package_full_name(&self) -> Result<String> {
        Err(crate::AppLifecycleError::NotImplemented(
            "context id to package full name lookup",
        ))
    }

    /// Remove the package dependency from the current process
    #[cfg(windows)]
    #[expect(unsafe_code, reason = "Windows FFI for RemovePackageDependency")]
    pub fn remove(&self) -> Result<()> {
        use windows::Win32::Storage::Packaging::Appx::{
            PACKAGEDEPENDENCY_CONTEXT, RemovePackageDependency,
        };

        unsafe { RemovePackageDependency(PACKAGEDEPENDENCY_CONTEXT(self.context_id.0 as _))? };
        tracing::debug!("removed package dependency context {:?}", self.context_id);
        Ok(())
    }

    /// Remove the package dependency from the current process
    ///
    /// Stub for non-Windows platforms; package dependencies only exist on
    /// Windows.
    #[cfg(not(windows))]
    pub fn remove(&self) -> Result<()> {
        Err(crate::AppLifecycleError::NotImplemented(
            "package dependencies are only available on Windows",
        ))
    }
}

/// Full name of the package the current process runs under
///
/// # Errors
///
/// Returns [`AppLifecycleError::NoPackageIdentity`] when the process is not
/// packaged (`APPMODEL_ERROR_NO_PACKAGE`), or a Windows API error for any
/// other failure.
#[cfg(windows)]
#[expect(
    unsafe_code,
    reason = "Windows FFI for GetCurrentPackageFullName via the two-call buffer pattern"
)]
pub fn current_package_full_name() -> Result<String> {
    use windows::Win32::Foundation::WIN32_ERROR;
    use windows::Win32::Storage::Packaging::Appx::GetCurrentPackageFullName;
    use windows::core::PWSTR;

    // APPMODEL_ERROR_NO_PACKAGE (15700): the process has no package identity
    const APPMODEL_ERROR_NO_PACKAGE: WIN32_ERROR = WIN32_ERROR(15700);
    const ERROR_INSUFFICIENT_BUFFER: WIN32_ERROR = WIN32_ERROR(122);
    const ERROR_SUCCESS: WIN32_ERROR = WIN32_ERROR(0);

    // First call to get the required buffer length
    let mut length: u32 = 0;
    let result = unsafe { GetCurrentPackageFullName(&raw mut length, None) };

    if result == APPMODEL_ERROR_NO_PACKAGE {
        return Err(AppLifecycleError::NoPackageIdentity);
    }
    if result != ERROR_INSUFFICIENT_BUFFER {
        return Err(windows::core::Error::from(result.to_hresult()).into());
    }

    // Second call to retrieve the actual package full name
    let mut buffer = vec![0u16; length as usize];
    let result =
        unsafe { GetCurrentPackageFullName(&raw mut length, Some(PWSTR(buffer.as_mut_ptr()))) };
    if result != ERROR_SUCCESS {
        return Err(windows::core::Error::from(result.to_hresult()).into());
    }

    // length includes the NUL terminator
    let null_pos = buffer.iter().position(|&c| c == 0).unwrap_or(buffer.len());
    String::from_utf16(&buffer[..null_pos]).map_err(|e| {
        AppLifecycleError::Platform(crate::error::StringError::new(format!(
            "package full name is not valid UTF-16: {e}"
        )))
    })
}

/// Full name of the package the current process runs under
///
/// Stub for non-Windows platforms; processes never have package identity.
#[cfg(not(windows))]
pub fn current_package_full_name() -> Result<String> {
    Err(crate::AppLifecycleError::NoPackageIdentity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_id_round_trip() {
        let context = PackageDependencyContext::new(PackageDependencyContextId(42));
        assert_eq!(context.context_id(), PackageDependencyContextId(42));
    }

    #[test]
    fn test_package_full_name_fails_fast() {
        let context = PackageDependencyContext::new(PackageDependencyContextId(7));
        assert!(matches!(
            context.package_full_name(),
            Err(crate::AppLifecycleError::NotImplemented(_))
        ));
    }

    #[test]
    fn test_unpackaged_process_has_no_identity() {
        // Test binaries never carry package identity, on any platform
        assert!(matches!(
            current_package_full_name(),
            Err(crate::AppLifecycleError::NoPackageIdentity)
        ));
    }
}
