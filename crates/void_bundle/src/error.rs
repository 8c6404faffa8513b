//! Error types for the bundle runtime

use thiserror::Error;

/// Bundle runtime errors
///
/// Errors are `Clone` so a single failed load can be handed to every waiter
/// queued on the same handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BundleError {
    /// The package was never initialized
    #[error("Package not initialized: {0}")]
    PackageNotInitialized(String),

    /// Develop mode requested without an editor asset source
    #[error("Develop load mode requires an editor source (requested for {0})")]
    EditorModeUnavailable(String),

    /// The package source could not produce the resource
    #[error("Failed to load '{path}' from package '{package}': {reason}")]
    ResourceLoadFailed {
        package: String,
        path: String,
        reason: String,
    },

    /// Raw bytes could not be decoded into the requested asset type
    #[error("Failed to decode '{path}': {reason}")]
    Decode { path: String, reason: String },

    /// The path is already tracked with a different asset type
    #[error("Asset type mismatch for '{path}': expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    /// A forced drain hit a load whose operation is being polled further up the stack
    #[error("Re-entrant load of '{0}'")]
    ReentrantLoad(String),

    /// The handle was unloaded or its package torn down
    #[error("Handle for '{0}' was unloaded")]
    HandleInvalidated(String),

    /// Invalid runtime configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl BundleError {
    /// Shorthand for [`BundleError::ResourceLoadFailed`]
    pub fn load_failed(
        package: impl Into<String>,
        path: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Self::ResourceLoadFailed {
            package: package.into(),
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for bundle operations
pub type BundleResult<T> = Result<T, BundleError>;
