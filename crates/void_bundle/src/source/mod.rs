//! Package sources - the byte-level collaborators behind the runtime
//!
//! The runtime never touches package files itself. A [`PackageSource`]
//! opens packages and hands out resource bytes; an [`EditorSource`] serves
//! unpacked development assets for develop mode.

use crate::error::BundleResult;
use core::fmt;
use std::any::Any;
use std::sync::Arc;

pub mod memory;

#[cfg(feature = "fs")]
pub mod directory;

pub use memory::MemorySource;

#[cfg(feature = "fs")]
pub use directory::DirectorySource;

/// An opened package, owned by the package source
///
/// Cheap to clone. Sources can stash their own per-package state in it.
#[derive(Clone)]
pub struct PackageHandle {
    name: Arc<str>,
    data: Arc<dyn Any + Send + Sync>,
}

impl PackageHandle {
    /// Create a handle carrying source specific data
    pub fn new(name: impl Into<Arc<str>>, data: impl Any + Send + Sync) -> Self {
        Self {
            name: name.into(),
            data: Arc::new(data),
        }
    }

    /// Handle for a package that has no backing storage
    pub fn detached(name: impl Into<Arc<str>>) -> Self {
        Self::new(name, ())
    }

    /// Package name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Source specific data
    pub fn data<D: Any>(&self) -> Option<&D> {
        self.data.downcast_ref::<D>()
    }
}

impl fmt::Debug for PackageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageHandle")
            .field("name", &self.name)
            .finish()
    }
}

/// Opens packages and extracts resources from them
#[async_trait::async_trait]
pub trait PackageSource: Send + Sync {
    /// Locate an already initialized package
    ///
    /// Fails with `PackageNotInitialized` if the package does not exist.
    fn open_package(&self, name: &str) -> BundleResult<PackageHandle>;

    /// Read a resource's bytes, blocking
    fn read_resource(&self, package: &PackageHandle, path: &str) -> BundleResult<Vec<u8>>;

    /// Read a resource's bytes
    ///
    /// Default implementation falls back to the blocking read
    async fn read_resource_async(&self, package: &PackageHandle, path: &str) -> BundleResult<Vec<u8>> {
        self.read_resource(package, path)
    }

    /// Load a scene bundle, blocking
    fn load_scene(&self, package: &PackageHandle, path: &str) -> BundleResult<()>;

    /// Load a scene bundle
    ///
    /// Default implementation falls back to the blocking load
    async fn load_scene_async(&self, package: &PackageHandle, path: &str) -> BundleResult<()> {
        self.load_scene(package, path)
    }
}

/// Serves unpacked development assets for develop mode
pub trait EditorSource: Send + Sync {
    /// Read an asset straight from its source location
    fn read_asset(&self, path: &str) -> BundleResult<Vec<u8>>;
}
