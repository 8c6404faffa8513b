//! Directory-backed package source
//!
//! Every package is a sub-directory of the root. Scene bundles are plain
//! files whose presence is checked; the scene system reads them itself.
//! Async reads go through `tokio::fs` inside a tokio runtime and fall back
//! to blocking `std::fs` reads outside one, e.g. when a load is forced to
//! finish on a plain thread.

use super::{EditorSource, PackageHandle, PackageSource};
use crate::error::{BundleError, BundleResult};
use std::path::{Path, PathBuf};

/// Package source reading from disk
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    editor_root: Option<PathBuf>,
}

impl DirectorySource {
    /// Create a source whose packages live under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            editor_root: None,
        }
    }

    /// Serve develop-mode assets from `root`
    pub fn with_editor_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.editor_root = Some(root.into());
        self
    }

    /// Get the package root
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn in_runtime() -> bool {
        tokio::runtime::Handle::try_current().is_ok()
    }

    fn package_dir<'a>(&self, package: &'a PackageHandle) -> BundleResult<&'a PathBuf> {
        package
            .data::<PathBuf>()
            .ok_or_else(|| BundleError::PackageNotInitialized(package.name().to_string()))
    }
}

#[async_trait::async_trait]
impl PackageSource for DirectorySource {
    fn open_package(&self, name: &str) -> BundleResult<PackageHandle> {
        let dir = self.root.join(name);
        if !dir.is_dir() {
            return Err(BundleError::PackageNotInitialized(name.to_string()));
        }
        log::debug!("Opened package '{}' at {:?}", name, dir);
        Ok(PackageHandle::new(name, dir))
    }

    fn read_resource(&self, package: &PackageHandle, path: &str) -> BundleResult<Vec<u8>> {
        let file = self.package_dir(package)?.join(path);
        std::fs::read(&file).map_err(|e| BundleError::load_failed(package.name(), path, e))
    }

    async fn read_resource_async(&self, package: &PackageHandle, path: &str) -> BundleResult<Vec<u8>> {
        if !Self::in_runtime() {
            return self.read_resource(package, path);
        }
        let file = self.package_dir(package)?.join(path);
        tokio::fs::read(&file)
            .await
            .map_err(|e| BundleError::load_failed(package.name(), path, e))
    }

    fn load_scene(&self, package: &PackageHandle, path: &str) -> BundleResult<()> {
        let file = self.package_dir(package)?.join(path);
        if file.is_file() {
            Ok(())
        } else {
            Err(BundleError::load_failed(package.name(), path, "scene bundle not found"))
        }
    }

    async fn load_scene_async(&self, package: &PackageHandle, path: &str) -> BundleResult<()> {
        if !Self::in_runtime() {
            return self.load_scene(package, path);
        }
        let file = self.package_dir(package)?.join(path);
        match tokio::fs::metadata(&file).await {
            Ok(meta) if meta.is_file() => Ok(()),
            Ok(_) => Err(BundleError::load_failed(package.name(), path, "scene bundle is not a file")),
            Err(e) => Err(BundleError::load_failed(package.name(), path, e)),
        }
    }
}

impl EditorSource for DirectorySource {
    fn read_asset(&self, path: &str) -> BundleResult<Vec<u8>> {
        let root = self
            .editor_root
            .as_ref()
            .ok_or_else(|| BundleError::EditorModeUnavailable(path.to_string()))?;
        std::fs::read(root.join(path)).map_err(|e| BundleError::load_failed("<editor>", path, e))
    }
}
