//! In-memory package source
//!
//! Useful for embedded content and for driving the runtime without a
//! filesystem.

use super::{EditorSource, PackageHandle, PackageSource};
use crate::error::{BundleError, BundleResult};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

#[derive(Default)]
struct MemoryPackage {
    resources: HashMap<String, Vec<u8>>,
    scenes: HashSet<String>,
}

/// Package source backed by in-memory maps
#[derive(Default)]
pub struct MemorySource {
    packages: RwLock<HashMap<String, MemoryPackage>>,
    editor_assets: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemorySource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an empty package
    pub fn with_package(self, package: &str) -> Self {
        self.packages.write().entry(package.to_string()).or_default();
        self
    }

    /// Add a resource, creating its package if needed
    pub fn with_resource(self, package: &str, path: &str, data: impl Into<Vec<u8>>) -> Self {
        self.insert_resource(package, path, data);
        self
    }

    /// Add a scene, creating its package if needed
    pub fn with_scene(self, package: &str, path: &str) -> Self {
        self.insert_scene(package, path);
        self
    }

    /// Add an unpacked development asset
    pub fn with_editor_asset(self, path: &str, data: impl Into<Vec<u8>>) -> Self {
        self.insert_editor_asset(path, data);
        self
    }

    /// Insert or replace a resource
    pub fn insert_resource(&self, package: &str, path: &str, data: impl Into<Vec<u8>>) {
        self.packages
            .write()
            .entry(package.to_string())
            .or_default()
            .resources
            .insert(path.to_string(), data.into());
    }

    /// Insert a scene
    pub fn insert_scene(&self, package: &str, path: &str) {
        self.packages
            .write()
            .entry(package.to_string())
            .or_default()
            .scenes
            .insert(path.to_string());
    }

    /// Insert or replace a development asset
    pub fn insert_editor_asset(&self, path: &str, data: impl Into<Vec<u8>>) {
        self.editor_assets.write().insert(path.to_string(), data.into());
    }
}

#[async_trait::async_trait]
impl PackageSource for MemorySource {
    fn open_package(&self, name: &str) -> BundleResult<PackageHandle> {
        if self.packages.read().contains_key(name) {
            Ok(PackageHandle::detached(name))
        } else {
            Err(BundleError::PackageNotInitialized(name.to_string()))
        }
    }

    fn read_resource(&self, package: &PackageHandle, path: &str) -> BundleResult<Vec<u8>> {
        let packages = self.packages.read();
        let entry = packages
            .get(package.name())
            .ok_or_else(|| BundleError::load_failed(package.name(), path, "package is gone"))?;
        entry
            .resources
            .get(path)
            .cloned()
            .ok_or_else(|| BundleError::load_failed(package.name(), path, "resource not in package"))
    }

    async fn read_resource_async(&self, package: &PackageHandle, path: &str) -> BundleResult<Vec<u8>> {
        YieldOnce::default().await;
        self.read_resource(package, path)
    }

    fn load_scene(&self, package: &PackageHandle, path: &str) -> BundleResult<()> {
        let packages = self.packages.read();
        match packages.get(package.name()) {
            Some(entry) if entry.scenes.contains(path) => Ok(()),
            Some(_) => Err(BundleError::load_failed(package.name(), path, "scene not in package")),
            None => Err(BundleError::load_failed(package.name(), path, "package is gone")),
        }
    }

    async fn load_scene_async(&self, package: &PackageHandle, path: &str) -> BundleResult<()> {
        YieldOnce::default().await;
        self.load_scene(package, path)
    }
}

impl EditorSource for MemorySource {
    fn read_asset(&self, path: &str) -> BundleResult<Vec<u8>> {
        self.editor_assets
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| BundleError::load_failed("<editor>", path, "no such development asset"))
    }
}

/// Pending on the first poll, ready on the second
///
/// Makes async reads suspend once, like a real I/O request would.
#[derive(Default)]
struct YieldOnce {
    yielded: bool,
}

impl Future for YieldOnce {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}
