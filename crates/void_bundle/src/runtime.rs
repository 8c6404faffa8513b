//! Asset Runtime - the public loading entry point
//!
//! The AssetRuntime owns the package registry and the package sources.
//! It supports:
//! - Synchronous and asynchronous asset loads, deduplicated per package
//! - Scene loads, including a deferred start that can be drained later
//! - Develop mode, reading unpacked assets without any package
//!
//! All registries live as long as the runtime; [`AssetRuntime::shutdown`]
//! tears them down and invalidates every handle.

use crate::asset::{Asset, LoadContext};
use crate::config::{LoadMode, RuntimeConfig};
use crate::error::{BundleError, BundleResult};
use crate::handle::{HandleCore, HandleId, HandleKind, LoadHandle, LoadOp, Payload, SceneHandle};
use crate::registry::{HandleRegistry, PackageRegistry};
use crate::source::{EditorSource, PackageHandle, PackageSource};
use futures::FutureExt;
use std::sync::Arc;

/// Decode bytes read for `path` into a payload of type `T`
fn decode<T: Asset>(package: &str, path: &str, bytes: &[u8]) -> BundleResult<Payload> {
    let asset = T::decode(&LoadContext::new(package, path, bytes))?;
    Ok(Payload::Asset(Arc::new(asset)))
}

/// The main asset runtime
pub struct AssetRuntime {
    /// Configuration
    config: RuntimeConfig,
    /// Initialized packages
    packages: PackageRegistry,
    /// Packaged content
    source: Arc<dyn PackageSource>,
    /// Unpacked development content, develop mode only
    editor: Option<Arc<dyn EditorSource>>,
}

impl AssetRuntime {
    /// Create a new runtime
    pub fn new(config: RuntimeConfig, source: impl PackageSource + 'static) -> Self {
        log::info!(
            "Asset runtime created (mode: {:?}, default package: '{}')",
            config.load_mode,
            config.default_package
        );
        Self {
            config,
            packages: PackageRegistry::new(),
            source: Arc::new(source),
            editor: None,
        }
    }

    /// Attach an editor source, enabling develop mode
    pub fn with_editor_source(mut self, editor: impl EditorSource + 'static) -> Self {
        self.editor = Some(Arc::new(editor));
        self
    }

    /// Get the configuration
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Get the package registry
    pub fn packages(&self) -> &PackageRegistry {
        &self.packages
    }

    fn package_name<'a>(&'a self, package: Option<&'a str>) -> &'a str {
        package.unwrap_or(&self.config.default_package)
    }

    fn editor_source(&self, path: &str) -> BundleResult<&Arc<dyn EditorSource>> {
        self.editor.as_ref().ok_or_else(|| {
            let err = BundleError::EditorModeUnavailable(path.to_string());
            log::error!("{}", err);
            err
        })
    }

    /// Open a package through the package source and register it
    ///
    /// Initializing an already registered package returns its registry.
    pub fn init_package(&self, name: &str) -> BundleResult<Arc<HandleRegistry>> {
        if let Some(existing) = self.packages.get(name) {
            return Ok(existing);
        }
        let package = self.source.open_package(name).map_err(|err| {
            log::error!("Failed to initialize package '{}': {}", name, err);
            err
        })?;
        Ok(self.packages.register(package))
    }

    /// Load an asset, blocking until it is available
    ///
    /// If the asset is already loading asynchronously, that load is forced to
    /// finish on this thread.
    pub fn load<T: Asset>(&self, path: &str, package: Option<&str>) -> BundleResult<LoadHandle<T>> {
        let package = self.package_name(package);
        if self.config.load_mode == LoadMode::Develop {
            return self.load_direct(path, package);
        }

        let registry = self.packages.resolve(package)?;
        let core = registry.find_or_create_core(path, HandleKind::asset::<T>())?;
        core.load_blocking(|| {
            let bytes = self.source.read_resource(registry.package_handle(), path)?;
            decode::<T>(package, path, &bytes)
        })?;

        Ok(LoadHandle::from_core(core))
    }

    /// Load an asset without blocking
    ///
    /// Concurrent requests for the same path share one load and one handle.
    pub async fn load_async<T: Asset>(&self, path: &str, package: Option<&str>) -> BundleResult<LoadHandle<T>> {
        let package = self.package_name(package);
        if self.config.load_mode == LoadMode::Develop {
            return self.load_direct(path, package);
        }

        let registry = self.packages.resolve(package)?;
        let core = registry.find_or_create_core(path, HandleKind::asset::<T>())?;
        let completion = core.enqueue(|| self.asset_op::<T>(registry.package_handle(), path))?;
        if let Some(completion) = completion {
            completion.await?;
        }

        Ok(LoadHandle::from_core(core))
    }

    fn asset_op<T: Asset>(&self, package: &PackageHandle, path: &str) -> LoadOp {
        let source = self.source.clone();
        let package = package.clone();
        let path = path.to_string();
        async move {
            let bytes = source.read_resource_async(&package, &path).await?;
            decode::<T>(package.name(), &path, &bytes)
        }
        .boxed()
    }

    fn load_direct<T: Asset>(&self, path: &str, package: &str) -> BundleResult<LoadHandle<T>> {
        let editor = self.editor_source(path)?;
        let payload = editor
            .read_asset(path)
            .and_then(|bytes| decode::<T>(package, path, &bytes))
            .map_err(|err| {
                log::error!("{}", err);
                err
            })?;
        Ok(LoadHandle::from_core(HandleCore::detached(
            path,
            package,
            HandleKind::asset::<T>(),
            payload,
        )))
    }

    fn direct_scene(&self, path: &str, package: &str) -> BundleResult<SceneHandle> {
        self.editor_source(path)?;
        Ok(SceneHandle::from_core(HandleCore::detached(
            path,
            package,
            HandleKind::Scene,
            Payload::Scene,
        )))
    }

    fn scene_op(&self, package: &PackageHandle, path: &str) -> LoadOp {
        let source = self.source.clone();
        let package = package.clone();
        let path = path.to_string();
        async move {
            source.load_scene_async(&package, &path).await?;
            Ok(Payload::Scene)
        }
        .boxed()
    }

    /// Load a scene bundle, blocking
    ///
    /// Every call creates a new scene handle.
    pub fn load_scene(&self, path: &str, package: Option<&str>) -> BundleResult<SceneHandle> {
        let package = self.package_name(package);
        if self.config.load_mode == LoadMode::Develop {
            return self.direct_scene(path, package);
        }

        let registry = self.packages.resolve(package)?;
        let core = registry.create_scene(path);
        core.load_blocking(|| {
            self.source.load_scene(registry.package_handle(), path)?;
            Ok(Payload::Scene)
        })?;

        Ok(SceneHandle::from_core(core))
    }

    /// Load a scene bundle without blocking
    pub async fn load_scene_async(&self, path: &str, package: Option<&str>) -> BundleResult<SceneHandle> {
        let handle = self.begin_scene_load(path, package)?;
        handle.wait().await?;
        Ok(handle)
    }

    /// Start a scene load and return its handle right away
    ///
    /// The load makes progress while the handle is awaited through
    /// [`SceneHandle::wait`], or runs to completion on
    /// [`SceneHandle::finish`].
    pub fn begin_scene_load(&self, path: &str, package: Option<&str>) -> BundleResult<SceneHandle> {
        let package = self.package_name(package);
        if self.config.load_mode == LoadMode::Develop {
            return self.direct_scene(path, package);
        }

        let registry = self.packages.resolve(package)?;
        let core = registry.create_scene(path);
        core.start(|| self.scene_op(registry.package_handle(), path))?;

        Ok(SceneHandle::from_core(core))
    }

    /// Get the handle registry of a package
    ///
    /// In develop mode the package is registered on first use, which needs
    /// an editor source.
    pub fn runtime_info(&self, package: &str) -> BundleResult<Arc<HandleRegistry>> {
        if self.config.load_mode == LoadMode::Develop {
            self.editor_source(package)?;
            return Ok(self.packages.register(PackageHandle::detached(package)));
        }
        self.packages.resolve(package)
    }

    /// Unload one handle of a package
    pub fn unload(&self, package: &str, id: HandleId) -> bool {
        self.packages
            .get(package)
            .and_then(|registry| registry.remove_by_id(id))
            .is_some()
    }

    /// Tear down one package, invalidating its handles
    pub fn unload_package(&self, package: &str) -> bool {
        self.packages.remove(package)
    }

    /// Tear down every package, invalidating all handles
    ///
    /// Returns the number of packages removed.
    pub fn shutdown(&self) -> usize {
        let count = self.packages.clear();
        log::info!("Asset runtime shut down ({} packages)", count);
        count
    }
}

impl core::fmt::Debug for AssetRuntime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AssetRuntime")
            .field("config", &self.config)
            .field("packages", &self.packages.names())
            .field("editor", &self.editor.is_some())
            .finish()
    }
}
