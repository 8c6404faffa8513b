//! Package registries - handle bookkeeping per package
//!
//! Two levels:
//! - [`HandleRegistry`]: one per package, path -> handle for dedup and
//!   id -> handle for unloading
//! - [`PackageRegistry`]: package name -> handle registry

use crate::asset::Asset;
use crate::error::{BundleError, BundleResult};
use crate::handle::{HandleCore, HandleId, HandleKind, LoadHandle, LoadState, UntypedHandle};
use crate::source::PackageHandle;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Default)]
struct HandleMaps {
    /// Deduplicated asset handles
    by_path: HashMap<String, Arc<HandleCore>>,
    /// Every handle, scenes included
    by_id: BTreeMap<HandleId, Arc<HandleCore>>,
}

/// Handles of one initialized package
pub struct HandleRegistry {
    name: Arc<str>,
    package: PackageHandle,
    maps: RwLock<HandleMaps>,
}

impl HandleRegistry {
    /// Create an empty registry for an opened package
    pub fn new(package: PackageHandle) -> Arc<Self> {
        Arc::new(Self {
            name: Arc::from(package.name()),
            package,
            maps: RwLock::new(HandleMaps::default()),
        })
    }

    /// Package name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The opened package backing this registry
    pub fn package_handle(&self) -> &PackageHandle {
        &self.package
    }

    pub(crate) fn find_or_create_core(
        self: &Arc<Self>,
        path: &str,
        kind: HandleKind,
    ) -> BundleResult<Arc<HandleCore>> {
        let mut maps = self.maps.write();

        if let Some(existing) = maps.by_path.get(path) {
            let found = existing.kind();
            if !found.same_type(&kind) {
                let err = BundleError::TypeMismatch {
                    path: path.to_string(),
                    expected: kind.type_name(),
                    found: found.type_name(),
                };
                log::error!("{}", err);
                return Err(err);
            }
            return Ok(existing.clone());
        }

        let core = HandleCore::new(
            path,
            self.name.clone(),
            kind,
            Some(self.package.clone()),
            Arc::downgrade(self),
        );
        maps.by_path.insert(path.to_string(), core.clone());
        maps.by_id.insert(core.id(), core.clone());
        log::debug!("Created handle {} for '{}' in package '{}'", core.id(), path, self.name);

        Ok(core)
    }

    /// Get the handle for `path`, creating a `NoLoad` one if needed
    ///
    /// Repeated calls return the same handle until it is unloaded.
    pub fn find_or_create<T: Asset>(self: &Arc<Self>, path: &str) -> BundleResult<LoadHandle<T>> {
        self.find_or_create_core(path, HandleKind::asset::<T>())
            .map(LoadHandle::from_core)
    }

    /// Register a fresh scene handle; scenes are tracked by ID only
    pub(crate) fn create_scene(self: &Arc<Self>, path: &str) -> Arc<HandleCore> {
        let core = HandleCore::new(
            path,
            self.name.clone(),
            HandleKind::Scene,
            Some(self.package.clone()),
            Arc::downgrade(self),
        );
        self.maps.write().by_id.insert(core.id(), core.clone());
        log::debug!("Created scene handle {} for '{}' in package '{}'", core.id(), path, self.name);
        core
    }

    /// Look up the asset handle for a path
    pub fn get(&self, path: &str) -> Option<UntypedHandle> {
        self.maps
            .read()
            .by_path
            .get(path)
            .cloned()
            .map(UntypedHandle::from_core)
    }

    /// Look up any handle by ID
    pub fn get_by_id(&self, id: HandleId) -> Option<UntypedHandle> {
        self.maps
            .read()
            .by_id
            .get(&id)
            .cloned()
            .map(UntypedHandle::from_core)
    }

    /// Remove a handle from both maps without invalidating it
    pub(crate) fn detach(&self, id: HandleId) -> Option<Arc<HandleCore>> {
        let mut maps = self.maps.write();
        let core = maps.by_id.remove(&id)?;
        if maps.by_path.get(core.path()).map_or(false, |c| c.id() == id) {
            maps.by_path.remove(core.path());
        }
        Some(core)
    }

    /// Unload a handle
    ///
    /// The handle is removed from both maps and must not be used again.
    pub fn remove_by_id(&self, id: HandleId) -> Option<UntypedHandle> {
        let core = self.detach(id)?;
        core.invalidate();
        log::debug!("Unloaded handle {} ('{}') from package '{}'", id, core.path(), self.name);
        Some(UntypedHandle::from_core(core))
    }

    /// Unload every handle; returns how many were removed
    pub fn unload_all(&self) -> usize {
        let maps = core::mem::take(&mut *self.maps.write());
        let count = maps.by_id.len();
        for core in maps.by_id.into_values() {
            core.invalidate();
        }
        if count > 0 {
            log::info!("Unloaded {} handles from package '{}'", count, self.name);
        }
        count
    }

    /// Number of tracked handles, scenes included
    pub fn len(&self) -> usize {
        self.maps.read().by_id.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.maps.read().by_id.is_empty()
    }

    /// Number of deduplicated asset paths
    pub fn path_count(&self) -> usize {
        self.maps.read().by_path.len()
    }

    /// All handle IDs, oldest first
    pub fn ids(&self) -> Vec<HandleId> {
        self.maps.read().by_id.keys().copied().collect()
    }

    /// Number of handles in `Loaded` state
    pub fn loaded_count(&self) -> usize {
        self.maps
            .read()
            .by_id
            .values()
            .filter(|core| core.state() == LoadState::Loaded)
            .count()
    }
}

/// Read-only view of a package's handles, as returned by
/// [`AssetRuntime::runtime_info`](crate::AssetRuntime::runtime_info)
pub type PackageRuntimeInfo = HandleRegistry;

impl core::fmt::Debug for HandleRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let maps = self.maps.read();
        f.debug_struct("HandleRegistry")
            .field("name", &self.name)
            .field("paths", &maps.by_path.len())
            .field("handles", &maps.by_id.len())
            .finish()
    }
}

/// Initialized packages by name
#[derive(Default)]
pub struct PackageRegistry {
    packages: RwLock<HashMap<String, Arc<HandleRegistry>>>,
}

impl PackageRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the handle registry of an initialized package
    pub fn resolve(&self, name: &str) -> BundleResult<Arc<HandleRegistry>> {
        self.get(name).ok_or_else(|| {
            let err = BundleError::PackageNotInitialized(name.to_string());
            log::error!("{}", err);
            err
        })
    }

    /// Like [`resolve`](Self::resolve), without logging a miss
    pub fn get(&self, name: &str) -> Option<Arc<HandleRegistry>> {
        self.packages.read().get(name).cloned()
    }

    /// Register an opened package
    ///
    /// Idempotent: an already registered package keeps its registry.
    pub fn register(&self, package: PackageHandle) -> Arc<HandleRegistry> {
        let mut packages = self.packages.write();
        if let Some(existing) = packages.get(package.name()) {
            return existing.clone();
        }
        log::info!("Registered package '{}'", package.name());
        let registry = HandleRegistry::new(package);
        packages.insert(registry.name().to_string(), registry.clone());
        registry
    }

    /// Tear down a package, invalidating its handles
    pub fn remove(&self, name: &str) -> bool {
        let removed = self.packages.write().remove(name);
        match removed {
            Some(registry) => {
                registry.unload_all();
                log::info!("Removed package '{}'", name);
                true
            }
            None => false,
        }
    }

    /// Tear down every package; returns how many were removed
    pub fn clear(&self) -> usize {
        let packages = core::mem::take(&mut *self.packages.write());
        let count = packages.len();
        for registry in packages.into_values() {
            registry.unload_all();
        }
        count
    }

    /// Check if a package is registered
    pub fn contains(&self, name: &str) -> bool {
        self.packages.read().contains_key(name)
    }

    /// Registered package names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.packages.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered packages
    pub fn len(&self) -> usize {
        self.packages.read().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.packages.read().is_empty()
    }
}
