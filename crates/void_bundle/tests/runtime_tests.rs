//! Integration tests for void_bundle

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use void_bundle::prelude::*;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// Minimal texture format: little-endian width and height, then RGBA pixels
#[derive(Debug)]
struct Texture {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Asset for Texture {
    fn decode(ctx: &LoadContext<'_>) -> BundleResult<Self> {
        if ctx.data.len() < 8 {
            return Err(ctx.decode_error("missing texture header"));
        }
        let width = u32::from_le_bytes(ctx.data[0..4].try_into().unwrap());
        let height = u32::from_le_bytes(ctx.data[4..8].try_into().unwrap());
        let pixels = ctx.data[8..].to_vec();
        if pixels.len() != (width * height * 4) as usize {
            return Err(ctx.decode_error("pixel data does not match size"));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }
}

fn texture_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&width.to_le_bytes());
    data.extend_from_slice(&height.to_le_bytes());
    data.resize(8 + (width * height * 4) as usize, 0xff);
    data
}

#[derive(Default)]
struct Counters {
    sync_reads: AtomicUsize,
    async_reads: AtomicUsize,
    sync_scenes: AtomicUsize,
    async_scenes: AtomicUsize,
}

impl Counters {
    fn reads(&self) -> (usize, usize) {
        (
            self.sync_reads.load(Ordering::SeqCst),
            self.async_reads.load(Ordering::SeqCst),
        )
    }

    fn scenes(&self) -> (usize, usize) {
        (
            self.sync_scenes.load(Ordering::SeqCst),
            self.async_scenes.load(Ordering::SeqCst),
        )
    }
}

// Counts every primitive issued against the wrapped source
struct CountingSource {
    inner: Arc<MemorySource>,
    counters: Arc<Counters>,
    gate: Option<Arc<Semaphore>>,
    /// Extra scheduler yields before each async read
    yields: usize,
}

#[async_trait::async_trait]
impl PackageSource for CountingSource {
    fn open_package(&self, name: &str) -> BundleResult<PackageHandle> {
        self.inner.open_package(name)
    }

    fn read_resource(&self, package: &PackageHandle, path: &str) -> BundleResult<Vec<u8>> {
        self.counters.sync_reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_resource(package, path)
    }

    async fn read_resource_async(&self, package: &PackageHandle, path: &str) -> BundleResult<Vec<u8>> {
        self.counters.async_reads.fetch_add(1, Ordering::SeqCst);
        for _ in 0..self.yields {
            tokio::task::yield_now().await;
        }
        if let Some(gate) = &self.gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| BundleError::load_failed(package.name(), path, e))?;
        }
        self.inner.read_resource_async(package, path).await
    }

    fn load_scene(&self, package: &PackageHandle, path: &str) -> BundleResult<()> {
        self.counters.sync_scenes.fetch_add(1, Ordering::SeqCst);
        self.inner.load_scene(package, path)
    }

    async fn load_scene_async(&self, package: &PackageHandle, path: &str) -> BundleResult<()> {
        self.counters.async_scenes.fetch_add(1, Ordering::SeqCst);
        self.inner.load_scene_async(package, path).await
    }
}

struct Fixture {
    runtime: AssetRuntime,
    content: Arc<MemorySource>,
    counters: Arc<Counters>,
}

fn content() -> MemorySource {
    MemorySource::new()
        .with_resource("ui_pack", "ui/icon.png", texture_bytes(2, 2))
        .with_resource("ui_pack", "ui/title.txt", "Void")
        .with_resource("ui_pack", "ui/broken.png", vec![1, 2, 3])
        .with_scene("levels", "level1")
        .with_editor_asset("ui/icon.png", texture_bytes(1, 1))
}

fn fixture_with(config: RuntimeConfig, gate: Option<Arc<Semaphore>>, yields: usize) -> Fixture {
    init_logging();
    let content = Arc::new(content());
    let counters = Arc::new(Counters::default());
    let source = CountingSource {
        inner: content.clone(),
        counters: counters.clone(),
        gate,
        yields,
    };
    Fixture {
        runtime: AssetRuntime::new(config, source),
        content,
        counters,
    }
}

fn packaged() -> Fixture {
    let fixture = fixture_with(RuntimeConfig::packaged("ui_pack"), None, 0);
    fixture.runtime.init_package("ui_pack").unwrap();
    fixture.runtime.init_package("levels").unwrap();
    fixture
}

#[test]
fn test_sync_load() {
    let fx = packaged();

    let icon = fx.runtime.load::<Texture>("ui/icon.png", Some("ui_pack")).unwrap();
    assert!(icon.is_loaded());
    assert_eq!(icon.package(), "ui_pack");
    assert_eq!(icon.backing_package().unwrap().name(), "ui_pack");

    let texture = icon.asset().unwrap();
    assert_eq!((texture.width, texture.height), (2, 2));
    assert_eq!(texture.pixels.len(), 16);

    // Loaded is terminal: no second read
    let again = fx.runtime.load::<Texture>("ui/icon.png", None).unwrap();
    assert!(icon.ptr_eq(&again));
    assert_eq!(fx.counters.reads(), (1, 0));
}

#[tokio::test]
async fn test_back_to_back_async_loads_share_handle() {
    let fx = packaged();

    let (a, b) = tokio::join!(
        fx.runtime.load_async::<Texture>("ui/icon.png", Some("ui_pack")),
        fx.runtime.load_async::<Texture>("ui/icon.png", Some("ui_pack")),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(a.ptr_eq(&b));
    assert_eq!(a, b);
    assert!(Arc::ptr_eq(&a.asset().unwrap(), &b.asset().unwrap()));
    assert_eq!(fx.counters.reads(), (0, 1));

    let registry = fx.runtime.runtime_info("ui_pack").unwrap();
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.loaded_count(), 1);
}

#[tokio::test]
async fn test_forced_sync_load_drains_async_load() {
    let fx = packaged();

    let pending = fx.runtime.load_async::<Texture>("ui/icon.png", None);
    futures::pin_mut!(pending);
    assert!(futures::poll!(pending.as_mut()).is_pending());

    let registry = fx.runtime.runtime_info("ui_pack").unwrap();
    assert_eq!(registry.get("ui/icon.png").unwrap().state(), LoadState::Loading);

    let forced = fx.runtime.load::<Texture>("ui/icon.png", None).unwrap();
    assert!(forced.is_loaded());

    let awaited = pending.await.unwrap();
    assert!(forced.ptr_eq(&awaited));
    // The async primitive was finished, never reissued synchronously
    assert_eq!(fx.counters.reads(), (0, 1));
}

#[tokio::test]
async fn test_waiters_resume_in_registration_order() {
    let gate = Arc::new(Semaphore::new(0));
    let fx = fixture_with(RuntimeConfig::packaged("ui_pack"), Some(gate.clone()), 0);
    fx.runtime.init_package("ui_pack").unwrap();

    let runtime = Arc::new(fx.runtime);
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut tasks = Vec::new();

    for i in 0..4 {
        let runtime = runtime.clone();
        let order = order.clone();
        tasks.push(tokio::spawn(async move {
            let handle = runtime.load_async::<Texture>("ui/icon.png", None).await.unwrap();
            order.lock().push(i);
            handle
        }));
        // Let the task register before spawning the next one
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    let registry = runtime.runtime_info("ui_pack").unwrap();
    assert_eq!(registry.get("ui/icon.png").unwrap().state(), LoadState::Loading);
    assert!(order.lock().is_empty());

    gate.add_permits(1);

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap());
    }

    assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    assert!(handles.windows(2).all(|pair| pair[0].ptr_eq(&pair[1])));
    assert_eq!(fx.counters.reads(), (0, 1));
}

#[tokio::test]
async fn test_initiator_that_finishes_load_resumes_first() {
    let fx = fixture_with(RuntimeConfig::packaged("ui_pack"), None, 1);
    fx.runtime.init_package("ui_pack").unwrap();

    let first = fx.runtime.load_async::<Texture>("ui/icon.png", None);
    let second = fx.runtime.load_async::<Texture>("ui/icon.png", None);
    futures::pin_mut!(first, second);

    assert!(futures::poll!(first.as_mut()).is_pending());
    assert!(futures::poll!(second.as_mut()).is_pending());

    // The initiator completes the read and must not be queued behind the second waiter
    let first = match futures::poll!(first.as_mut()) {
        std::task::Poll::Ready(handle) => handle.unwrap(),
        std::task::Poll::Pending => panic!("initiator did not resume after finishing the load"),
    };
    let second = second.await.unwrap();
    assert!(first.ptr_eq(&second));
    assert_eq!(fx.counters.reads(), (0, 1));
}

#[tokio::test]
async fn test_spawned_waiters_resume_in_order() {
    let fx = fixture_with(RuntimeConfig::packaged("ui_pack"), None, 2);
    fx.runtime.init_package("ui_pack").unwrap();

    let runtime = Arc::new(fx.runtime);
    let order = Arc::new(Mutex::new(Vec::new()));
    let tasks: Vec<_> = (0..2)
        .map(|i| {
            let runtime = runtime.clone();
            let order = order.clone();
            tokio::spawn(async move {
                runtime.load_async::<Texture>("ui/icon.png", None).await.unwrap();
                order.lock().push(i);
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(*order.lock(), vec![0, 1]);
    assert_eq!(fx.counters.reads(), (0, 1));
}

#[tokio::test]
async fn test_uninitialized_package() {
    let fx = fixture_with(RuntimeConfig::default(), None, 0);

    assert_eq!(
        fx.runtime.load::<Texture>("ui/icon.png", Some("ui_pack")).unwrap_err(),
        BundleError::PackageNotInitialized("ui_pack".to_string())
    );
    assert_eq!(
        fx.runtime
            .load_async::<Texture>("ui/icon.png", Some("ui_pack"))
            .await
            .unwrap_err(),
        BundleError::PackageNotInitialized("ui_pack".to_string())
    );
    assert!(fx.runtime.load_scene("level1", Some("levels")).is_err());
    assert!(fx.runtime.begin_scene_load("level1", Some("levels")).is_err());
    assert!(fx.runtime.runtime_info("ui_pack").is_err());

    assert!(fx.runtime.packages().is_empty());
    assert_eq!(fx.counters.reads(), (0, 0));
}

#[test]
fn test_init_unknown_package() {
    let fx = fixture_with(RuntimeConfig::default(), None, 0);

    assert_eq!(
        fx.runtime.init_package("dlc").unwrap_err(),
        BundleError::PackageNotInitialized("dlc".to_string())
    );
    assert!(!fx.runtime.packages().contains("dlc"));
}

#[test]
fn test_editor_scene_load_skips_registries() {
    let fx = fixture_with(RuntimeConfig::develop("main"), None, 0);
    let runtime = fx.runtime.with_editor_source(content());

    let scene = runtime.load_scene("level1", Some("levels")).unwrap();
    assert!(scene.is_loaded());
    assert_eq!(scene.package(), "levels");
    assert!(runtime.packages().is_empty());
    assert_eq!(fx.counters.scenes(), (0, 0));

    let icon = runtime.load::<Texture>("ui/icon.png", Some("ui_pack")).unwrap();
    assert_eq!(icon.asset().unwrap().width, 1);
    assert!(icon.backing_package().is_none());
    assert!(runtime.packages().is_empty());
}

#[tokio::test]
async fn test_editor_runtime_info_registers_implicitly() {
    let fx = fixture_with(RuntimeConfig::develop("main"), None, 0);
    let runtime = fx.runtime.with_editor_source(content());

    let scene = runtime.load_scene_async("level1", Some("levels")).await.unwrap();
    assert!(scene.is_loaded());

    let info = runtime.runtime_info("levels").unwrap();
    assert!(info.is_empty());
    assert!(runtime.packages().contains("levels"));
}

#[tokio::test]
async fn test_develop_mode_without_editor_source() {
    let fx = fixture_with(RuntimeConfig::develop("main"), None, 0);

    assert_eq!(
        fx.runtime.load_async::<Texture>("ui/icon.png", None).await.unwrap_err(),
        BundleError::EditorModeUnavailable("ui/icon.png".to_string())
    );
    assert_eq!(
        fx.runtime.load_scene("level1", None).unwrap_err(),
        BundleError::EditorModeUnavailable("level1".to_string())
    );
    assert!(fx.runtime.packages().is_empty());
}

#[tokio::test]
async fn test_failed_load_releases_all_waiters() {
    let fx = packaged();

    let (a, b) = tokio::join!(
        fx.runtime.load_async::<Texture>("ui/missing.png", None),
        fx.runtime.load_async::<Texture>("ui/missing.png", None),
    );
    assert!(matches!(a, Err(BundleError::ResourceLoadFailed { .. })));
    assert_eq!(a.unwrap_err(), b.unwrap_err());
    assert_eq!(fx.counters.reads(), (0, 1));

    // No dangling handle; a later request starts over
    let registry = fx.runtime.runtime_info("ui_pack").unwrap();
    assert!(registry.is_empty());

    fx.content.insert_resource("ui_pack", "ui/missing.png", texture_bytes(1, 1));
    let found = fx.runtime.load_async::<Texture>("ui/missing.png", None).await.unwrap();
    assert!(found.is_loaded());
    assert_eq!(fx.counters.reads(), (0, 2));
}

#[test]
fn test_decode_failure() {
    let fx = packaged();

    match fx.runtime.load::<Texture>("ui/broken.png", None) {
        Err(BundleError::Decode { path, .. }) => assert_eq!(path, "ui/broken.png"),
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(fx.runtime.runtime_info("ui_pack").unwrap().is_empty());
}

#[test]
fn test_type_mismatch() {
    let fx = packaged();

    fx.runtime.load::<Text>("ui/title.txt", None).unwrap();
    assert!(matches!(
        fx.runtime.load::<Bytes>("ui/title.txt", None),
        Err(BundleError::TypeMismatch { .. })
    ));

    let untyped = fx.runtime.runtime_info("ui_pack").unwrap().get("ui/title.txt").unwrap();
    assert!(untyped.typed::<Text>().is_some());
    assert!(untyped.typed::<Bytes>().is_none());
}

#[test]
fn test_scene_handles_are_fresh() {
    let fx = packaged();

    let first = fx.runtime.load_scene("level1", Some("levels")).unwrap();
    let second = fx.runtime.load_scene("level1", Some("levels")).unwrap();
    assert!(first.is_loaded());
    assert_ne!(first.id(), second.id());
    assert_eq!(fx.counters.scenes(), (2, 0));

    let levels = fx.runtime.runtime_info("levels").unwrap();
    assert_eq!(levels.len(), 2);
    assert_eq!(levels.path_count(), 0);
    assert!(levels.get_by_id(first.id()).unwrap().is_scene());
}

#[test]
fn test_begin_scene_load_then_finish() {
    let fx = packaged();

    let scene = fx.runtime.begin_scene_load("level1", Some("levels")).unwrap();
    assert_eq!(scene.state(), LoadState::Loading);

    scene.finish().unwrap();
    assert!(scene.is_loaded());
    assert_eq!(fx.counters.scenes(), (0, 1));

    // Already loaded
    scene.finish().unwrap();
    assert_eq!(fx.counters.scenes(), (0, 1));
}

#[tokio::test]
async fn test_begin_scene_load_then_wait() {
    let fx = packaged();

    let scene = fx.runtime.begin_scene_load("level1", Some("levels")).unwrap();
    scene.wait().await.unwrap();
    assert!(scene.is_loaded());

    let missing = fx.runtime.begin_scene_load("level9", Some("levels")).unwrap();
    assert!(matches!(
        missing.wait().await,
        Err(BundleError::ResourceLoadFailed { .. })
    ));
    assert!(matches!(missing.finish(), Err(BundleError::ResourceLoadFailed { .. })));

    let levels = fx.runtime.runtime_info("levels").unwrap();
    assert_eq!(levels.ids(), vec![scene.id()]);
}

#[test]
fn test_unload_single_handle() {
    let fx = packaged();

    let title = fx.runtime.load::<Text>("ui/title.txt", None).unwrap();
    assert!(fx.runtime.unload("ui_pack", title.id()));
    assert!(!title.is_valid());
    assert_eq!(title.state(), LoadState::NoLoad);

    let registry = fx.runtime.runtime_info("ui_pack").unwrap();
    assert!(registry.get("ui/title.txt").is_none());
    assert!(registry.get_by_id(title.id()).is_none());
    assert!(!fx.runtime.unload("levels", title.id()));
}

#[tokio::test]
async fn test_unload_package_releases_waiters() {
    let fx = packaged();

    let pending = fx.runtime.load_async::<Texture>("ui/icon.png", None);
    futures::pin_mut!(pending);
    assert!(futures::poll!(pending.as_mut()).is_pending());

    assert!(fx.runtime.unload_package("ui_pack"));
    assert_eq!(
        pending.await.unwrap_err(),
        BundleError::HandleInvalidated("ui/icon.png".to_string())
    );
    assert!(!fx.runtime.unload_package("ui_pack"));
    assert!(fx.runtime.runtime_info("ui_pack").is_err());
}

#[test]
fn test_shutdown_invalidates_everything() {
    let fx = packaged();

    let icon = fx.runtime.load::<Texture>("ui/icon.png", None).unwrap();
    let scene = fx.runtime.load_scene("level1", Some("levels")).unwrap();

    assert_eq!(fx.runtime.shutdown(), 2);
    assert!(!icon.is_valid());
    assert!(icon.asset().is_none());
    assert!(!scene.is_valid());
    assert!(fx.runtime.packages().is_empty());

    assert_eq!(
        fx.runtime.load::<Texture>("ui/icon.png", None).unwrap_err(),
        BundleError::PackageNotInitialized("ui_pack".to_string())
    );
}

#[test]
fn test_config_from_json() {
    let config = RuntimeConfig::from_json(r#"{ "default_package": "ui_pack" }"#).unwrap();
    let runtime = AssetRuntime::new(config, content());
    runtime.init_package("ui_pack").unwrap();

    let title = runtime.load::<Text>("ui/title.txt", None).unwrap();
    assert_eq!(title.asset().unwrap().0, "Void");
    assert_eq!(runtime.config().load_mode, LoadMode::Local);
}

#[cfg(feature = "fs")]
static TEST_COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

#[cfg(feature = "fs")]
fn package_dir() -> std::path::PathBuf {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    let root = std::env::temp_dir().join(format!("void_bundle_runtime_test_{}_{}", std::process::id(), id));
    let _ = std::fs::remove_dir_all(&root);
    std::fs::create_dir_all(root.join("ui_pack/ui")).unwrap();
    std::fs::create_dir_all(root.join("levels")).unwrap();
    std::fs::write(root.join("ui_pack/ui/icon.png"), texture_bytes(4, 4)).unwrap();
    std::fs::write(root.join("levels/level1"), b"scene").unwrap();
    root
}

#[cfg(feature = "fs")]
#[tokio::test]
async fn test_directory_source_end_to_end() {
    init_logging();
    let root = package_dir();
    let runtime = AssetRuntime::new(RuntimeConfig::packaged("ui_pack"), DirectorySource::new(&root));
    runtime.init_package("ui_pack").unwrap();
    runtime.init_package("levels").unwrap();

    let icon = runtime.load_async::<Texture>("ui/icon.png", None).await.unwrap();
    assert_eq!(icon.asset().unwrap().width, 4);
    let scene = runtime.load_scene_async("level1", Some("levels")).await.unwrap();
    assert!(scene.is_loaded());

    assert!(runtime.load::<Texture>("ui/other.png", None).is_err());

    std::fs::remove_dir_all(root).ok();
}

#[cfg(feature = "fs")]
#[test]
fn test_directory_loads_finish_outside_runtime() {
    init_logging();
    let root = package_dir();
    let runtime = AssetRuntime::new(RuntimeConfig::packaged("ui_pack"), DirectorySource::new(&root));
    runtime.init_package("ui_pack").unwrap();
    runtime.init_package("levels").unwrap();

    let scene = runtime.begin_scene_load("level1", Some("levels")).unwrap();
    scene.finish().unwrap();
    assert!(scene.is_loaded());

    let missing = runtime.begin_scene_load("level2", Some("levels")).unwrap();
    assert!(matches!(missing.finish(), Err(BundleError::ResourceLoadFailed { .. })));

    let icon = futures::executor::block_on(runtime.load_async::<Texture>("ui/icon.png", None)).unwrap();
    assert_eq!(icon.asset().unwrap().width, 4);

    std::fs::remove_dir_all(root).ok();
}
