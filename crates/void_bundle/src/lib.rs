//! # void_bundle - Package Bundle Runtime
//!
//! Loads assets and scenes out of named packages with:
//! - One handle per resource path, shared by every request
//! - Sync and async loads that never issue the same load twice
//! - FIFO release of async waiters
//! - Develop mode reading unpacked assets without packages
//!
//! ## Example
//!
//! ```no_run
//! use void_bundle::prelude::*;
//!
//! # fn main() -> BundleResult<()> {
//! let source = MemorySource::new().with_resource("main", "ui/title.txt", "Void");
//! let runtime = AssetRuntime::new(RuntimeConfig::default(), source);
//! runtime.init_package("main")?;
//!
//! // Blocking load from the default package
//! let title = runtime.load::<Text>("ui/title.txt", None)?;
//! assert!(title.is_loaded());
//!
//! // Async loads of the same path share this handle
//! let again = futures::executor::block_on(runtime.load_async::<Text>("ui/title.txt", None))?;
//! assert!(title.ptr_eq(&again));
//! # Ok(())
//! # }
//! ```

pub mod asset;
pub mod config;
pub mod error;
pub mod handle;
pub mod registry;
pub mod runtime;
pub mod source;

pub use asset::{Asset, Bytes, Json, LoadContext, Text};
pub use config::{LoadMode, RuntimeConfig};
pub use error::{BundleError, BundleResult};
pub use handle::{HandleId, LoadHandle, LoadState, SceneHandle, UntypedHandle};
pub use registry::{HandleRegistry, PackageRegistry, PackageRuntimeInfo};
pub use runtime::AssetRuntime;
pub use source::{EditorSource, MemorySource, PackageHandle, PackageSource};

#[cfg(feature = "fs")]
pub use source::DirectorySource;

/// Prelude - commonly used types
pub mod prelude {
    pub use crate::asset::{Asset, Bytes, Json, LoadContext, Text};
    pub use crate::config::{LoadMode, RuntimeConfig};
    pub use crate::error::{BundleError, BundleResult};
    pub use crate::handle::{HandleId, LoadHandle, LoadState, SceneHandle, UntypedHandle};
    pub use crate::runtime::AssetRuntime;
    pub use crate::source::{EditorSource, MemorySource, PackageHandle, PackageSource};

    #[cfg(feature = "fs")]
    pub use crate::source::DirectorySource;
}
