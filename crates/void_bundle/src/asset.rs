//! Asset decoding - turns package bytes into typed payloads
//!
//! Package sources only hand out raw bytes. Each asset type knows how to
//! decode itself from a [`LoadContext`].

use crate::error::{BundleError, BundleResult};
use serde::de::DeserializeOwned;

/// Context provided to [`Asset::decode`]
pub struct LoadContext<'a> {
    /// Package the bytes were read from
    pub package: &'a str,
    /// Resource path inside the package
    pub path: &'a str,
    /// Raw resource bytes
    pub data: &'a [u8],
}

impl<'a> LoadContext<'a> {
    /// Create a new load context
    pub fn new(package: &'a str, path: &'a str, data: &'a [u8]) -> Self {
        Self {
            package,
            path,
            data,
        }
    }

    /// Get file extension
    pub fn extension(&self) -> Option<&str> {
        let file = self.path.rsplit('/').next()?;
        file.rsplit_once('.').map(|(_, ext)| ext)
    }

    /// Read data as string (UTF-8)
    pub fn read_string(&self) -> BundleResult<&str> {
        core::str::from_utf8(self.data)
            .map_err(|e| self.decode_error(format!("invalid UTF-8: {}", e)))
    }

    /// Build a decode error for this resource
    pub fn decode_error(&self, reason: impl Into<String>) -> BundleError {
        BundleError::Decode {
            path: self.path.to_string(),
            reason: reason.into(),
        }
    }
}

/// A type that can be loaded out of a package
pub trait Asset: Send + Sync + Sized + 'static {
    /// Decode the asset from raw package bytes
    fn decode(ctx: &LoadContext<'_>) -> BundleResult<Self>;

    /// Human readable type name, used in diagnostics
    fn type_name() -> &'static str {
        core::any::type_name::<Self>()
    }
}

/// Raw bytes asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bytes(pub Vec<u8>);

impl Asset for Bytes {
    fn decode(ctx: &LoadContext<'_>) -> BundleResult<Self> {
        Ok(Bytes(ctx.data.to_vec()))
    }
}

/// UTF-8 text asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Text(pub String);

impl Asset for Text {
    fn decode(ctx: &LoadContext<'_>) -> BundleResult<Self> {
        Ok(Text(ctx.read_string()?.to_string()))
    }
}

/// JSON document deserialized into `T`
#[derive(Debug, Clone, PartialEq)]
pub struct Json<T>(pub T);

impl<T> Asset for Json<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    fn decode(ctx: &LoadContext<'_>) -> BundleResult<Self> {
        serde_json::from_slice(ctx.data)
            .map(Json)
            .map_err(|e| ctx.decode_error(e.to_string()))
    }
}
