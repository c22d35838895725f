//! Assets before and after upload

use crate::id::RemoteId;
use serde::{Deserialize, Serialize};

/// Declared media type (`image/png`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaType(String);

impl MediaType {
    /// JPEG image
    pub const JPEG: &'static str = "image/jpeg";
    /// PNG image
    pub const PNG: &'static str = "image/png";
    /// WebP image
    pub const WEBP: &'static str = "image/webp";
    /// GIF image
    pub const GIF: &'static str = "image/gif";

    /// Create media type; normalized to lowercase
    #[must_use]
    pub fn new(media_type: impl AsRef<str>) -> Self {
        Self(media_type.as_ref().trim().to_ascii_lowercase())
    }

    /// Borrow as string
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One file selected for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// Display name (file name as selected)
    pub name: String,
    /// Declared media type
    pub media_type: MediaType,
    /// Declared size in bytes
    pub declared_size: u64,
    /// Raw content
    pub bytes: Vec<u8>,
}

impl Asset {
    /// Create asset; declared size taken from `bytes`
    #[must_use]
    pub fn new(name: impl Into<String>, media_type: impl AsRef<str>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            media_type: MediaType::new(media_type),
            declared_size: bytes.len() as u64,
            bytes,
        }
    }

    /// Override the declared size
    #[inline]
    #[must_use]
    pub fn with_declared_size(mut self, size: u64) -> Self {
        self.declared_size = size;
        self
    }

    /// Actual content length
    #[inline]
    #[must_use]
    pub fn actual_size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// An asset the remote store has accepted
///
/// Deliberately not `Clone`: a batch hands each one either to the caller
/// on commit or to rollback on failure, never both.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedAsset {
    /// Store-assigned id, used for deletion
    pub remote_id: RemoteId,
    /// Public URL
    pub url: String,
}

impl UploadedAsset {
    /// Create uploaded asset
    #[inline]
    #[must_use]
    pub fn new(remote_id: impl Into<RemoteId>, url: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            url: url.into(),
        }
    }
}
