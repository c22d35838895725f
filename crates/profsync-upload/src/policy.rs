//! Local asset validation
//!
//! Every check here runs before the first upload, so a rejected batch has
//! no remote side effects.

use profsync_types::{Asset, MediaType, ValidationError};
use serde::{Deserialize, Serialize};

/// Limits applied to a batch before upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetPolicy {
    /// Largest accepted asset, in bytes
    pub max_asset_bytes: u64,
    /// Most assets in one batch
    pub max_batch_len: usize,
    /// Accepted media types (lowercase)
    pub allowed_media_types: Vec<String>,
}

impl AssetPolicy {
    /// With size limit
    #[inline]
    #[must_use]
    pub fn with_max_asset_bytes(mut self, max: u64) -> Self {
        self.max_asset_bytes = max;
        self
    }

    /// With batch length limit
    #[inline]
    #[must_use]
    pub fn with_max_batch_len(mut self, max: usize) -> Self {
        self.max_batch_len = max;
        self
    }

    /// With media type allow-list
    #[must_use]
    pub fn with_media_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_media_types = types
            .into_iter()
            .map(|t| MediaType::new(t).as_str().to_string())
            .collect();
        self
    }

    /// Check a whole batch; first failure wins
    ///
    /// # Errors
    /// [`ValidationError`] describing the first problem found
    pub fn check_batch(&self, assets: &[Asset]) -> Result<(), ValidationError> {
        if assets.is_empty() {
            return Err(ValidationError::EmptyBatch);
        }
        if assets.len() > self.max_batch_len {
            return Err(ValidationError::BatchTooLarge {
                len: assets.len(),
                max: self.max_batch_len,
            });
        }
        assets
            .iter()
            .enumerate()
            .try_for_each(|(index, asset)| self.check_asset(index, asset))
    }

    /// Check one asset
    ///
    /// # Errors
    /// [`ValidationError`] describing the problem
    pub fn check_asset(&self, index: usize, asset: &Asset) -> Result<(), ValidationError> {
        let name = || asset.name.clone();
        let actual = asset.actual_size();

        if actual == 0 {
            return Err(ValidationError::EmptyAsset {
                index,
                name: name(),
            });
        }
        if asset.declared_size != actual {
            return Err(ValidationError::SizeMismatch {
                index,
                name: name(),
                declared: asset.declared_size,
                actual,
            });
        }
        if actual > self.max_asset_bytes {
            return Err(ValidationError::TooLarge {
                index,
                name: name(),
                size: actual,
                max: self.max_asset_bytes,
            });
        }
        if !self
            .allowed_media_types
            .iter()
            .any(|t| MediaType::new(t) == asset.media_type)
        {
            return Err(ValidationError::UnsupportedMediaType {
                index,
                name: name(),
                media_type: asset.media_type.to_string(),
            });
        }
        Ok(())
    }
}

impl Default for AssetPolicy {
    fn default() -> Self {
        Self {
            max_asset_bytes: 10 * 1024 * 1024,
            max_batch_len: 10,
            allowed_media_types: [MediaType::JPEG, MediaType::PNG, MediaType::WEBP, MediaType::GIF]
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}
