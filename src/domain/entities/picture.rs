//! Domain types for profile pictures.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Which crop of the profile picture to fetch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum PictureCropping {
    /// Square thumbnail.
    #[default]
    Square,
    /// Picture in its original aspect ratio.
    Normal,
}

impl PictureCropping {
    /// Value of the `type` query parameter understood by the graph endpoint.
    #[must_use]
    pub const fn as_query_value(self) -> &'static str {
        match self {
            Self::Square => "square",
            Self::Normal => "normal",
        }
    }

    /// Returns the other cropping mode.
    #[must_use]
    pub const fn toggled(self) -> Self {
        match self {
            Self::Square => Self::Normal,
            Self::Normal => Self::Square,
        }
    }
}

impl std::fmt::Display for PictureCropping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_query_value())
    }
}

/// Identifies one requested picture variant.
///
/// Two requests with equal keys always resolve to the same cached picture.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    profile_id: String,
    cropping: PictureCropping,
}

impl CacheKey {
    /// Builds a key, returning `None` for an empty or whitespace-only id.
    #[must_use]
    pub fn new(profile_id: impl Into<String>, cropping: PictureCropping) -> Option<Self> {
        let profile_id = profile_id.into();
        if profile_id.trim().is_empty() {
            return None;
        }
        Some(Self {
            profile_id,
            cropping,
        })
    }

    /// Profile identifier, trimmed.
    #[must_use]
    pub fn profile_id(&self) -> &str {
        &self.profile_id
    }

    /// Requested cropping.
    #[must_use]
    pub const fn cropping(&self) -> PictureCropping {
        self.cropping
    }

    /// Stable file stem used by the disk cache.
    #[must_use]
    pub fn file_stem(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.profile_id.as_bytes());
        hasher.update(b":");
        hasher.update(self.cropping.as_query_value().as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16])
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.profile_id, self.cropping)
    }
}

/// Where a picture was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PictureSource {
    /// Served from the in-memory tables.
    Memory,
    /// Read back from the disk cache.
    Disk,
    /// Downloaded through the fetcher.
    Network,
}

impl std::fmt::Display for PictureSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Disk => write!(f, "disk"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// A decoded profile picture shared between every view displaying it.
#[derive(Debug, Clone)]
pub struct ProfilePicture {
    /// Key the picture was requested under.
    pub key: CacheKey,
    /// Decoded pixels.
    pub image: Arc<image::DynamicImage>,
    /// Tier that served this copy.
    pub source: PictureSource,
}

impl ProfilePicture {
    /// Creates a picture.
    #[must_use]
    pub fn new(key: CacheKey, image: Arc<image::DynamicImage>, source: PictureSource) -> Self {
        Self { key, image, source }
    }

    /// Same image, re-labelled with the tier it was served from.
    #[must_use]
    pub fn served_from(&self, source: PictureSource) -> Self {
        Self {
            key: self.key.clone(),
            image: Arc::clone(&self.image),
            source,
        }
    }

    /// True when both pictures share the same decoded image allocation.
    #[must_use]
    pub fn same_image(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.image, &other.image)
    }
}

/// Per-view loading state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ViewStatus {
    /// No profile id is set.
    #[default]
    Empty,
    /// A request has been issued and has not completed.
    Pending,
    /// The picture for the current key is displayed.
    Resolved,
    /// The request failed with the given message.
    Failed(String),
}

impl ViewStatus {
    /// Returns true while a request is outstanding.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Returns true if the picture is displayed.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved)
    }

    /// Returns true if the last request failed.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// True once the current request has reached a final state.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        !self.is_pending()
    }
}
