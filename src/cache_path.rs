//! Deterministic naming for mirror directories and asset files.
//!
//! A mirror lives in `<cache_root>/<cache_key>/`; assets go into one
//! subdirectory per [`AssetClass`]. Filenames come from the last path segment
//! of the asset URL, restricted to `[A-Za-z0-9._-]`.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

/// Hex-encoded 128-bit digest of a URL, used as a mirror directory name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<Path> for CacheKey {
    fn as_ref(&self) -> &Path {
        Path::new(&self.0)
    }
}

/// The kind of asset a reference points at; decides its subdirectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    Stylesheet,
    Script,
    Image,
}

impl AssetClass {
    pub fn subdir(self) -> &'static str {
        match self {
            AssetClass::Stylesheet => "css",
            AssetClass::Script => "js",
            AssetClass::Image => "images",
        }
    }
}

pub const INDEX_FILE: &str = "index.html";

const KEY_BYTES: usize = 16;

/// Stable digest of `url`: the first 128 bits of its SHA-256, hex encoded.
pub fn key_for(url: &Url) -> CacheKey {
    let digest = Sha256::digest(url.as_str().as_bytes());
    let hex = digest[..KEY_BYTES]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>();
    CacheKey(hex)
}

pub fn mirror_dir(cache_root: &Path, key: &CacheKey) -> PathBuf {
    cache_root.join(key)
}

/// Sanitized filename for an asset, falling back to `file_<hash>` when the URL
/// path has no usable last segment.
pub fn file_name_for(asset_url: &Url) -> String {
    let segment = asset_url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or("");

    let sanitized = sanitize_file_name(segment);
    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        format!("file_{}", key_for(asset_url))
    } else {
        sanitized
    }
}

/// Replaces every character outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            c if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' => c,
            _ => '_',
        })
        .collect()
}

/// Path of an asset relative to the mirror directory, with `/` separators,
/// suitable for writing back into the document.
pub fn relative_path_for(asset_class: AssetClass, asset_url: &Url) -> String {
    format!("{}/{}", asset_class.subdir(), file_name_for(asset_url))
}

pub fn local_path_for(
    cache_root: &Path,
    key: &CacheKey,
    asset_class: AssetClass,
    asset_url: &Url,
) -> PathBuf {
    mirror_dir(cache_root, key)
        .join(asset_class.subdir())
        .join(file_name_for(asset_url))
}
