use std::path::{Path, PathBuf};
use std::str::FromStr;

use md5::{Digest, Md5};
use strum::EnumString;

/// Image formats accepted for upload. Anything else is rejected before the
/// content is hashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ImageExtension {
    Png,
    Jpg,
    Jpeg,
    Gif,
}

/// Content-addressed store for uploaded images on a shared filesystem.
///
/// Keys are `md5(bytes)` in lowercase hex plus the original extension, so
/// identical uploads land on the same file and the write is skip-if-exists.
/// Files are never mutated or deleted by this store.
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Open the store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, BlobError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Compute the content-addressed key for `bytes` with the extension taken
    /// from `original_filename`. Validates the extension before hashing.
    pub fn key_for(bytes: &[u8], original_filename: &str) -> Result<String, BlobError> {
        let ext = allowed_extension(original_filename)?;
        let digest = Md5::digest(bytes);
        Ok(format!("{digest:x}.{ext}"))
    }

    /// Store `bytes` under its content hash, skipping the write when the key
    /// already exists. Concurrent identical uploads may both write; the bytes
    /// are value-equal so the race is harmless.
    pub async fn put(&self, bytes: &[u8], original_filename: &str) -> Result<String, BlobError> {
        let key = Self::key_for(bytes, original_filename)?;
        let path = self.root.join(&key);
        if !tokio::fs::try_exists(&path).await? {
            tokio::fs::write(&path, bytes).await?;
        }
        Ok(key)
    }

    pub async fn exists(&self, key: &str) -> Result<bool, BlobError> {
        Ok(tokio::fs::try_exists(self.root.join(key)).await?)
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        Ok(tokio::fs::read(self.root.join(key)).await?)
    }
}

/// Extract and validate the extension of `filename` against the allow-list.
/// Returns the lowercased extension without the leading dot.
fn allowed_extension(filename: &str) -> Result<String, BlobError> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .ok_or(BlobError::MissingExtension)?;
    ImageExtension::from_str(ext)
        .map_err(|_| BlobError::UnsupportedExtension(ext.to_string()))?;
    Ok(ext.to_ascii_lowercase())
}

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("filename has no extension")]
    MissingExtension,

    #[error("unsupported image extension: .{0}")]
    UnsupportedExtension(String),

    #[error("blob I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BlobError {
    /// True when the error is the caller's fault rather than the store's.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            BlobError::MissingExtension | BlobError::UnsupportedExtension(_)
        )
    }
}
