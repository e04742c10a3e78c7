//! Profile image storage under the root folder
//!
//! Locations handed to clients and stored in the database are relative to
//! the root folder and always start with `uploads/` (committed pictures) or
//! `staging/` (pending uploads). Any other location is treated as missing.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::GenericImageView;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;
use verity_common::config::RootLayout;

use super::{VerifyError, VerifyResult};

const UPLOADS: &str = "uploads";
const STAGING: &str = "staging";

/// Committed pictures are fit inside this square
pub const MAX_PROFILE_DIMENSION: u32 = 800;
/// JPEG quality of committed pictures
pub const PROFILE_JPEG_QUALITY: u8 = 80;
/// Pause before the single retry of a transiently failing delete
const DELETE_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Filesystem access for uploaded and staged images
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(layout: &RootLayout) -> Self {
        Self {
            root: layout.root().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a stored location to an absolute path
    pub fn resolve(&self, location: &str) -> VerifyResult<PathBuf> {
        let relative = Path::new(location);
        let mut components = relative.components();

        let area_ok = matches!(
            components.next(),
            Some(Component::Normal(area)) if area == UPLOADS || area == STAGING
        );
        let rest_ok = components.clone().count() > 0
            && components.all(|c| matches!(c, Component::Normal(_)));

        if !area_ok || !rest_ok {
            return Err(VerifyError::NotFound(format!("Location {}", location)));
        }
        Ok(self.root.join(relative))
    }

    /// Store raw upload bytes in the staging area
    pub async fn write_staged(
        &self,
        user_id: Uuid,
        original_name: Option<&str>,
        bytes: &[u8],
    ) -> VerifyResult<String> {
        let extension = staged_extension(original_name, bytes);
        let location = format!(
            "{}/pending_{}_{}.{}",
            STAGING,
            user_id,
            chrono::Utc::now().timestamp_millis(),
            extension
        );
        self.write(&location, bytes).await?;
        Ok(location)
    }

    /// Optimize an image and store it as a committed profile picture
    pub async fn write_profile(&self, user_id: Uuid, bytes: Vec<u8>) -> VerifyResult<String> {
        let optimized = tokio::task::spawn_blocking(move || optimize_profile_image(&bytes))
            .await
            .map_err(|e| VerifyError::Storage(format!("Optimize task failed: {}", e)))??;

        let location = format!(
            "{}/profile_{}_{}.jpg",
            UPLOADS,
            user_id,
            chrono::Utc::now().timestamp_millis()
        );
        self.write(&location, &optimized).await?;
        Ok(location)
    }

    pub async fn read(&self, location: &str) -> VerifyResult<Vec<u8>> {
        let path = self.resolve(location)?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => VerifyError::NotFound(format!("Location {}", location)),
            _ => storage_error("read", &path, e),
        })
    }

    pub async fn exists(&self, location: &str) -> bool {
        match self.resolve(location) {
            Ok(path) => tokio::fs::try_exists(&path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Delete a stored file; a missing file counts as deleted
    pub async fn delete(&self, location: &str) -> VerifyResult<()> {
        let path = self.resolve(location)?;
        remove_with_retry(&path)
            .await
            .map_err(|e| storage_error("delete", &path, e))?;
        debug!(location, "Deleted stored file");
        Ok(())
    }

    async fn write(&self, location: &str, bytes: &[u8]) -> VerifyResult<()> {
        let path = self.resolve(location)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_error("create directory", parent, e))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| storage_error("write", &path, e))
    }
}

fn storage_error(op: &str, path: &Path, err: io::Error) -> VerifyError {
    VerifyError::Storage(format!("{} {} failed: {}", op, path.display(), err))
}

/// Errors worth a second attempt (file briefly held by another process)
fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::PermissionDenied | io::ErrorKind::WouldBlock
    ) || matches!(err.raw_os_error(), Some(16) | Some(32))
}

async fn remove_with_retry(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) if is_transient(&e) => {
            warn!(path = %path.display(), error = %e, "File locked, retrying delete");
            tokio::time::sleep(DELETE_RETRY_DELAY).await;
            match tokio::fs::remove_file(path).await {
                Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            }
        }
        Err(e) => Err(e),
    }
}

/// Extension for a staged file: the upload's own when sane, else sniffed
fn staged_extension(original_name: Option<&str>, bytes: &[u8]) -> String {
    let from_name = original_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()));

    from_name
        .or_else(|| {
            image::guess_format(bytes)
                .ok()
                .and_then(|format| format.extensions_str().first().map(|e| e.to_string()))
        })
        .unwrap_or_else(|| "img".to_string())
}

/// Fit inside 800×800 without enlarging and re-encode as JPEG
pub fn optimize_profile_image(bytes: &[u8]) -> VerifyResult<Vec<u8>> {
    let img = image::load_from_memory(bytes).map_err(|e| VerifyError::ImageDecode(e.to_string()))?;

    let (width, height) = img.dimensions();
    let img = if width > MAX_PROFILE_DIMENSION || height > MAX_PROFILE_DIMENSION {
        img.resize(MAX_PROFILE_DIMENSION, MAX_PROFILE_DIMENSION, FilterType::Lanczos3)
    } else {
        img
    };

    let rgb = img.to_rgb8();
    let mut output = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut output, PROFILE_JPEG_QUALITY);
    rgb.write_with_encoder(encoder)
        .map_err(|e| VerifyError::Storage(format!("JPEG encode failed: {}", e)))?;

    Ok(output)
}
