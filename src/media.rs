//! Uploaded image storage under the media root.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Sub-directory of the media root holding detection images
pub const DETECTION_IMAGE_DIR: &str = "plant_disease_images";

/// URL prefix the media root is served under
pub const MEDIA_URL: &str = "/media";

/// File name for a stored detection image, keyed by record id
pub fn stored_image_name(record_id: i64, original_name: Option<&str>) -> String {
    let cleaned = original_name
        .and_then(|name| Path::new(name).file_name())
        .and_then(|name| name.to_str())
        .map(sanitize)
        .filter(|name| !name.is_empty() && name.chars().any(|c| c != '.'));

    match cleaned {
        Some(name) => format!("{}_{}", record_id, name),
        None => format!("{}_{}.img", record_id, uuid::Uuid::new_v4().simple()),
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// An image file attached to a detection record
#[derive(Debug, Clone, PartialEq)]
pub struct StoredImage {
    /// Path relative to the media root, `/`-separated
    pub relative: String,
    pub path: PathBuf,
}

/// Copy an upload into the detection image directory under a staging name.
/// The copy happens before any record exists, so no database lock is held.
pub fn stage_detection_image(media_root: &Path, source: &Path) -> io::Result<PathBuf> {
    let dir = media_root.join(DETECTION_IMAGE_DIR);
    fs::create_dir_all(&dir)?;

    let staged = dir.join(format!(".staging-{}", uuid::Uuid::new_v4().simple()));
    fs::copy(source, &staged)?;
    Ok(staged)
}

/// Rename a staged image to its record-keyed name
pub fn promote_staged_image(
    media_root: &Path,
    staged: &Path,
    record_id: i64,
    original_name: Option<&str>,
) -> io::Result<StoredImage> {
    let file_name = stored_image_name(record_id, original_name);
    let path = media_root.join(DETECTION_IMAGE_DIR).join(&file_name);
    fs::rename(staged, &path)?;

    tracing::debug!("Stored detection image {}/{}", DETECTION_IMAGE_DIR, file_name);
    Ok(StoredImage {
        relative: format!("{}/{}", DETECTION_IMAGE_DIR, file_name),
        path,
    })
}

/// Remove an image that no record points at. Already missing is fine.
pub fn discard_image(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => tracing::debug!("Removed unreferenced image {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Could not remove image {}: {}", path.display(), e),
    }
}

/// Public URL of a stored image; `None` when the record has no image
pub fn image_url(relative: &str) -> Option<String> {
    if relative.is_empty() {
        None
    } else {
        Some(format!("{}/{}", MEDIA_URL, relative))
    }
}
