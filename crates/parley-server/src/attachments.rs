use std::path::{Component, Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ServerError;

const MAX_EXTENSION_LEN: usize = 8;

/// Verify that a resolved path stays within the expected base directory.
fn ensure_within(base: &Path, name: &str) -> Result<PathBuf, ServerError> {
    let mut resolved = base.to_path_buf();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(c) => resolved.push(c),
            _ => {
                return Err(ServerError::InvalidOperation(
                    "Invalid attachment reference".to_string(),
                ));
            }
        }
    }
    if !resolved.starts_with(base) || resolved.parent() != Some(base) {
        return Err(ServerError::InvalidOperation(
            "Invalid attachment reference".to_string(),
        ));
    }
    Ok(resolved)
}

/// Lower-cased alphanumeric extension of an uploaded file name, if any.
fn extension_of(file_name: Option<&str>) -> Option<String> {
    let ext = Path::new(file_name?).extension()?.to_str()?;
    if ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Parse a stored reference of the form `<uuid>` or `<uuid>.<ext>`.
fn validate_reference(reference: &str) -> Result<(), ServerError> {
    let (stem, ext) = match reference.split_once('.') {
        Some((stem, ext)) => (stem, Some(ext)),
        None => (reference, None),
    };
    let stem_ok = Uuid::parse_str(stem).is_ok();
    let ext_ok = ext.map_or(true, |e| {
        !e.is_empty() && e.len() <= MAX_EXTENSION_LEN && e.chars().all(|c| c.is_ascii_alphanumeric())
    });
    if stem_ok && ext_ok {
        Ok(())
    } else {
        Err(ServerError::InvalidOperation(
            "Invalid attachment reference".to_string(),
        ))
    }
}

/// Flat directory of uploaded message attachments.
///
/// Files are named by a fresh UUID plus the uploaded extension; the name is
/// the reference stored on the message.
#[derive(Debug, Clone)]
pub struct AttachmentStore {
    base_path: PathBuf,
    max_size: usize,
}

impl AttachmentStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::Internal(format!(
                "Failed to create attachment directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Attachment store initialized");

        Ok(Self {
            base_path,
            max_size,
        })
    }

    /// Persist an upload and return its reference.
    pub async fn store(&self, data: &[u8], file_name: Option<&str>) -> Result<String, ServerError> {
        if data.is_empty() {
            return Err(ServerError::InvalidOperation("Empty attachment".to_string()));
        }
        if data.len() > self.max_size {
            return Err(ServerError::AttachmentTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let id = Uuid::new_v4();
        let reference = match extension_of(file_name) {
            Some(ext) => format!("{id}.{ext}"),
            None => id.to_string(),
        };
        let path = ensure_within(&self.base_path, &reference)?;

        fs::write(&path, data).await.map_err(|e| {
            ServerError::Internal(format!("Failed to write attachment {reference}: {e}"))
        })?;

        debug!(reference = %reference, size = data.len(), "Stored attachment");
        Ok(reference)
    }

    pub async fn get(&self, reference: &str) -> Result<Vec<u8>, ServerError> {
        let path = self.path_for(reference)?;

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ServerError::NotFound("Attachment not found!".to_string()));
        }

        let data = fs::read(&path).await.map_err(|e| {
            ServerError::Internal(format!("Failed to read attachment {reference}: {e}"))
        })?;

        debug!(reference = %reference, size = data.len(), "Retrieved attachment");
        Ok(data)
    }

    /// Remove a stored attachment. Missing files are not an error.
    pub async fn delete(&self, reference: &str) -> Result<bool, ServerError> {
        let path = self.path_for(reference)?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(reference = %reference, "Deleted attachment");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ServerError::Internal(format!(
                "Failed to delete attachment {reference}: {e}"
            ))),
        }
    }

    fn path_for(&self, reference: &str) -> Result<PathBuf, ServerError> {
        validate_reference(reference)?;
        ensure_within(&self.base_path, reference)
    }
}

/// Best-effort content type from a stored reference's extension.
pub fn content_type_for(reference: &str) -> &'static str {
    match reference.rsplit_once('.').map(|(_, ext)| ext) {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}
