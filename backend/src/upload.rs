use actix_multipart::Multipart;
use futures::{StreamExt, TryStreamExt};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];
const FILE_FIELD: &str = "file";

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("No file provided")]
    NoFile,
    #[error("No file selected")]
    EmptyFilename,
    #[error("Invalid file type. Only PNG, JPG, JPEG allowed")]
    InvalidType,
    #[error("File too large. Maximum size is {0} bytes")]
    TooLarge(usize),
    #[error("Malformed upload: {0}")]
    Multipart(String),
    #[error("Failed to store upload: {0}")]
    Io(#[from] std::io::Error),
}

/// Lower-cased extension of `filename` if it is one we accept.
pub fn allowed_extension(filename: &str) -> Option<String> {
    let (_, extension) = filename.rsplit_once('.')?;
    let extension = extension.to_ascii_lowercase();
    ALLOWED_EXTENSIONS
        .contains(&extension.as_str())
        .then_some(extension)
}

/// An uploaded image on disk. The file is removed when this is dropped, so it
/// is gone whether or not the prediction succeeded.
#[derive(Debug)]
pub struct TempUpload {
    path: PathBuf,
    original_name: String,
}

impl TempUpload {
    pub fn write(
        upload_dir: &Path,
        original_name: &str,
        extension: &str,
        data: &[u8],
    ) -> Result<Self, UploadError> {
        std::fs::create_dir_all(upload_dir)?;
        let path = upload_dir.join(format!("{}.{}", Uuid::new_v4(), extension));
        let upload = Self {
            path,
            original_name: original_name.to_string(),
        };
        let mut file = std::fs::File::create(&upload.path)?;
        file.write_all(data)?;
        Ok(upload)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Removed upload {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove upload {}: {}", self.path.display(), e),
        }
    }
}

/// Pulls the `file` field out of a multipart body, validates its name and size
/// and stores it under `upload_dir`.
pub async fn receive_image(
    mut payload: Multipart,
    upload_dir: &Path,
    max_bytes: usize,
) -> Result<TempUpload, UploadError> {
    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| UploadError::Multipart(e.to_string()))?
    {
        if field.name() != Some(FILE_FIELD) {
            while let Some(chunk) = field.next().await {
                chunk.map_err(|e| UploadError::Multipart(e.to_string()))?;
            }
            continue;
        }

        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .unwrap_or_default()
            .to_string();
        if filename.is_empty() {
            return Err(UploadError::EmptyFilename);
        }
        let extension = allowed_extension(&filename).ok_or(UploadError::InvalidType)?;

        let mut image_data = Vec::new();
        while let Some(chunk) = field.next().await {
            let data = chunk.map_err(|e| UploadError::Multipart(e.to_string()))?;
            if image_data.len() + data.len() > max_bytes {
                return Err(UploadError::TooLarge(max_bytes));
            }
            image_data.extend_from_slice(&data);
        }

        log::info!("Received upload '{}' ({} bytes)", filename, image_data.len());
        return TempUpload::write(upload_dir, &filename, &extension, &image_data);
    }

    Err(UploadError::NoFile)
}
