//! Uploaded-image storage.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::{Result, ServerError};

const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp"];

/// Stores uploaded images under `<root>/<folder>/` with generated names and
/// returns the relative path persisted alongside records.
#[derive(Clone)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    /// Create a new [`ImageStore`] rooted at `directory`.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            root: directory.into(),
        }
    }

    /// Persist an uploaded image into `folder`.
    pub async fn save(
        &self,
        file_name: &str,
        bytes: &[u8],
        folder: &str,
    ) -> Result<String> {
        if bytes.is_empty() {
            return Err(ServerError::business(
                "Please upload a valid image file",
            ));
        }

        let extension = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();
        if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(ServerError::business(
                "Invalid image format. Allowed formats: jpg, jpeg, png, gif, bmp",
            ));
        }

        let directory = self.root.join(folder);
        tokio::fs::create_dir_all(&directory).await?;

        let name = format!("{}.{extension}", Uuid::new_v4());
        tokio::fs::write(directory.join(&name), bytes).await?;

        Ok(format!("/uploads/{folder}/{name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ImageStore {
        ImageStore::new(std::env::temp_dir().join("greeneye-image-tests"))
    }

    #[tokio::test]
    async fn test_save_returns_relative_path() {
        let path = store()
            .save("leaf.PNG", b"not-really-a-png", "crop-diseases")
            .await
            .unwrap();

        assert!(path.starts_with("/uploads/crop-diseases/"));
        assert!(path.ends_with(".png"));
    }

    #[tokio::test]
    async fn test_save_rejects_unknown_extension() {
        let err = store()
            .save("payload.exe", b"bytes", "crop-diseases")
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Invalid image format"));
    }

    #[tokio::test]
    async fn test_save_rejects_empty_file() {
        let err = store()
            .save("leaf.png", b"", "crop-diseases")
            .await
            .unwrap_err();

        assert!(err.to_string().contains("valid image file"));
    }
}
