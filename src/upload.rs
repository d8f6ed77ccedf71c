//! Uploaded images.
//!
//! An upload is a file name plus its encoded bytes. Decoding is deferred to the
//! detection run so one bad file fails only its own image.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::DynamicImage;

/// Extensions accepted at upload time, compared case-insensitively.
pub const ACCEPTED_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

#[derive(Clone, PartialEq, Eq)]
pub struct UploadedImage {
    pub name: String,
    bytes: Vec<u8>,
}

impl std::fmt::Debug for UploadedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadedImage")
            .field("name", &self.name)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

impl UploadedImage {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// Read an image file, naming the upload after the file name.
    pub fn from_path(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow!("{} has no usable file name", path.display()))?
            .to_string();
        let bytes =
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        Ok(Self::new(name, bytes))
    }

    pub fn has_accepted_extension(&self) -> bool {
        Path::new(&self.name)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                ACCEPTED_EXTENSIONS
                    .iter()
                    .any(|accepted| ext.eq_ignore_ascii_case(accepted))
            })
    }

    pub fn decode(&self) -> Result<DynamicImage, image::ImageError> {
        image::load_from_memory(&self.bytes)
    }
}
