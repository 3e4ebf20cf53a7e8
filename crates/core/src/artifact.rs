//! Generated image artifacts and header-level decoding.
//!
//! The whole image is decoded once on arrival, so truncated or corrupt
//! bodies are rejected here rather than by whoever renders the artifact.
//! Only the encoded bytes are kept.

use std::io::Cursor;
use std::sync::Arc;

use serde::Serialize;

/// An encoded image produced (or previewed) by the generation server.
///
/// Cloning is cheap; the encoded bytes are shared.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    /// Encoded image bytes, exactly as received.
    #[serde(skip)]
    pub data: Arc<Vec<u8>>,
    /// MIME type sniffed from the container header, e.g. `image/png`.
    pub mime: String,
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Debug for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artifact")
            .field("data", &format_args!("[{} bytes]", self.data.len()))
            .field("mime", &self.mime)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// Why a response body could not be turned into an [`Artifact`].
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Response body is empty")]
    Empty,

    #[error("Response body is not a recognised image format")]
    UnknownFormat,

    #[error("Failed to read image header: {0}")]
    Decode(String),
}

/// Sniff the image format of `data`, decode it, and record its dimensions.
///
/// Supports PNG, JPEG, and WebP. A body whose header is valid but whose
/// pixel data is truncated or corrupt is a [`ArtifactError::Decode`].
pub fn decode_artifact(data: Vec<u8>) -> Result<Artifact, ArtifactError> {
    if data.is_empty() {
        return Err(ArtifactError::Empty);
    }

    let (format, (width, height)) = {
        let reader = image::ImageReader::new(Cursor::new(data.as_slice()))
            .with_guessed_format()
            .map_err(|e| ArtifactError::Decode(e.to_string()))?;
        let format = reader.format().ok_or(ArtifactError::UnknownFormat)?;
        let image = reader
            .decode()
            .map_err(|e| ArtifactError::Decode(e.to_string()))?;
        (format, (image.width(), image.height()))
    };

    Ok(Artifact {
        data: Arc::new(data),
        mime: format.to_mime_type().to_string(),
        width,
        height,
    })
}
