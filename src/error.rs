//! Error types for the watermark-inpaint crate.

/// Errors that can occur while removing watermarks.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The input bytes could not be parsed as an image.
    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    /// The output image could not be encoded or written.
    #[error("failed to write output image: {0}")]
    Write(#[source] image::ImageError),

    /// An intermediate buffer of the pipeline was malformed.
    #[error("processing failed: {0}")]
    Processing(String),

    /// An I/O error occurred while reading input files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The output format is not supported.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),
}

impl Error {
    /// Whether the failure was caused by the caller's input rather than the service.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::UnsupportedFormat(_))
    }
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let io_err = Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(io_err.to_string().contains("gone"));

        let unsupported = Error::UnsupportedFormat("tiff".to_string());
        assert!(unsupported.to_string().contains("tiff"));

        let processing = Error::Processing("plane size mismatch".to_string());
        assert_eq!(
            processing.to_string(),
            "processing failed: plane size mismatch"
        );

        let write = Error::Write(image::ImageError::IoError(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only",
        )));
        let msg = write.to_string();
        assert!(msg.starts_with("failed to write output image"));
        assert!(msg.contains("read-only"));
    }

    #[test]
    fn decode_failures_are_client_errors() {
        let err = image::load_from_memory(b"not an image").unwrap_err();
        assert!(Error::Decode(err).is_client_error());
        assert!(Error::UnsupportedFormat("bmp".into()).is_client_error());
        assert!(!Error::Processing("boom".into()).is_client_error());
    }
}
