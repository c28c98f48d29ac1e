//! Turning fetched bytes into an image file on disk.
//!
//! The client treats fetched bytes as opaque. This module decides what
//! they are: a complete 24-bit BMP is kept verbatim, a packed RGB buffer
//! of exactly `width * height * 3` bytes is encoded, anything else is
//! refused. Files are written atomically (temp file, then rename), so a
//! failed run never leaves a partial image behind.

use std::io::Write;
use std::path::Path;

use sdgen_core::raster::{EncodeError, HeaderError, ImageBuffer, RasterHeader};

/// How the written image was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSource {
    /// The service already returned a valid BMP.
    Verbatim,
    /// Raw RGB from the service, encoded locally.
    EncodedRgb,
    /// Synthesized placeholder gradient.
    Placeholder,
}

impl PayloadSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verbatim => "verbatim",
            Self::EncodedRgb => "encoded_rgb",
            Self::Placeholder => "placeholder",
        }
    }
}

/// Errors while interpreting or persisting an image.
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("Failed to encode image: {0}")]
    Encode(#[from] EncodeError),

    #[error("Invalid image header: {0}")]
    Header(#[from] HeaderError),

    /// Neither a BMP nor raw RGB for the requested geometry.
    #[error("Payload of {len} bytes is neither a 24-bit BMP nor raw RGB for {width}x{height}")]
    UnrecognizedPayload { len: usize, width: u32, height: u32 },

    #[error("I/O error writing image: {0}")]
    Io(#[from] std::io::Error),
}

/// Interpret fetched bytes for a job requested at `width x height`.
pub fn resolve_payload(
    bytes: Vec<u8>,
    width: u32,
    height: u32,
) -> Result<(ImageBuffer, PayloadSource), OutputError> {
    if RasterHeader::parse(&bytes).is_ok() {
        let image = ImageBuffer::from_bmp(bytes)?;
        return Ok((image, PayloadSource::Verbatim));
    }

    let rgb_len = u64::from(width) * u64::from(height) * 3;
    if bytes.len() as u64 == rgb_len {
        let image = ImageBuffer::from_rgb(width, height, &bytes)?;
        return Ok((image, PayloadSource::EncodedRgb));
    }

    Err(OutputError::UnrecognizedPayload {
        len: bytes.len(),
        width,
        height,
    })
}

/// Build the placeholder image for `width x height`.
pub fn placeholder(width: u32, height: u32) -> Result<(ImageBuffer, PayloadSource), OutputError> {
    let image = ImageBuffer::encode(width, height, None)?;
    Ok((image, PayloadSource::Placeholder))
}

/// Write `image` to `path` atomically and return the number of bytes
/// written. The buffer is consumed.
pub fn write_image(path: &Path, image: ImageBuffer) -> Result<u64, OutputError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let bytes = image.into_bytes();
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    Ok(bytes.len() as u64)
}
