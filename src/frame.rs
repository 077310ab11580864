//! Processed frame container.
//!
//! The detection service returns the annotated snapshot as base64. Frames are
//! decoded once on receipt so a corrupt payload is caught as a failed attempt
//! instead of surfacing later as a broken overlay.

use base64::Engine;
use image::GenericImageView;

use crate::error::{DetectionError, Result};

/// Upper bound on an encoded frame accepted from the service.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

// ----------------------------------------------------------------------------
// ProcessedFrame
// ----------------------------------------------------------------------------

/// Annotated snapshot returned by a successful detection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessedFrame {
    bytes: Vec<u8>,
    width: u32,
    height: u32,
    mime: &'static str,
}

impl ProcessedFrame {
    /// Decode a base64 image as sent by the service.
    ///
    /// Accepts bare base64 or a `data:image/...;base64,` URL.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let encoded = strip_data_url(encoded.trim());
        if encoded.is_empty() {
            return Err(DetectionError::Transient("empty image payload".to_string()));
        }
        if encoded.len() / 4 * 3 > MAX_FRAME_BYTES {
            return Err(DetectionError::Transient(format!(
                "image payload exceeds {} bytes",
                MAX_FRAME_BYTES
            )));
        }
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| DetectionError::Transient(format!("invalid image encoding: {}", e)))?;
        Self::from_bytes(bytes)
    }

    /// Wrap encoded image bytes (JPEG or PNG), validating that they decode.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let format = image::guess_format(&bytes)
            .map_err(|e| DetectionError::Transient(format!("unrecognised image: {}", e)))?;
        let mime = match format {
            image::ImageFormat::Png => "image/png",
            _ => "image/jpeg",
        };
        let decoded = image::load_from_memory_with_format(&bytes, format)
            .map_err(|e| DetectionError::Transient(format!("decode image: {}", e)))?;
        let (width, height) = decoded.dimensions();
        Ok(Self {
            bytes,
            width,
            height,
            mime,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn mime(&self) -> &'static str {
        self.mime
    }

    /// `data:` URL suitable for an `<img src>`.
    pub fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime,
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

fn strip_data_url(encoded: &str) -> &str {
    if !encoded.starts_with("data:") {
        return encoded;
    }
    match encoded.split_once(";base64,") {
        Some((_, payload)) => payload,
        None => encoded,
    }
}

#[cfg(test)]
pub(crate) fn png_base64(width: u32, height: u32) -> String {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb([40, 80, 120]));
    let mut cursor = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut cursor, image::ImageFormat::Png)
        .expect("encode png");
    base64::engine::general_purpose::STANDARD.encode(cursor.into_inner())
}
