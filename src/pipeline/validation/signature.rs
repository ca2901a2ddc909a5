use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ValidationError, ValidationReport, ValidationStage};

/// Fewest bytes needed to tell every accepted format apart.
pub const MIN_SIGNATURE_BYTES: usize = 12;

/// Image container formats accepted for classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    WebP,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::WebP => "webp",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::WebP => "image/webp",
        }
    }
}

/// Identify the container format from magic bytes alone. No decoding.
///
/// WebP lives in a RIFF container: `"RIFF"` at 0..4, a length at 4..8 and
/// `"WEBP"` at 8..12. AVI and WAV share the `"RIFF"` prefix, so both
/// markers must match.
pub fn identify(bytes: &[u8]) -> Option<ImageFormat> {
    if bytes.len() < MIN_SIGNATURE_BYTES {
        return None;
    }

    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => Some(ImageFormat::Jpeg),
        [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => Some(ImageFormat::Png),
        [b'G', b'I', b'F', b'8', b'7' | b'9', b'a', ..] => Some(ImageFormat::Gif),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(ImageFormat::WebP),
        _ => None,
    }
}

/// Magic-byte check. Records the detected format in the report.
pub struct SignatureValidator;

impl ValidationStage for SignatureValidator {
    fn name(&self) -> &'static str {
        "signature"
    }

    fn validate(&self, bytes: &[u8], report: &mut ValidationReport) -> Result<(), ValidationError> {
        if bytes.len() < MIN_SIGNATURE_BYTES {
            return Err(ValidationError::InvalidFormat(format!(
                "file too small to identify ({} bytes, need at least {MIN_SIGNATURE_BYTES})",
                bytes.len()
            )));
        }

        match identify(bytes) {
            Some(format) => {
                debug!(format = format.as_str(), "Image signature recognized");
                report.format = Some(format);
                Ok(())
            }
            None => Err(ValidationError::InvalidFormat(format!(
                "unrecognized signature {:02X?}; accepted: JPEG, PNG, GIF, WebP",
                &bytes[..8]
            ))),
        }
    }
}
