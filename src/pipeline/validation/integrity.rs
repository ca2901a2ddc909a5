use std::io::Cursor;

use image::ImageReader;
use image::ColorType;
use tracing::debug;

use super::{ValidationError, ValidationReport, ValidationStage};

/// Decode the whole buffer to prove it is not truncated or corrupt.
///
/// Two passes: a structural parse of the header, then a full pixel decode.
/// Truncated files usually survive the first and fail the second. Decoder
/// errors come back as `ValidationError::Corrupt` with the decoder's message.
pub fn check_integrity(bytes: &[u8]) -> Result<ColorType, ValidationError> {
    // 1. Structural parse
    let (width, height) = reader_for(bytes)?
        .into_dimensions()
        .map_err(|e| ValidationError::Corrupt(format!("header parse failed: {e}")))?;

    // 2. Full decode
    let image = reader_for(bytes)?
        .decode()
        .map_err(|e| ValidationError::Corrupt(format!("pixel decode failed: {e}")))?;

    // 3. Color mode
    let color = image.color();
    if !is_supported_color(color) {
        return Err(ValidationError::Corrupt(format!(
            "unsupported color mode {color:?}"
        )));
    }

    debug!(width, height, color = ?color, "Image decoded cleanly");
    Ok(color)
}

/// Color modes the preprocessor knows how to convert to RGB.
pub fn is_supported_color(color: ColorType) -> bool {
    matches!(
        color,
        ColorType::L8
            | ColorType::La8
            | ColorType::Rgb8
            | ColorType::Rgba8
            | ColorType::L16
            | ColorType::La16
            | ColorType::Rgb16
            | ColorType::Rgba16
            | ColorType::Rgb32F
            | ColorType::Rgba32F
    )
}

fn reader_for(bytes: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, ValidationError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ValidationError::Corrupt(format!("could not read image: {e}")))?;

    if reader.format().is_none() {
        return Err(ValidationError::Corrupt(
            "decoder does not recognize the container".into(),
        ));
    }
    Ok(reader)
}

/// Full-decode integrity check. Records the decoded color mode.
pub struct IntegrityValidator;

impl ValidationStage for IntegrityValidator {
    fn name(&self) -> &'static str {
        "integrity"
    }

    fn validate(&self, bytes: &[u8], report: &mut ValidationReport) -> Result<(), ValidationError> {
        report.color = Some(check_integrity(bytes)?);
        Ok(())
    }
}
