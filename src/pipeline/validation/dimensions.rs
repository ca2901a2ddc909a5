use std::io::Cursor;

use image::ImageReader;
use tracing::debug;

use super::{ValidationError, ValidationReport, ValidationStage};
use crate::config::ValidationConfig;

/// Check image geometry against `bounds`. Reads the header only.
///
/// Checks run in a fixed order and the first failure wins:
/// 1. below minimum width/height
/// 2. above maximum width/height
/// 3. `max(w/h, h/w)` above `max_aspect_ratio`
pub fn check_dimensions(
    bytes: &[u8],
    bounds: &ValidationConfig,
) -> Result<(u32, u32), ValidationError> {
    let (width, height) = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ValidationError::Corrupt(format!("could not read image: {e}")))?
        .into_dimensions()
        .map_err(|e| ValidationError::Corrupt(format!("could not read dimensions: {e}")))?;

    check_geometry(width, height, bounds)?;
    Ok((width, height))
}

/// The bounds checks on already-known geometry.
pub fn check_geometry(width: u32, height: u32, bounds: &ValidationConfig) -> Result<(), ValidationError> {
    if width < bounds.min_width || height < bounds.min_height {
        return Err(ValidationError::OutOfBounds(format!(
            "Image too small ({width}x{height}); minimum is {}x{}",
            bounds.min_width, bounds.min_height
        )));
    }

    if width > bounds.max_width || height > bounds.max_height {
        return Err(ValidationError::OutOfBounds(format!(
            "Image too large ({width}x{height}); maximum is {}x{}",
            bounds.max_width, bounds.max_height
        )));
    }

    // Zero-sized axes only get here when a minimum is 0.
    if width == 0 || height == 0 {
        return Err(ValidationError::OutOfBounds(format!(
            "Image has an empty axis ({width}x{height})"
        )));
    }

    let aspect_ratio = aspect_ratio(width, height);
    if aspect_ratio > bounds.max_aspect_ratio {
        return Err(ValidationError::OutOfBounds(format!(
            "Aspect ratio {aspect_ratio:.1}:1 ({width}x{height}) exceeds maximum {}:1",
            bounds.max_aspect_ratio
        )));
    }

    debug!(width, height, aspect_ratio, "Image dimensions within bounds");
    Ok(())
}

/// `max(w/h, h/w)`, always >= 1.0 for non-empty images.
pub fn aspect_ratio(width: u32, height: u32) -> f64 {
    let (w, h) = (width as f64, height as f64);
    (w / h).max(h / w)
}

/// Geometry bounds stage. Records width and height in the report.
pub struct DimensionValidator {
    bounds: ValidationConfig,
}

impl DimensionValidator {
    pub fn new(bounds: ValidationConfig) -> Self {
        Self { bounds }
    }

    pub fn bounds(&self) -> &ValidationConfig {
        &self.bounds
    }
}

impl ValidationStage for DimensionValidator {
    fn name(&self) -> &'static str {
        "dimensions"
    }

    fn validate(&self, bytes: &[u8], report: &mut ValidationReport) -> Result<(), ValidationError> {
        let (width, height) = check_dimensions(bytes, &self.bounds)?;
        report.width = Some(width);
        report.height = Some(height);
        Ok(())
    }
}
