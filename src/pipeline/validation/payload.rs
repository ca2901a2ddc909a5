use super::{ValidationError, ValidationReport, ValidationStage};

/// Rejects empty and oversize uploads before any parsing happens.
pub struct PayloadValidator {
    max_bytes: usize,
}

impl PayloadValidator {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}

impl ValidationStage for PayloadValidator {
    fn name(&self) -> &'static str {
        "payload"
    }

    fn validate(&self, bytes: &[u8], _report: &mut ValidationReport) -> Result<(), ValidationError> {
        if bytes.is_empty() {
            return Err(ValidationError::EmptyPayload);
        }
        if bytes.len() > self.max_bytes {
            return Err(ValidationError::PayloadTooLarge {
                size: bytes.len(),
                max: self.max_bytes,
            });
        }
        Ok(())
    }
}
