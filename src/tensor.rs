//! Model input tensor and its content hash.
//!
//! The cache key is the SHA-256 of the tensor's shape and little-endian
//! `f32` bytes, not of the upload. Two uploads that preprocess to the same tensor share
//! one cache entry.

use std::fmt;

use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TensorError {
    #[error("Shape {shape:?} needs {expected} values, got {actual}")]
    ShapeMismatch {
        shape: [usize; 4],
        expected: usize,
        actual: usize,
    },

    #[error("Leading batch dimension must be 1, got {0}")]
    BatchSize(usize),
}

/// Dense 4-D `f32` tensor with a batch dimension of 1, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: [usize; 4],
    data: Vec<f32>,
}

impl Tensor {
    pub fn new(shape: [usize; 4], data: Vec<f32>) -> Result<Self, TensorError> {
        if shape[0] != 1 {
            return Err(TensorError::BatchSize(shape[0]));
        }
        let expected = shape.iter().product::<usize>();
        if data.len() != expected {
            return Err(TensorError::ShapeMismatch {
                shape,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// Tensor of the given shape with every element set to `value`.
    /// Used for warmup inputs.
    pub fn filled(shape: [usize; 4], value: f32) -> Result<Self, TensorError> {
        Self::new(shape, vec![value; shape.iter().product()])
    }

    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Raw little-endian byte representation of the data.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.data.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// SHA-256 over the shape and the raw data bytes.
    ///
    /// Shape is folded in so a 1x2x2x3 and a 1x3x2x2 tensor with identical
    /// data do not collide.
    pub fn content_hash(&self) -> ContentHash {
        let mut hasher = Sha256::new();
        for dim in self.shape {
            hasher.update((dim as u64).to_le_bytes());
        }
        hasher.update(self.to_le_bytes());
        ContentHash(hasher.finalize().into())
    }
}

/// 256-bit content hash used as the prediction cache key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First 8 hex characters, for log lines.
    pub fn short(&self) -> String {
        self.0[..4].iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({}..)", self.short())
    }
}
