mod safetensors;

pub use self::safetensors::SafetensorsLoader;

use crate::error::LoadError;
use std::collections::BTreeMap;
use std::path::Path;

/// One decoded tensor: element type, dimensions and raw little-endian bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tensor {
    pub dtype: String,
    pub shape: Vec<usize>,
    pub data: Vec<u8>,
}

impl Tensor {
    /// Zero-dimension tensors carry a single value and are never used as
    /// refinement probes.
    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }
}

/// Tensor name → tensor, iterated in ascending name order, which is the
/// native iteration order of a safetensors container.
pub type TensorMap = BTreeMap<String, Tensor>;

/// Decodes a tensor container. Shared by the scan producer and the refiner,
/// which may run on several threads.
pub trait TensorLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<TensorMap, LoadError>;
}
