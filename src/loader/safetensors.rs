use super::{Tensor, TensorLoader, TensorMap};
use crate::error::LoadError;
use safetensors::SafeTensors;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::trace;

/// Loads `.safetensors` containers fully into memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct SafetensorsLoader;

impl TensorLoader for SafetensorsLoader {
    fn load(&self, path: &Path) -> Result<TensorMap, LoadError> {
        let buffer = read_full_file(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let container = SafeTensors::deserialize(&buffer).map_err(|e| LoadError::Format {
            path: path.to_path_buf(),
            reason: format!("{:?}", e),
        })?;

        let mut tensors = TensorMap::new();
        for (name, view) in container.tensors() {
            tensors.insert(
                name,
                Tensor {
                    dtype: format!("{:?}", view.dtype()),
                    shape: view.shape().to_vec(),
                    data: view.data().to_vec(),
                },
            );
        }
        trace!("Decoded {} tensors from {}", tensors.len(), path.display());
        Ok(tensors)
    }
}

fn read_full_file(file: &Path) -> std::io::Result<Vec<u8>> {
    let mut f = File::open(file)?;
    let mut buffer = Vec::new();
    f.read_to_end(&mut buffer)?;
    Ok(buffer)
}
