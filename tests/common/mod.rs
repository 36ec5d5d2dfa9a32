#![allow(dead_code)]

use safetensors::tensor::TensorView;
use safetensors::Dtype;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tensor_duper::loader::{SafetensorsLoader, TensorLoader, TensorMap};
use tensor_duper::LoadError;

/// (tensor name, shape, f32 values)
pub type TensorSpec<'a> = (&'a str, &'a [usize], Vec<f32>);

pub fn write_model(path: &Path, tensors: &[TensorSpec<'_>]) {
    let raw: Vec<(String, Vec<usize>, Vec<u8>)> = tensors
        .iter()
        .map(|(name, shape, values)| {
            let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
            (name.to_string(), shape.to_vec(), bytes)
        })
        .collect();

    let mut views = BTreeMap::new();
    for (name, shape, bytes) in &raw {
        views.insert(
            name.clone(),
            TensorView::new(Dtype::F32, shape.clone(), bytes).unwrap(),
        );
    }
    let serialized = safetensors::serialize(&views, &None).unwrap();
    fs::write(path, serialized).unwrap();
}

pub fn key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

pub fn t<'a>(name: &'a str, shape: &'a [usize], values: Vec<f32>) -> TensorSpec<'a> {
    (name, shape, values)
}

/// A small two-layer model whose values are all derived from `seed`.
pub fn layered(seed: f32) -> Vec<TensorSpec<'static>> {
    vec![
        t("layer0.weight", &[2, 3], (0..6).map(|i| seed + i as f32).collect()),
        t("layer0.bias", &[2], vec![seed, seed]),
        t("layer1.weight", &[3, 2], (0..6).map(|i| seed * 2.0 + i as f32).collect()),
        t("step", &[], vec![1.0]),
    ]
}

/// Wraps the safetensors loader and records every path it is asked to load.
#[derive(Default)]
pub struct RecordingLoader {
    pub calls: AtomicUsize,
    pub paths: Mutex<Vec<PathBuf>>,
}

impl RecordingLoader {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn loaded(&self, path: &Path) -> bool {
        self.paths.lock().unwrap().iter().any(|p| p == path)
    }
}

impl TensorLoader for RecordingLoader {
    fn load(&self, path: &Path) -> Result<TensorMap, LoadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.paths.lock().unwrap().push(path.to_path_buf());
        SafetensorsLoader.load(path)
    }
}
