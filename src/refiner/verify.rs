use crate::loader::{TensorLoader, TensorMap};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

/// First difference found between a reference and a candidate file.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Mismatch {
    #[error("tensor count differs ({reference} vs {candidate})")]
    TensorCount { reference: usize, candidate: usize },

    #[error("tensor #{index} is named '{reference}' vs '{candidate}'")]
    Name {
        index: usize,
        reference: String,
        candidate: String,
    },

    #[error("tensor '{name}' differs in dtype")]
    Dtype { name: String },

    #[error("tensor '{name}' differs in shape")]
    Shape { name: String },

    #[error("tensor '{name}' differs in values")]
    Values { name: String },
}

/// Exact comparison: same tensor count, same names in iteration order, and
/// for every pair the same dtype, shape and bytes.
pub fn compare(reference: &TensorMap, candidate: &TensorMap) -> Result<(), Mismatch> {
    if reference.len() != candidate.len() {
        return Err(Mismatch::TensorCount {
            reference: reference.len(),
            candidate: candidate.len(),
        });
    }

    for (index, ((ref_name, ref_tensor), (cand_name, cand_tensor))) in
        reference.iter().zip(candidate.iter()).enumerate()
    {
        if ref_name != cand_name {
            return Err(Mismatch::Name {
                index,
                reference: ref_name.clone(),
                candidate: cand_name.clone(),
            });
        }
        if ref_tensor.dtype != cand_tensor.dtype {
            return Err(Mismatch::Dtype {
                name: ref_name.clone(),
            });
        }
        if ref_tensor.shape != cand_tensor.shape {
            return Err(Mismatch::Shape {
                name: ref_name.clone(),
            });
        }
        if ref_tensor.data != cand_tensor.data {
            return Err(Mismatch::Values {
                name: ref_name.clone(),
            });
        }
    }
    Ok(())
}

/// Compares every member against the reference, the first member that loads,
/// and returns the reference with the members proven identical to it.
/// Unreadable files and mismatches only drop their own pair.
pub fn confirm_duplicates(
    members: &[String],
    loader: &dyn TensorLoader,
) -> Option<(String, Vec<String>)> {
    if members.len() < 2 {
        return None;
    }
    debug!(
        "Checking subgroup with {} files for true duplicates",
        members.len()
    );

    let mut remaining = members.iter();
    let (reference, reference_tensors) = loop {
        let candidate = remaining.next()?;
        match loader.load(Path::new(candidate)) {
            Ok(tensors) => break (candidate, tensors),
            Err(e) => warn!("Skipping unreadable member as reference: {}", e),
        }
    };

    let mut confirmed = Vec::new();
    for other in remaining {
        let other_tensors = match loader.load(Path::new(other)) {
            Ok(tensors) => tensors,
            Err(e) => {
                warn!("Cannot verify {} against {}: {}", other, reference, e);
                continue;
            }
        };
        match compare(&reference_tensors, &other_tensors) {
            Ok(()) => {
                info!("Found duplicates: {} and {}", reference, other);
                confirmed.push(other.clone());
            }
            Err(mismatch) => {
                debug!("{} is not a duplicate of {}: {}", other, reference, mismatch);
            }
        }
    }
    (!confirmed.is_empty()).then(|| (reference.clone(), confirmed))
}
