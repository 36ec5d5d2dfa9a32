//! Pure hashing functions: structural signatures for coarse grouping, content
//! hashes for layer probes, and the labels that key refined clusters.

use crate::loader::{Tensor, TensorMap};

/// Hash of a file's ordered tensor shape sequence. Ignores tensor values.
pub fn structural_signature(tensors: &TensorMap) -> String {
    let shapes: Vec<&[usize]> = tensors.values().map(|t| t.shape.as_slice()).collect();
    let canonical = render_shapes(&shapes);
    blake3::hash(canonical.as_bytes()).to_hex().to_string()
}

/// Hash of one tensor's raw bytes. Only a candidate filter: equal hashes are
/// always confirmed by an exact comparison before anything is reported.
pub fn content_hash(tensor: &Tensor) -> String {
    blake3::hash(&tensor.data).to_hex().to_string()
}

/// Key for a refined cluster with a single member.
pub fn unique_label(path: &str) -> String {
    format!("unique:{}", path)
}

/// Key for a multi-member refined cluster. Independent of member order.
pub fn cluster_label<S: AsRef<str>>(members: &[S]) -> String {
    let mut sorted: Vec<&str> = members.iter().map(|m| m.as_ref()).collect();
    sorted.sort_unstable();
    let rendered = sorted
        .iter()
        .map(|m| format!("'{}'", m))
        .collect::<Vec<_>>()
        .join(", ");
    blake3::hash(format!("[{}]", rendered).as_bytes())
        .to_hex()
        .to_string()
}

/// Renders `[(2, 3), (4,), ()]`.
fn render_shapes(shapes: &[&[usize]]) -> String {
    let tuples: Vec<String> = shapes.iter().map(|dims| render_tuple(dims)).collect();
    format!("[{}]", tuples.join(", "))
}

fn render_tuple(dims: &[usize]) -> String {
    match dims {
        [] => "()".to_string(),
        [single] => format!("({},)", single),
        _ => {
            let parts: Vec<String> = dims.iter().map(|d| d.to_string()).collect();
            format!("({})", parts.join(", "))
        }
    }
}
