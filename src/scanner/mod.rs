mod pipeline;
mod walk;

pub use pipeline::{path_key, run_scan, ScanItem, ScanOptions, ScanOutcome, ScanState};
pub use walk::candidate_files;
