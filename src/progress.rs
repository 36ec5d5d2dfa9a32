/// Trait for reporting pipeline progress.
///
/// CLI implements with indicatif progress bars. Scan callbacks arrive from
/// worker threads, hence `Send + Sync`. All methods default to no-ops.
pub trait ProgressReporter: Send + Sync {
    fn on_scan_start(&self, _candidate_files: usize) {}
    fn on_file_processed(&self, _processed: usize, _candidate_files: usize) {}
    fn on_scan_complete(&self, _processed: usize, _duration_secs: f64) {}
    fn on_refine_start(&self, _groups: usize) {}
    fn on_group_refined(&self, _refined: usize, _groups: usize) {}
    fn on_refine_complete(&self, _duplicate_clusters: usize, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
