use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;
use tensor_duper::ProgressReporter;

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif progress bars.
///
/// - Scan phase: bar over the files left to load
/// - Refine phase: bar over the multi-member groups
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn set_bar(&self, pb: ProgressBar) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(old) = guard.take() {
                old.finish_and_clear();
            }
            *guard = Some(pb);
        }
    }

    fn finish_bar(&self) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
    }

    fn set_position(&self, position: usize, length: usize) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(pb) = guard.as_ref() {
                if pb.length() != Some(length as u64) {
                    pb.set_length(length as u64);
                }
                pb.set_position(position as u64);
            }
        }
    }

    fn counting_bar(label: &str, length: usize) -> ProgressBar {
        let pb = ProgressBar::new(length as u64);
        let template = format!(
            "  {{spinner:.cyan}} {} [{{bar:30.cyan/dim}}] {{pos}}/{{len}} ({{eta}} remaining)",
            label
        );
        if let Ok(style) = ProgressStyle::with_template(&template) {
            pb.set_style(style.progress_chars("━╸─").tick_chars(TICK_CHARS));
        }
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }
}

impl ProgressReporter for CliReporter {
    fn on_scan_start(&self, candidate_files: usize) {
        self.set_bar(Self::counting_bar("Loading", candidate_files));
    }

    fn on_file_processed(&self, processed: usize, candidate_files: usize) {
        self.set_position(processed, candidate_files);
    }

    fn on_scan_complete(&self, processed: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Scan complete: {} files classified in {:.2}s",
            processed, duration_secs
        );
    }

    fn on_refine_start(&self, groups: usize) {
        self.set_bar(Self::counting_bar("Refining", groups));
    }

    fn on_group_refined(&self, refined: usize, groups: usize) {
        self.set_position(refined, groups);
    }

    fn on_refine_complete(&self, duplicate_clusters: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Refinement complete: {} duplicate clusters in {:.2}s",
            duplicate_clusters, duration_secs
        );
    }
}
