use crate::config::AppConfig;
use crate::error::Error;
use crate::loader::{SafetensorsLoader, TensorLoader};
use crate::progress::ProgressReporter;
use crate::refiner::{self, GroupRefinement};
use crate::report::TableTotals;
use crate::scanner::{self, ScanOptions, ScanState};
use crate::storage::{
    CheckpointStore, CoarseGroups, DuplicateRelations, RefinedClusters, Table, Tables,
};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub struct DedupeEngine {
    config: AppConfig,
    loader: Arc<dyn TensorLoader>,
}

#[derive(Debug)]
pub struct RunSummary {
    pub scan_duration: Duration,
    pub refine_duration: Duration,
    pub files_discovered: usize,
    pub files_skipped: usize,
    pub files_unsupported: usize,
    pub files_loaded: usize,
    pub load_failures: usize,
    pub groups_refined: usize,
    pub totals: TableTotals,
}

impl DedupeEngine {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            loader: Arc::new(SafetensorsLoader),
        }
    }

    pub fn with_loader(mut self, loader: Arc<dyn TensorLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Run the full pipeline:
    /// 1. Load the four checkpoint tables
    /// 2. Scan: load unrecorded files and group them by structural signature
    /// 3. Refine every multi-member group and verify duplicates
    /// 4. Persist everything
    pub fn run(&self, reporter: &dyn ProgressReporter) -> Result<RunSummary, Error> {
        self.config.validate()?;
        let store = CheckpointStore::open(&self.config.checkpoint_dir)?;
        let Tables {
            files,
            groups,
            refined,
            duplicates,
        } = store.load_all()?;

        // Phase 1: Scan
        info!("Scanning directory: {}", self.config.scan_dir.display());
        let scan_start = Instant::now();
        let candidates = scanner::candidate_files(
            &self.config.scan_dir,
            &self.config.extension,
            self.config.recursive,
            &self.config.ignore_patterns,
        )?;
        let state = ScanState::new(files, groups);
        let options = ScanOptions {
            workers: self.config.workers,
            flush_interval: self.config.flush_interval,
            queue_capacity: self.config.queue_capacity,
        };
        let outcome = scanner::run_scan(
            &candidates,
            &state,
            self.loader.as_ref(),
            &store,
            &options,
            reporter,
        )?;
        let (files, groups) = state.into_tables()?;
        store.save(Table::CoarseGroups, &groups)?;
        store.save(Table::Files, &files)?;
        let scan_duration = scan_start.elapsed();
        reporter.on_scan_complete(outcome.processed, scan_duration.as_secs_f64());
        debug!(
            "Scan completed in {:.2}s, {} files recorded, {} groups",
            scan_duration.as_secs_f64(),
            files.len(),
            groups.len(),
        );

        // Phase 2: Refine
        info!("Refining groups with more than one member...");
        let refine_start = Instant::now();
        let (refined, duplicates, groups_refined) =
            self.refine_all(&groups, refined, duplicates, &store, reporter)?;
        let refine_duration = refine_start.elapsed();

        let tables = Tables {
            files,
            groups,
            refined,
            duplicates,
        };
        store.save_all(&tables)?;
        let totals = TableTotals::from_tables(&tables);
        reporter.on_refine_complete(totals.duplicate_clusters, refine_duration.as_secs_f64());
        debug!(
            "Refinement completed in {:.2}s, {} groups refined, {} duplicate clusters",
            refine_duration.as_secs_f64(),
            groups_refined,
            totals.duplicate_clusters,
        );

        Ok(RunSummary {
            scan_duration,
            refine_duration,
            files_discovered: outcome.candidates,
            files_skipped: outcome.already_recorded,
            files_unsupported: outcome.unsupported_paths,
            files_loaded: outcome.processed,
            load_failures: outcome.load_failures,
            groups_refined,
            totals,
        })
    }

    /// Refines each multi-member group from scratch, persisting the refined
    /// and duplicate tables after every group.
    fn refine_all(
        &self,
        groups: &CoarseGroups,
        refined: RefinedClusters,
        duplicates: DuplicateRelations,
        store: &CheckpointStore,
        reporter: &dyn ProgressReporter,
    ) -> Result<(RefinedClusters, DuplicateRelations, usize), Error> {
        let targets: Vec<(&String, &BTreeSet<String>)> = groups.multi_member().collect();
        let total = targets.len();
        reporter.on_refine_start(total);

        let results = Mutex::new((refined, duplicates));
        let done = AtomicUsize::new(0);
        let loader = self.loader.as_ref();

        let refine_one = |signature: &String, members: &BTreeSet<String>| -> Result<(), Error> {
            info!(
                "Refining group with shape signature {}, size {}",
                short_signature(signature),
                members.len()
            );
            let refinement = refiner::refine_group(members, loader);

            let mut guard = results
                .lock()
                .map_err(|e| Error::Other(format!("Failed to lock refined tables: {}", e)))?;
            let (refined, duplicates) = &mut *guard;
            apply_refinement(refined, duplicates, members, &refinement);
            store.save(Table::RefinedClusters, &*refined)?;
            store.save(Table::Duplicates, &*duplicates)?;
            drop(guard);

            reporter.on_group_refined(done.fetch_add(1, Ordering::SeqCst) + 1, total);
            Ok(())
        };

        if self.config.parallel_refine {
            targets
                .par_iter()
                .try_for_each(|(signature, members)| refine_one(*signature, *members))?;
        } else {
            for (signature, members) in &targets {
                refine_one(*signature, *members)?;
            }
        }

        let (refined, duplicates) = results
            .into_inner()
            .map_err(|e| Error::Other(format!("Refined tables poisoned: {}", e)))?;
        Ok((refined, duplicates, total))
    }
}

/// Replaces whatever an earlier run stored for `members` with `refinement`.
pub fn apply_refinement(
    refined: &mut RefinedClusters,
    duplicates: &mut DuplicateRelations,
    members: &BTreeSet<String>,
    refinement: &GroupRefinement,
) {
    refined.remove_touching(members);
    duplicates.remove_references(members);
    for (label, cluster) in refinement.labelled_clusters() {
        refined.insert(label, cluster);
    }
    for (reference, confirmed) in &refinement.duplicates {
        for duplicate in confirmed {
            duplicates.record(reference, duplicate);
        }
    }
}

fn short_signature(signature: &str) -> &str {
    signature.get(..12).unwrap_or(signature)
}
