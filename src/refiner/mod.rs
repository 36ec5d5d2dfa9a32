//! Layer-wise refinement of a coarse group into candidate clusters, followed
//! by exact verification of each multi-member cluster.
//!
//! Each pass probes, for every open subgroup, the next non-scalar tensor of
//! every member and splits the subgroup by content hash. Members whose tensor
//! sequence is exhausted move into a settled pass-through bucket that is
//! never split again; members that cannot be loaded settle in a bucket of
//! their own. Refinement stops after the
//! first pass in which no hash was computed, so the number of passes is
//! bounded by the longest tensor sequence in the group.

pub mod verify;

use crate::error::LoadError;
use crate::loader::TensorLoader;
use crate::signature::{cluster_label, content_hash, unique_label};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, trace, warn};

/// A candidate cluster on the worklist.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Subgroup {
    members: Vec<String>,
    /// Index of the first tensor not yet examined.
    cursor: usize,
    settled: bool,
}

impl Subgroup {
    fn needs_split(&self) -> bool {
        self.members.len() > 1 && !self.settled
    }
}

/// Why a member could not be probed any further.
#[derive(Debug)]
enum Inconclusive {
    Exhausted,
    Unreadable(LoadError),
}

enum Probe {
    Hashed { index: usize, hash: String },
    Inconclusive(Inconclusive),
}

/// Result of refining one coarse group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupRefinement {
    /// Final subgroups. Together they partition the input members.
    pub clusters: Vec<Vec<String>>,
    /// Reference → members proven identical to it.
    pub duplicates: Vec<(String, Vec<String>)>,
    pub passes: usize,
}

impl GroupRefinement {
    /// Clusters keyed the way they are persisted.
    pub fn labelled_clusters(&self) -> Vec<(String, Vec<String>)> {
        self.clusters
            .iter()
            .map(|members| {
                let label = match members.as_slice() {
                    [single] => unique_label(single),
                    _ => cluster_label(members),
                };
                (label, members.clone())
            })
            .collect()
    }
}

pub fn refine_group(members: &BTreeSet<String>, loader: &dyn TensorLoader) -> GroupRefinement {
    debug!("Refining group of {} file(s)", members.len());
    if members.len() <= 1 {
        return GroupRefinement {
            clusters: members.iter().map(|m| vec![m.clone()]).collect(),
            ..Default::default()
        };
    }

    let mut worklist = vec![Subgroup {
        members: members.iter().cloned().collect(),
        cursor: 0,
        settled: false,
    }];
    let mut passes = 0;

    loop {
        let mut hashed = 0;
        let mut next = Vec::with_capacity(worklist.len());
        for subgroup in worklist {
            if subgroup.needs_split() {
                trace!(
                    "Subgroup of size {} probing from tensor {}",
                    subgroup.members.len(),
                    subgroup.cursor
                );
                next.extend(split(subgroup, loader, &mut hashed));
            } else {
                next.push(subgroup);
            }
        }
        worklist = next;
        passes += 1;
        if hashed == 0 {
            debug!(
                "No further layer splits possible after {} passes, {} subgroups",
                passes,
                worklist.len()
            );
            break;
        }
    }

    let clusters: Vec<Vec<String>> = worklist.into_iter().map(|s| s.members).collect();
    let duplicates = clusters
        .iter()
        .filter(|members| members.len() > 1)
        .filter_map(|members| verify::confirm_duplicates(members, loader))
        .collect();

    GroupRefinement {
        clusters,
        duplicates,
        passes,
    }
}

fn probe(path: &str, cursor: usize, loader: &dyn TensorLoader) -> Probe {
    let tensors = match loader.load(Path::new(path)) {
        Ok(tensors) => tensors,
        Err(e) => return Probe::Inconclusive(Inconclusive::Unreadable(e)),
    };
    tensors
        .values()
        .enumerate()
        .skip(cursor)
        .find(|(_, tensor)| !tensor.is_scalar())
        .map(|(index, tensor)| Probe::Hashed {
            index,
            hash: content_hash(tensor),
        })
        .unwrap_or(Probe::Inconclusive(Inconclusive::Exhausted))
}

/// Splits one subgroup by the hash of each member's next probe tensor.
fn split(subgroup: Subgroup, loader: &dyn TensorLoader, hashed: &mut usize) -> Vec<Subgroup> {
    let mut buckets: BTreeMap<(usize, String), Vec<String>> = BTreeMap::new();
    let mut exhausted = Vec::new();
    let mut unreadable = Vec::new();

    for path in subgroup.members {
        match probe(&path, subgroup.cursor, loader) {
            Probe::Hashed { index, hash } => {
                *hashed += 1;
                buckets.entry((index, hash)).or_default().push(path);
            }
            Probe::Inconclusive(Inconclusive::Exhausted) => {
                trace!("{} has no tensor left to probe", path);
                exhausted.push(path);
            }
            Probe::Inconclusive(Inconclusive::Unreadable(e)) => {
                warn!("Keeping {} in its subgroup, cannot refine further: {}", path, e);
                unreadable.push(path);
            }
        }
    }

    let mut next: Vec<Subgroup> = buckets
        .into_iter()
        .map(|((index, _), members)| Subgroup {
            members,
            cursor: index + 1,
            settled: false,
        })
        .collect();
    // Exhausted members still agree on every probed tensor; unreadable ones
    // agree on nothing, so they never share a bucket with them.
    for members in [exhausted, unreadable] {
        if !members.is_empty() {
            next.push(Subgroup {
                members,
                cursor: subgroup.cursor,
                settled: true,
            });
        }
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{Tensor, TensorMap};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MemoryLoader {
        files: HashMap<String, TensorMap>,
        loads: AtomicUsize,
    }

    impl MemoryLoader {
        fn with(mut self, path: &str, tensors: &[(&str, &[usize], u8)]) -> Self {
            let map = tensors
                .iter()
                .map(|(name, shape, fill)| {
                    let len = shape.iter().product::<usize>().max(1);
                    (
                        name.to_string(),
                        Tensor {
                            dtype: "U8".to_string(),
                            shape: shape.to_vec(),
                            data: vec![*fill; len],
                        },
                    )
                })
                .collect();
            self.files.insert(path.to_string(), map);
            self
        }
    }

    impl TensorLoader for MemoryLoader {
        fn load(&self, path: &Path) -> Result<TensorMap, LoadError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            let key = path.to_string_lossy();
            self.files
                .get(key.as_ref())
                .cloned()
                .ok_or_else(|| LoadError::Format {
                    path: path.to_path_buf(),
                    reason: "unknown file".to_string(),
                })
        }
    }

    fn group(paths: &[&str]) -> BTreeSet<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    fn sorted_clusters(refinement: &GroupRefinement) -> Vec<Vec<String>> {
        let mut clusters = refinement.clusters.clone();
        clusters.sort();
        clusters
    }

    #[test]
    fn test_splits_off_file_with_different_content() {
        let loader = MemoryLoader::default()
            .with("x", &[("a", &[2], 1), ("b", &[2], 2)])
            .with("y", &[("a", &[2], 1), ("b", &[2], 2)])
            .with("z", &[("a", &[2], 1), ("b", &[2], 9)]);

        let refinement = refine_group(&group(&["x", "y", "z"]), &loader);
        assert_eq!(
            sorted_clusters(&refinement),
            vec![vec!["x".to_string(), "y".to_string()], vec!["z".to_string()]]
        );
        assert_eq!(
            refinement.duplicates,
            vec![("x".to_string(), vec!["y".to_string()])]
        );

        let labels: Vec<String> = refinement
            .labelled_clusters()
            .into_iter()
            .map(|(label, _)| label)
            .collect();
        assert!(labels.contains(&"unique:z".to_string()));
        assert!(labels.contains(&cluster_label(&["x", "y"])));
    }

    #[test]
    fn test_scalars_are_skipped_and_passes_are_bounded() {
        // Scalars differ but are never probed, so the files stay together.
        let loader = MemoryLoader::default()
            .with("p", &[("a", &[], 1), ("b", &[3], 4), ("c", &[], 5)])
            .with("q", &[("a", &[], 2), ("b", &[3], 4), ("c", &[], 6)]);

        let refinement = refine_group(&group(&["p", "q"]), &loader);
        assert_eq!(refinement.clusters.len(), 1);
        assert_eq!(refinement.clusters[0], vec!["p".to_string(), "q".to_string()]);
        // One hashing pass over "b", then one pass that finds nothing left.
        assert_eq!(refinement.passes, 2);
        // Scalar values differ, so exact verification rejects the pair.
        assert!(refinement.duplicates.is_empty());
    }

    #[test]
    fn test_unreadable_member_is_retained() {
        let loader = MemoryLoader::default()
            .with("a", &[("w", &[4], 1)])
            .with("b", &[("w", &[4], 1)]);

        let refinement = refine_group(&group(&["a", "b", "missing"]), &loader);
        let members: BTreeSet<String> = refinement.clusters.iter().flatten().cloned().collect();
        assert_eq!(members, group(&["a", "b", "missing"]));
        assert!(refinement
            .clusters
            .iter()
            .any(|c| c == &vec!["missing".to_string()]));
        assert_eq!(
            refinement.duplicates,
            vec![("a".to_string(), vec!["b".to_string()])]
        );
    }

    #[test]
    fn test_ragged_members_settle_when_exhausted() {
        // "short" runs out of tensors while the others are still comparable.
        let loader = MemoryLoader::default()
            .with("long1", &[("a", &[2], 1), ("b", &[2], 2), ("c", &[2], 3)])
            .with("long2", &[("a", &[2], 1), ("b", &[2], 2), ("c", &[2], 3)])
            .with("short", &[("a", &[2], 1)]);

        let refinement = refine_group(&group(&["long1", "long2", "short"]), &loader);
        let clusters = sorted_clusters(&refinement);
        assert_eq!(
            clusters,
            vec![
                vec!["long1".to_string(), "long2".to_string()],
                vec!["short".to_string()]
            ]
        );
        assert_eq!(
            refinement.duplicates,
            vec![("long1".to_string(), vec!["long2".to_string()])]
        );
    }

    #[test]
    fn test_hash_cluster_without_exact_match_is_still_reported() {
        // Probed tensors match; a later scalar differs.
        let loader = MemoryLoader::default()
            .with("m", &[("w", &[4], 7), ("s", &[], 1)])
            .with("n", &[("w", &[4], 7), ("s", &[], 2)]);

        let refinement = refine_group(&group(&["m", "n"]), &loader);
        assert_eq!(refinement.clusters.len(), 1);
        assert!(refinement.duplicates.is_empty());
        let (label, members) = &refinement.labelled_clusters()[0];
        assert_eq!(label, &cluster_label(&["m", "n"]));
        assert_eq!(members.len(), 2);
    }

    #[test]
    fn test_singleton_group_is_not_probed() {
        let loader = MemoryLoader::default().with("solo", &[("w", &[4], 7)]);
        let refinement = refine_group(&group(&["solo"]), &loader);
        assert_eq!(refinement.clusters, vec![vec!["solo".to_string()]]);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unreadable_members_do_not_hide_exhausted_duplicates() {
        // "a" sorts first but is gone; "b" and "c" hold nothing but an
        // identical scalar, so both are exhausted on the first pass.
        let loader = MemoryLoader::default()
            .with("b", &[("s", &[], 3)])
            .with("c", &[("s", &[], 3)]);

        let refinement = refine_group(&group(&["a", "b", "c"]), &loader);
        assert_eq!(
            sorted_clusters(&refinement),
            vec![vec!["a".to_string()], vec!["b".to_string(), "c".to_string()]]
        );
        assert_eq!(
            refinement.duplicates,
            vec![("b".to_string(), vec!["c".to_string()])]
        );
    }
}
