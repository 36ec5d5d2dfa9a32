use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Metadata recorded the first time a file is loaded. A path present here is
/// never loaded again by the scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub load_time_secs: f64,
    pub size_bytes: u64,
    pub recorded_at: DateTime<Utc>,
}

/// Path → [`FileRecord`].
pub type FileRecordTable = BTreeMap<String, FileRecord>;

/// Structural signature → paths sharing it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoarseGroups(BTreeMap<String, BTreeSet<String>>);

impl CoarseGroups {
    /// Adds `path` to the group for `signature`, creating the group on demand.
    pub fn insert(&mut self, signature: &str, path: &str) {
        self.0
            .entry(signature.to_string())
            .or_default()
            .insert(path.to_string());
    }

    pub fn get(&self, signature: &str) -> Option<&BTreeSet<String>> {
        self.0.get(signature)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.0.iter()
    }

    /// Groups with more than one member, which are the only ones refined.
    pub fn multi_member(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.0.iter().filter(|(_, members)| members.len() > 1)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn file_count(&self) -> usize {
        self.0.values().map(|members| members.len()).sum()
    }
}

impl FromIterator<(String, BTreeSet<String>)> for CoarseGroups {
    fn from_iter<I: IntoIterator<Item = (String, BTreeSet<String>)>>(iter: I) -> Self {
        let mut groups = CoarseGroups::default();
        for (signature, members) in iter {
            groups.0.entry(signature).or_default().extend(members);
        }
        groups
    }
}

/// Cluster label → member paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefinedClusters(BTreeMap<String, Vec<String>>);

impl RefinedClusters {
    pub fn insert(&mut self, label: String, members: Vec<String>) {
        self.0.insert(label, members);
    }

    /// Drops every cluster holding one of `paths`, so a regrown coarse group
    /// does not leave stale clusters behind when it is refined again.
    pub fn remove_touching(&mut self, paths: &BTreeSet<String>) {
        self.0
            .retain(|_, members| !members.iter().any(|m| paths.contains(m)));
    }

    pub fn get(&self, label: &str) -> Option<&Vec<String>> {
        self.0.get(label)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Clusters with more than one member.
    pub fn multi_member_count(&self) -> usize {
        self.0.values().filter(|members| members.len() > 1).count()
    }
}

/// Reference path → paths proven identical to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DuplicateRelations(BTreeMap<String, BTreeSet<String>>);

impl DuplicateRelations {
    pub fn record(&mut self, reference: &str, duplicate: &str) {
        self.0
            .entry(reference.to_string())
            .or_default()
            .insert(duplicate.to_string());
    }

    pub fn remove_references(&mut self, paths: &BTreeSet<String>) {
        self.0.retain(|reference, _| !paths.contains(reference));
    }

    pub fn get(&self, reference: &str) -> Option<&BTreeSet<String>> {
        self.0.get(reference)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn duplicate_count(&self) -> usize {
        self.0.values().map(|dupes| dupes.len()).sum()
    }
}

/// The four checkpointed tables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tables {
    pub files: FileRecordTable,
    pub groups: CoarseGroups,
    pub refined: RefinedClusters,
    pub duplicates: DuplicateRelations,
}
