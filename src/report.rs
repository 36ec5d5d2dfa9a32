use crate::error::Error;
use crate::storage::Tables;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Totals derived from the checkpoint tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableTotals {
    pub files_recorded: usize,
    pub coarse_groups: usize,
    pub multi_member_groups: usize,
    pub refined_clusters: usize,
    /// Refined clusters with more than one member.
    pub candidate_clusters: usize,
    /// References with at least one confirmed duplicate.
    pub duplicate_clusters: usize,
    pub duplicate_files: usize,
    /// Bytes held by confirmed duplicates beyond their reference.
    pub wasted_bytes: u64,
}

impl TableTotals {
    pub fn from_tables(tables: &Tables) -> Self {
        let wasted_bytes = tables
            .duplicates
            .iter()
            .flat_map(|(_, dupes)| dupes.iter())
            .filter_map(|path| tables.files.get(path))
            .map(|record| record.size_bytes)
            .sum();

        Self {
            files_recorded: tables.files.len(),
            coarse_groups: tables.groups.len(),
            multi_member_groups: tables.groups.multi_member().count(),
            refined_clusters: tables.refined.len(),
            candidate_clusters: tables.refined.multi_member_count(),
            duplicate_clusters: tables.duplicates.len(),
            duplicate_files: tables.duplicates.duplicate_count(),
            wasted_bytes,
        }
    }
}

#[derive(Debug, Serialize)]
struct DuplicateRow<'a> {
    reference: &'a str,
    duplicate: &'a str,
    size_bytes: u64,
}

/// Writes one `reference,duplicate,size_bytes` row per confirmed duplicate.
/// Returns the number of rows written.
pub fn write_duplicates_csv(tables: &Tables, path: &Path) -> Result<usize, Error> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut wtr = csv::Writer::from_path(path).map_err(csv_error)?;

    let mut rows = 0;
    for (reference, dupes) in tables.duplicates.iter() {
        for duplicate in dupes {
            let size_bytes = tables
                .files
                .get(duplicate)
                .map(|record| record.size_bytes)
                .unwrap_or(0);
            wtr.serialize(DuplicateRow {
                reference,
                duplicate,
                size_bytes,
            })
            .map_err(csv_error)?;
            rows += 1;
        }
    }
    wtr.flush()?;
    Ok(rows)
}

fn csv_error(e: csv::Error) -> Error {
    Error::Other(format!("CSV error: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FileRecord;
    use chrono::Utc;
    use tempfile::tempdir;

    fn sample_tables() -> Tables {
        let mut tables = Tables::default();
        for (path, size) in [("/m/a", 100u64), ("/m/b", 100), ("/m/c", 100), ("/m/d", 7)] {
            tables.files.insert(
                path.to_string(),
                FileRecord {
                    load_time_secs: 0.1,
                    size_bytes: size,
                    recorded_at: Utc::now(),
                },
            );
        }
        for path in ["/m/a", "/m/b", "/m/c"] {
            tables.groups.insert("sig-1", path);
        }
        tables.groups.insert("sig-2", "/m/d");
        tables
            .refined
            .insert("cluster".into(), vec!["/m/a".into(), "/m/b".into(), "/m/c".into()]);
        tables.duplicates.record("/m/a", "/m/b");
        tables.duplicates.record("/m/a", "/m/c");
        tables
    }

    #[test]
    fn test_totals_from_tables() {
        let totals = TableTotals::from_tables(&sample_tables());
        assert_eq!(totals.files_recorded, 4);
        assert_eq!(totals.coarse_groups, 2);
        assert_eq!(totals.multi_member_groups, 1);
        assert_eq!(totals.candidate_clusters, 1);
        assert_eq!(totals.duplicate_clusters, 1);
        assert_eq!(totals.duplicate_files, 2);
        assert_eq!(totals.wasted_bytes, 200);
    }

    #[test]
    fn test_write_duplicates_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out/dupes.csv");
        let rows = write_duplicates_csv(&sample_tables(), &path).unwrap();
        assert_eq!(rows, 2);

        let body = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines[0], "reference,duplicate,size_bytes");
        assert_eq!(lines[1], "/m/a,/m/b,100");
        assert_eq!(lines[2], "/m/a,/m/c,100");
    }
}
