use super::models::{CoarseGroups, DuplicateRelations, FileRecordTable, RefinedClusters, Tables};
use crate::error::Error;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Files,
    CoarseGroups,
    RefinedClusters,
    Duplicates,
}

impl Table {
    pub const ALL: [Table; 4] = [
        Table::Files,
        Table::CoarseGroups,
        Table::RefinedClusters,
        Table::Duplicates,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            Table::Files => "processed.json",
            Table::CoarseGroups => "groups.json",
            Table::RefinedClusters => "refined_groups.json",
            Table::Duplicates => "duplicates.json",
        }
    }
}

/// JSON checkpoint tables in a single directory. Saves replace the whole
/// table through a temp file and rename, so a table on disk is never torn.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| Error::Persistence {
            path: dir.clone(),
            reason: e.to_string(),
        })?;
        debug!("Using '{}' for checkpoint tables", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, table: Table) -> PathBuf {
        self.dir.join(table.file_name())
    }

    /// Absent table → empty. Present but unreadable or unparseable → error.
    pub fn load<T: DeserializeOwned + Default>(&self, table: Table) -> Result<T, Error> {
        let path = self.path_of(table);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                trace!("No checkpoint at {}, starting empty", path.display());
                return Ok(T::default());
            }
            Err(e) => {
                return Err(Error::CorruptCheckpoint {
                    path,
                    reason: e.to_string(),
                })
            }
        };
        serde_json::from_str(&raw).map_err(|e| Error::CorruptCheckpoint {
            path,
            reason: e.to_string(),
        })
    }

    pub fn save<T: Serialize>(&self, table: Table, value: &T) -> Result<(), Error> {
        let path = self.path_of(table);
        let persistence = |reason: String| Error::Persistence {
            path: path.clone(),
            reason,
        };

        let tmp = NamedTempFile::new_in(&self.dir).map_err(|e| persistence(e.to_string()))?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer_pretty(&mut writer, value)
                .map_err(|e| persistence(e.to_string()))?;
            writer.flush().map_err(|e| persistence(e.to_string()))?;
        }
        tmp.as_file()
            .sync_all()
            .map_err(|e| persistence(e.to_string()))?;
        tmp.persist(&path)
            .map_err(|e| persistence(e.error.to_string()))?;
        trace!("Saved checkpoint {}", path.display());
        Ok(())
    }

    pub fn load_all(&self) -> Result<Tables, Error> {
        let tables = Tables {
            files: self.load::<FileRecordTable>(Table::Files)?,
            groups: self.load::<CoarseGroups>(Table::CoarseGroups)?,
            refined: self.load::<RefinedClusters>(Table::RefinedClusters)?,
            duplicates: self.load::<DuplicateRelations>(Table::Duplicates)?,
        };
        debug!(
            "Checkpoint loaded: {} files, {} groups, {} refined clusters, {} duplicate references",
            tables.files.len(),
            tables.groups.len(),
            tables.refined.len(),
            tables.duplicates.len(),
        );
        Ok(tables)
    }

    pub fn save_all(&self, tables: &Tables) -> Result<(), Error> {
        // Groups before records: a persisted record must always have its group.
        self.save(Table::CoarseGroups, &tables.groups)?;
        self.save(Table::Files, &tables.files)?;
        self.save(Table::RefinedClusters, &tables.refined)?;
        self.save(Table::Duplicates, &tables.duplicates)?;
        Ok(())
    }

    /// Removes every table file. Missing files are not an error.
    pub fn clear(&self) -> Result<(), Error> {
        for table in Table::ALL {
            let path = self.path_of(table);
            match fs::remove_file(&path) {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(Error::Persistence {
                        path,
                        reason: e.to_string(),
                    })
                }
            }
        }
        Ok(())
    }
}
