pub mod checkpoint;
pub mod models;

pub use checkpoint::{CheckpointStore, Table};
pub use models::{
    CoarseGroups, DuplicateRelations, FileRecord, FileRecordTable, RefinedClusters, Tables,
};
