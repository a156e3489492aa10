pub mod crud;
pub mod model;

pub use crud::SnapshotCrud;
pub use model::{BossStats, FetchedSnapshot, SkillStats, SnapshotData, StoredSnapshot};
