pub mod catalog;
pub mod models;
pub mod sessions;
pub mod sqlite;

pub use catalog::{insert_asset, is_cataloged};
pub use models::{Asset, ImportSession, ImportStatus, NewAsset, SessionCounts, TOTAL_STAGES};
pub use sqlite::Database;
