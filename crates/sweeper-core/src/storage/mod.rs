pub mod models;
pub mod queries;
pub mod sqlite;

pub use models::{CleanupReport, ReportOutcome};
pub use sqlite::Database;
