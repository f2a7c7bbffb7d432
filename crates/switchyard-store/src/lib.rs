//! # Switchyard Store
//!
//! SQLite-backed persistence for job definitions, schedule bindings and
//! pending fires, plus the advisory scheduler lease and the import-file
//! parser. The store is shared: read by the scheduler and the
//! administrative CLI, written by the scheduler's advance step and the
//! import/deregister operations.

pub mod import;
pub mod schema;
pub mod store;

pub use import::{parse_import_file, parse_import_str, ImportedJob};
pub use store::{ScheduledFire, Store};
