pub mod current_time;
pub mod data_utils;
pub mod error;
pub mod get_id;

// Re-export commonly used types
pub use current_time::CurrentTime;
pub use data_utils::{deep_compare, get_path, merge_patch, Document, WatchedProperty};
pub use error::*;
pub use get_id::generate_id;
