pub mod db;

pub use db::{redact_url, DbConfig};
