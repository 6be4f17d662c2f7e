//! 행 스키마 검증기
//!
//! 쓰기 전에 행을 검증하고 정규화합니다. 거부되면 `DbError::Validation`이 되고
//! 아무것도 기록되지 않습니다.

use crate::tool::data_utils::{merge_patch, Document};
use crate::tool::error::{DbError, DbResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Validates and normalizes a row; `Err` carries the rejection reason.
pub trait RowValidator: Send + Sync {
    fn validate(&self, row: Document) -> Result<Document, String>;
}

impl<F> RowValidator for F
where
    F: Fn(Document) -> Result<Document, String> + Send + Sync,
{
    fn validate(&self, row: Document) -> Result<Document, String> {
        self(row)
    }
}

pub type SchemaValidator = Arc<dyn RowValidator>;

pub fn validator_fn<F>(f: F) -> SchemaValidator
where
    F: Fn(Document) -> Result<Document, String> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Validator that round-trips the row through `S`.
///
/// Fields `S` knows are replaced by their normalized form; other columns pass through.
pub fn serde_schema<S>() -> SchemaValidator
where
    S: Serialize + DeserializeOwned + 'static,
{
    validator_fn(|row: Document| {
        let parsed: S = serde_json::from_value(Value::Object(row.clone())).map_err(|e| e.to_string())?;
        match serde_json::to_value(parsed).map_err(|e| e.to_string())? {
            Value::Object(normalized) => {
                let mut out = row;
                merge_patch(&mut out, &normalized);
                Ok(out)
            }
            _ => Err("schema does not serialize to an object".to_string()),
        }
    })
}

pub(crate) fn run_validator(validator: &SchemaValidator, row: Document) -> DbResult<Document> {
    validator.validate(row).map_err(DbError::Validation)
}
