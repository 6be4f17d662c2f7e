//! Query predicates
//!
//! `Filter` is the "where" clause callers hand to a table service. Backends
//! either render it to SQL (MySQL) or evaluate it against documents (memory).

use crate::tool::error::{DbError, DbResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,63}$").expect("identifier pattern is valid")
});

/// Rejects anything that is not a plain SQL identifier.
pub fn validate_identifier(name: &str) -> DbResult<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(DbError::InvalidInput(format!("invalid identifier: '{name}'")))
    }
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
        }
    }
}

/// Where-clause expression
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    Like {
        column: String,
        pattern: String,
    },
    IsNull(String),
    IsNotNull(String),
    In {
        column: String,
        values: Vec<Value>,
        negated: bool,
    },
    Between {
        column: String,
        low: Value,
        high: Value,
        negated: bool,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    /// Checks every column name in the expression.
    pub fn validate(&self) -> DbResult<()> {
        match self {
            Filter::Compare { column, .. }
            | Filter::Like { column, .. }
            | Filter::IsNull(column)
            | Filter::IsNotNull(column)
            | Filter::In { column, .. }
            | Filter::Between { column, .. } => validate_identifier(column),
            Filter::And(items) | Filter::Or(items) => items.iter().try_for_each(Filter::validate),
            Filter::Not(inner) => inner.validate(),
        }
    }

    /// Conjunction with another optional filter
    pub fn and_also(self, other: Option<Filter>) -> Filter {
        match other {
            None => self,
            Some(other) => and(vec![self, other]),
        }
    }
}

pub fn eq(column: &str, value: impl Into<Value>) -> Filter {
    compare(column, CompareOp::Eq, value)
}

pub fn ne(column: &str, value: impl Into<Value>) -> Filter {
    compare(column, CompareOp::Ne, value)
}

pub fn gt(column: &str, value: impl Into<Value>) -> Filter {
    compare(column, CompareOp::Gt, value)
}

pub fn gte(column: &str, value: impl Into<Value>) -> Filter {
    compare(column, CompareOp::Gte, value)
}

pub fn lt(column: &str, value: impl Into<Value>) -> Filter {
    compare(column, CompareOp::Lt, value)
}

pub fn lte(column: &str, value: impl Into<Value>) -> Filter {
    compare(column, CompareOp::Lte, value)
}

fn compare(column: &str, op: CompareOp, value: impl Into<Value>) -> Filter {
    Filter::Compare {
        column: column.to_string(),
        op,
        value: value.into(),
    }
}

/// SQL LIKE; `%` matches any run, `_` a single character
pub fn like(column: &str, pattern: impl Into<String>) -> Filter {
    Filter::Like {
        column: column.to_string(),
        pattern: pattern.into(),
    }
}

pub fn is_null(column: &str) -> Filter {
    Filter::IsNull(column.to_string())
}

pub fn is_not_null(column: &str) -> Filter {
    Filter::IsNotNull(column.to_string())
}

pub fn in_array<V: Into<Value>>(column: &str, values: impl IntoIterator<Item = V>) -> Filter {
    Filter::In {
        column: column.to_string(),
        values: values.into_iter().map(Into::into).collect(),
        negated: false,
    }
}

pub fn not_in_array<V: Into<Value>>(column: &str, values: impl IntoIterator<Item = V>) -> Filter {
    Filter::In {
        column: column.to_string(),
        values: values.into_iter().map(Into::into).collect(),
        negated: true,
    }
}

pub fn between(column: &str, low: impl Into<Value>, high: impl Into<Value>) -> Filter {
    Filter::Between {
        column: column.to_string(),
        low: low.into(),
        high: high.into(),
        negated: false,
    }
}

pub fn not_between(column: &str, low: impl Into<Value>, high: impl Into<Value>) -> Filter {
    Filter::Between {
        column: column.to_string(),
        low: low.into(),
        high: high.into(),
        negated: true,
    }
}

pub fn and(filters: Vec<Filter>) -> Filter {
    Filter::And(filters)
}

pub fn or(filters: Vec<Filter>) -> Filter {
    Filter::Or(filters)
}

pub fn not(filter: Filter) -> Filter {
    Filter::Not(Box::new(filter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_validation() {
        assert!(validate_identifier("full_name").is_ok());
        assert!(validate_identifier("_x1").is_ok());
        assert!(validate_identifier("1abc").is_err());
        assert!(validate_identifier("name; DROP TABLE users").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn test_nested_filter_validation() {
        let ok = and(vec![eq("email", "a@b.c"), not(or(vec![is_null("deleted_at")]))]);
        assert!(ok.validate().is_ok());

        let bad = and(vec![eq("email", "a@b.c"), like("name`--", "%x%")]);
        assert!(matches!(bad.validate(), Err(DbError::InvalidInput(_))));
    }

    #[test]
    fn test_and_also_without_other_keeps_filter() {
        let filter = eq("id", 1).and_also(None);
        assert_eq!(filter, eq("id", 1));
    }
}
