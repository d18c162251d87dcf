//! Column mapping from staged upload rows to units.
//!
//! An import definition maps *target fields* to *source columns* of the
//! uploaded file:
//!
//! ```json
//! { "ident": "orgnr", "name": "navn", "parent_ident": "overordnet", "attr.sector": "sektor" }
//! ```
//!
//! Target fields are `ident`, `name`, `parent_ident`, `valid_from`,
//! `valid_to`, and free-form `attr.<name>` attributes stored as JSON.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

pub const FIELD_IDENT: &str = "ident";
pub const FIELD_NAME: &str = "name";
pub const FIELD_PARENT_IDENT: &str = "parent_ident";
pub const FIELD_VALID_FROM: &str = "valid_from";
pub const FIELD_VALID_TO: &str = "valid_to";

/// Prefix for attribute targets (`attr.<name>`).
pub const ATTRIBUTE_PREFIX: &str = "attr.";

/// Targets every mapping must provide.
pub const REQUIRED_FIELDS: &[&str] = &[FIELD_IDENT, FIELD_NAME];

/// Non-attribute targets a mapping may use.
pub const KNOWN_FIELDS: &[&str] = &[
    FIELD_IDENT,
    FIELD_NAME,
    FIELD_PARENT_IDENT,
    FIELD_VALID_FROM,
    FIELD_VALID_TO,
];

/// Source values meaning "no end date".
const OPEN_ENDED: &[&str] = &["", "infinity"];

/// Target field -> source column.
pub type ImportMapping = BTreeMap<String, String>;

/// Parse and validate a mapping stored as JSON.
pub fn parse_mapping(value: &serde_json::Value) -> Result<ImportMapping, CoreError> {
    let mapping: ImportMapping = serde_json::from_value(value.clone()).map_err(|e| {
        CoreError::Validation(format!("Mapping must be an object of strings: {e}"))
    })?;
    validate_mapping(&mapping)?;
    Ok(mapping)
}

/// Check that required targets are present, every target is known, and no
/// source column is blank.
pub fn validate_mapping(mapping: &ImportMapping) -> Result<(), CoreError> {
    for required in REQUIRED_FIELDS {
        if !mapping.contains_key(*required) {
            return Err(CoreError::Validation(format!(
                "Mapping is missing required field '{required}'"
            )));
        }
    }
    for (target, source) in mapping {
        let is_attribute = target
            .strip_prefix(ATTRIBUTE_PREFIX)
            .is_some_and(|name| !name.is_empty());
        if !is_attribute && !KNOWN_FIELDS.contains(&target.as_str()) {
            return Err(CoreError::Validation(format!(
                "Mapping targets unknown field '{target}'"
            )));
        }
        if source.trim().is_empty() {
            return Err(CoreError::Validation(format!(
                "Mapping for '{target}' has an empty source column"
            )));
        }
    }
    Ok(())
}

/// A unit ready to be written, produced from one staged row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitRecord {
    pub ident: String,
    pub name: String,
    pub parent_ident: Option<String>,
    pub valid_from: NaiveDate,
    pub valid_to: Option<NaiveDate>,
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// Why a staged row could not be converted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowError {
    #[error("row is not a JSON object")]
    NotAnObject,

    #[error("required column '{column}' (for {field}) is missing or empty")]
    MissingValue { field: &'static str, column: String },

    #[error("column '{column}' has invalid date '{value}' (expected YYYY-MM-DD)")]
    InvalidDate { column: String, value: String },

    #[error("valid_to {valid_to} is before valid_from {valid_from}")]
    InvalidWindow {
        valid_from: NaiveDate,
        valid_to: NaiveDate,
    },

    #[error("unit '{ident}' cannot be its own parent")]
    SelfParent { ident: String },
}

/// Default validity window applied when a row has no dates of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityWindow {
    pub valid_from: NaiveDate,
    pub valid_to: Option<NaiveDate>,
}

/// Convert one staged row into a [`UnitRecord`].
pub fn map_row(
    mapping: &ImportMapping,
    row: &serde_json::Value,
    defaults: ValidityWindow,
) -> Result<UnitRecord, RowError> {
    let object = row.as_object().ok_or(RowError::NotAnObject)?;

    let ident = required_text(mapping, object, FIELD_IDENT)?;
    let name = required_text(mapping, object, FIELD_NAME)?;
    let parent_ident = optional_text(mapping, object, FIELD_PARENT_IDENT);

    let valid_from = match mapping.get(FIELD_VALID_FROM) {
        Some(column) => match cell_text(object, column) {
            Some(text) => parse_date(column, &text)?,
            None => defaults.valid_from,
        },
        None => defaults.valid_from,
    };
    let valid_to = match mapping.get(FIELD_VALID_TO) {
        Some(column) => match cell_text(object, column) {
            Some(text) if OPEN_ENDED.contains(&text.to_ascii_lowercase().as_str()) => None,
            Some(text) => Some(parse_date(column, &text)?),
            None => defaults.valid_to,
        },
        None => defaults.valid_to,
    };
    if let Some(to) = valid_to {
        if to < valid_from {
            return Err(RowError::InvalidWindow {
                valid_from,
                valid_to: to,
            });
        }
    }
    if parent_ident.as_deref() == Some(ident.as_str()) {
        return Err(RowError::SelfParent { ident });
    }

    let mut attributes = serde_json::Map::new();
    for (target, column) in mapping {
        if let Some(attr) = target.strip_prefix(ATTRIBUTE_PREFIX) {
            if let Some(value) = object.get(column) {
                if !value.is_null() {
                    attributes.insert(attr.to_string(), value.clone());
                }
            }
        }
    }

    Ok(UnitRecord {
        ident,
        name,
        parent_ident,
        valid_from,
        valid_to,
        attributes,
    })
}

/// Reorder `(row_no, unit)` pairs so a unit whose parent appears in the same
/// slice comes after that parent. Otherwise row order is kept. Units caught
/// in a parent cycle keep their relative order at the end.
pub fn order_parents_first(mut rows: Vec<(i32, UnitRecord)>) -> Vec<(i32, UnitRecord)> {
    let mut ordered = Vec::with_capacity(rows.len());
    while !rows.is_empty() {
        let pending: HashSet<String> = rows.iter().map(|(_, u)| u.ident.clone()).collect();
        let (ready, blocked): (Vec<_>, Vec<_>) = rows.into_iter().partition(|(_, u)| {
            u.parent_ident
                .as_ref()
                .is_none_or(|parent| !pending.contains(parent))
        });
        if ready.is_empty() {
            ordered.extend(blocked);
            break;
        }
        ordered.extend(ready);
        rows = blocked;
    }
    ordered
}

fn required_text(
    mapping: &ImportMapping,
    object: &serde_json::Map<String, serde_json::Value>,
    field: &'static str,
) -> Result<String, RowError> {
    let column = mapping.get(field).map(String::as_str).unwrap_or(field);
    cell_text(object, column).ok_or_else(|| RowError::MissingValue {
        field,
        column: column.to_string(),
    })
}

fn optional_text(
    mapping: &ImportMapping,
    object: &serde_json::Map<String, serde_json::Value>,
    field: &str,
) -> Option<String> {
    mapping.get(field).and_then(|column| cell_text(object, column))
}

/// Trimmed textual value of a cell; numbers are rendered, blanks are `None`.
fn cell_text(object: &serde_json::Map<String, serde_json::Value>, column: &str) -> Option<String> {
    let text = match object.get(column)? {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn parse_date(column: &str, text: &str) -> Result<NaiveDate, RowError> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|_| RowError::InvalidDate {
        column: column.to_string(),
        value: text.to_string(),
    })
}
