//! Primary key literal rendering

use std::collections::HashSet;

use crate::domain::dataset::{FeatureKey, PrimaryKeyType};
use crate::domain::error::EngineError;
use crate::utils::sql::quote_literal;

/// Predicate matching nothing, used for empty selections
pub const EMPTY_SELECTION: &str = "1=0";

/// Render one raw key value as an SQL literal for the given key type.
///
/// Integers are validated and left unquoted. Text is single-quoted with
/// embedded quotes doubled. UUIDs are validated, normalized to the lowercase
/// hyphenated form and quoted.
pub fn render_key(raw: &str, key_type: PrimaryKeyType) -> Result<String, EngineError> {
    match key_type {
        PrimaryKeyType::Integer => {
            let value = raw.trim().parse::<i64>().map_err(|_| {
                EngineError::syntax(format!("invalid integer key: {}", raw))
            })?;
            Ok(value.to_string())
        }
        PrimaryKeyType::Text => Ok(quote_literal(raw)),
        PrimaryKeyType::Uuid => {
            let id = uuid::Uuid::parse_str(raw.trim())
                .map_err(|_| EngineError::syntax(format!("invalid UUID key: {}", raw)))?;
            Ok(quote_literal(&id.hyphenated().to_string()))
        }
    }
}

pub fn render_feature_key(key: &FeatureKey, key_type: PrimaryKeyType) -> Result<String, EngineError> {
    match (key, key_type) {
        (FeatureKey::Int(v), PrimaryKeyType::Integer) => Ok(v.to_string()),
        (FeatureKey::Int(v), _) => render_key(&v.to_string(), key_type),
        (FeatureKey::Text(v), _) => render_key(v, key_type),
    }
}

/// `column IN (a,b,c)`, or [`EMPTY_SELECTION`] when there are no values
pub fn in_list(column: &str, literals: &[String]) -> String {
    if literals.is_empty() {
        return EMPTY_SELECTION.to_string();
    }
    format!("{} IN ({})", column, literals.join(","))
}

/// Render a key list against `column`, dropping duplicates and keeping
/// first-seen order
pub fn key_list<'a>(
    column: &str,
    keys: impl IntoIterator<Item = &'a FeatureKey>,
    key_type: PrimaryKeyType,
) -> Result<String, EngineError> {
    let literals = keys
        .into_iter()
        .map(|key| render_feature_key(key, key_type))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(in_list(column, &dedup_literals(literals)))
}

/// Distinct literals in first-seen order
pub fn dedup_literals(literals: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    literals
        .into_iter()
        .filter(|literal| seen.insert(literal.clone()))
        .collect()
}
