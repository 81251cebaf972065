//! Filter type definitions

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::error::EngineError;

/// Chain-local filter identifier, assigned on insertion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct FilterId(pub u32);

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    /// Payload: feature ids selected on the source dataset
    SpatialSelection,
    /// Payload: spatial predicate names tested against the prepared geometry
    BufferIntersect,
    /// Payload: free-form boolean expression
    CustomExpression,
    /// Payload: attribute comparison expression
    AttributeExpression,
}

impl FilterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterKind::SpatialSelection => "spatial_selection",
            FilterKind::BufferIntersect => "buffer_intersect",
            FilterKind::CustomExpression => "custom_expression",
            FilterKind::AttributeExpression => "attribute_expression",
        }
    }

    /// Whether filters of this kind need a prepared source geometry
    pub fn is_spatial(&self) -> bool {
        matches!(self, FilterKind::BufferIntersect)
    }
}

/// How a filter joins the expression accumulated so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineOp {
    #[default]
    And,
    Or,
    AndNot,
}

impl CombineOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            CombineOp::And => "AND",
            CombineOp::Or => "OR",
            CombineOp::AndNot => "AND NOT",
        }
    }
}

/// Binary spatial relation between a target geometry and the reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpatialPredicate {
    Intersects,
    Contains,
    Within,
    Touches,
    Overlaps,
    Crosses,
    Covers,
    CoveredBy,
}

impl SpatialPredicate {
    pub const ALL: [SpatialPredicate; 8] = [
        SpatialPredicate::Intersects,
        SpatialPredicate::Contains,
        SpatialPredicate::Within,
        SpatialPredicate::Touches,
        SpatialPredicate::Overlaps,
        SpatialPredicate::Crosses,
        SpatialPredicate::Covers,
        SpatialPredicate::CoveredBy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SpatialPredicate::Intersects => "intersects",
            SpatialPredicate::Contains => "contains",
            SpatialPredicate::Within => "within",
            SpatialPredicate::Touches => "touches",
            SpatialPredicate::Overlaps => "overlaps",
            SpatialPredicate::Crosses => "crosses",
            SpatialPredicate::Covers => "covers",
            SpatialPredicate::CoveredBy => "coveredby",
        }
    }

    pub fn sql_function(&self) -> &'static str {
        match self {
            SpatialPredicate::Intersects => "ST_Intersects",
            SpatialPredicate::Contains => "ST_Contains",
            SpatialPredicate::Within => "ST_Within",
            SpatialPredicate::Touches => "ST_Touches",
            SpatialPredicate::Overlaps => "ST_Overlaps",
            SpatialPredicate::Crosses => "ST_Crosses",
            SpatialPredicate::Covers => "ST_Covers",
            SpatialPredicate::CoveredBy => "ST_CoveredBy",
        }
    }

    /// Parse a predicate name. Accepts `ST_` prefixes, any case, and
    /// `covered-by` / `covered_by` spellings.
    pub fn parse(name: &str) -> Option<Self> {
        let normalized: String = name
            .trim()
            .to_ascii_lowercase()
            .trim_start_matches("st_")
            .chars()
            .filter(|c| *c != '-' && *c != '_' && *c != ' ')
            .collect();
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == normalized)
    }
}

/// A single predicate unit of a filter chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Filter {
    #[serde(default)]
    pub id: FilterId,
    pub kind: FilterKind,
    pub payload: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub combine: CombineOp,
}

fn default_enabled() -> bool {
    true
}

impl Filter {
    pub fn new(kind: FilterKind, payload: impl Into<String>) -> Self {
        Self {
            id: FilterId::default(),
            kind,
            payload: payload.into(),
            priority: 0,
            enabled: true,
            combine: CombineOp::And,
        }
    }

    pub fn selection(payload: impl Into<String>) -> Self {
        Self::new(FilterKind::SpatialSelection, payload)
    }

    pub fn buffer_intersect(payload: impl Into<String>) -> Self {
        Self::new(FilterKind::BufferIntersect, payload)
    }

    pub fn custom(payload: impl Into<String>) -> Self {
        Self::new(FilterKind::CustomExpression, payload)
    }

    pub fn attribute(payload: impl Into<String>) -> Self {
        Self::new(FilterKind::AttributeExpression, payload)
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_combine(mut self, combine: CombineOp) -> Self {
        self.combine = combine;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Predicate names of a `BufferIntersect` payload
    pub fn predicates(&self) -> Result<Vec<SpatialPredicate>, EngineError> {
        let names = parse_list(&self.payload)?;
        if names.is_empty() {
            return Err(EngineError::syntax(format!(
                "filter {} lists no spatial predicates",
                self.id
            )));
        }
        let mut predicates = Vec::with_capacity(names.len());
        for name in names {
            let predicate = SpatialPredicate::parse(&name).ok_or_else(|| {
                EngineError::syntax(format!("unknown spatial predicate: {}", name))
            })?;
            if !predicates.contains(&predicate) {
                predicates.push(predicate);
            }
        }
        Ok(predicates)
    }

    /// Raw feature id tokens of a `SpatialSelection` payload
    pub fn selected_ids(&self) -> Result<Vec<String>, EngineError> {
        parse_list(&self.payload)
    }
}

/// Parse a list payload: a JSON array of strings/numbers, else a comma list.
pub fn parse_list(payload: &str) -> Result<Vec<String>, EngineError> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if trimmed.starts_with('[') {
        let values: Vec<serde_json::Value> = serde_json::from_str(trimmed)
            .map_err(|e| EngineError::syntax(format!("invalid list payload: {}", e)))?;
        return values
            .into_iter()
            .map(|v| match v {
                serde_json::Value::String(s) => Ok(s),
                serde_json::Value::Number(n) => Ok(n.to_string()),
                other => Err(EngineError::syntax(format!(
                    "unsupported list element: {}",
                    other
                ))),
            })
            .collect();
    }

    Ok(trimmed
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_json() {
        assert_eq!(parse_list("[1, 2, \"x\"]").unwrap(), vec!["1", "2", "x"]);
    }

    #[test]
    fn test_parse_list_comma() {
        assert_eq!(parse_list(" 1, 2 ,,3 ").unwrap(), vec!["1", "2", "3"]);
        assert!(parse_list("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_list_rejects_nested() {
        assert!(parse_list("[[1]]").is_err());
        assert!(parse_list("[1,").is_err());
    }

    #[test]
    fn test_predicate_parse_variants() {
        assert_eq!(SpatialPredicate::parse("ST_Intersects"), Some(SpatialPredicate::Intersects));
        assert_eq!(SpatialPredicate::parse("covered-by"), Some(SpatialPredicate::CoveredBy));
        assert_eq!(SpatialPredicate::parse("Covered_By"), Some(SpatialPredicate::CoveredBy));
        assert_eq!(SpatialPredicate::parse("near"), None);
    }

    #[test]
    fn test_filter_predicates_dedup() {
        let f = Filter::buffer_intersect("intersects, within, INTERSECTS");
        assert_eq!(
            f.predicates().unwrap(),
            vec![SpatialPredicate::Intersects, SpatialPredicate::Within]
        );
    }

    #[test]
    fn test_filter_predicates_unknown() {
        let f = Filter::buffer_intersect("[\"intersects\", \"nearby\"]");
        let err = f.predicates().unwrap_err();
        assert!(err.to_string().contains("nearby"));
    }

    #[test]
    fn test_filter_defaults_from_json() {
        let f: Filter =
            serde_json::from_str(r#"{"kind": "custom_expression", "payload": "\"a\" > 1"}"#)
                .unwrap();
        assert!(f.enabled);
        assert_eq!(f.combine, CombineOp::And);
        assert_eq!(f.priority, 0);
    }
}
