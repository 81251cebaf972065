//! Filter chain JSON parsing and validation

use super::chain::FilterChain;
use super::types::{Filter, FilterKind};
use crate::core::constants::{MAX_CHAIN_JSON_SIZE, MAX_FILTERS_PER_CHAIN, MAX_FILTER_PAYLOAD_SIZE};
use crate::domain::error::EngineError;

/// Parse a filter chain from JSON with size and count limits.
///
/// Accepts either a full chain object (`{"dataset_id": ..., "filters": [...]}`)
/// or a bare filter array, in which case `dataset_id` names the owner.
pub fn parse_chain(json_str: &str, dataset_id: &str) -> Result<FilterChain, EngineError> {
    if json_str.len() > MAX_CHAIN_JSON_SIZE {
        return Err(EngineError::invalid(format!(
            "Filter chain JSON exceeds maximum size of {} bytes",
            MAX_CHAIN_JSON_SIZE
        )));
    }

    let trimmed = json_str.trim_start();
    let mut chain = if trimmed.starts_with('[') {
        let filters: Vec<Filter> = serde_json::from_str(trimmed)
            .map_err(|e| EngineError::invalid(format!("invalid filter JSON: {}", e)))?;
        let mut chain = FilterChain::new(dataset_id);
        for filter in filters {
            chain.add(filter);
        }
        chain
    } else {
        let mut chain: FilterChain = serde_json::from_str(trimmed)
            .map_err(|e| EngineError::invalid(format!("invalid filter chain JSON: {}", e)))?;
        chain.normalize_ids();
        chain
    };

    if chain.dataset_id.is_empty() {
        chain.dataset_id = dataset_id.to_string();
    }

    validate_chain(&chain)?;
    Ok(chain)
}

/// Validate filter count, payload sizes and kind-specific payload shape
pub fn validate_chain(chain: &FilterChain) -> Result<(), EngineError> {
    if chain.len() > MAX_FILTERS_PER_CHAIN {
        return Err(EngineError::invalid(format!(
            "Maximum {} filters allowed per chain",
            MAX_FILTERS_PER_CHAIN
        )));
    }

    for filter in chain.filters() {
        if filter.payload.len() > MAX_FILTER_PAYLOAD_SIZE {
            return Err(EngineError::invalid(format!(
                "Filter {} payload exceeds {} bytes",
                filter.id, MAX_FILTER_PAYLOAD_SIZE
            )));
        }
        match filter.kind {
            FilterKind::BufferIntersect => {
                filter.predicates()?;
            }
            FilterKind::SpatialSelection => {
                filter.selected_ids()?;
            }
            FilterKind::CustomExpression | FilterKind::AttributeExpression => {
                if filter.payload.trim().is_empty() {
                    return Err(EngineError::syntax(format!(
                        "filter {} has an empty expression",
                        filter.id
                    )));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::ErrorKind;

    #[test]
    fn parse_chain_bare_array() {
        let json = r#"[
            {"kind": "custom_expression", "payload": "\"status\" = 'active'", "priority": 2},
            {"kind": "spatial_selection", "payload": "[1,2,3]", "priority": 1}
        ]"#;
        let chain = parse_chain(json, "parcels").unwrap();
        assert_eq!(chain.dataset_id, "parcels");
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn parse_chain_object() {
        let json = r#"{"dataset_id": "roads", "filters": [
            {"kind": "buffer_intersect", "payload": "intersects"}
        ]}"#;
        let chain = parse_chain(json, "ignored").unwrap();
        assert_eq!(chain.dataset_id, "roads");
    }

    #[test]
    fn parse_chain_invalid_json() {
        let err = parse_chain("not json", "roads").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[test]
    fn parse_chain_unknown_predicate() {
        let json = r#"[{"kind": "buffer_intersect", "payload": "adjacent"}]"#;
        let err = parse_chain(json, "roads").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExpressionSyntax);
    }

    #[test]
    fn parse_chain_too_large() {
        let json = " ".repeat(MAX_CHAIN_JSON_SIZE + 1);
        assert!(parse_chain(&json, "roads").is_err());
    }

    #[test]
    fn parse_chain_too_many_filters() {
        let one = r#"{"kind": "custom_expression", "payload": "1=1"}"#;
        let json = format!("[{}]", vec![one; MAX_FILTERS_PER_CHAIN + 1].join(","));
        assert!(parse_chain(&json, "roads").is_err());
    }

    #[test]
    fn parse_chain_empty_expression() {
        let json = r#"[{"kind": "attribute_expression", "payload": "  "}]"#;
        assert!(parse_chain(json, "roads").is_err());
    }
}
