//! Dataset identity and provider capability tiers

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::utils::sql::{qualified_table, quote_ident};

/// Capability tier of a dataset's storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Full spatial SQL server (PostGIS)
    FullSql,
    /// Embedded SQL engine (Spatialite, DuckDB spatial)
    EmbeddedSql,
    /// File-based reader without SQL capability
    GenericReader,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::FullSql => "full_sql",
            ProviderKind::EmbeddedSql => "embedded_sql",
            ProviderKind::GenericReader => "generic_reader",
        }
    }

    /// Decimal places used when a buffer distance is rendered for this tier.
    /// `None` keeps full floating point precision.
    pub fn distance_precision(&self) -> Option<usize> {
        match self {
            ProviderKind::FullSql | ProviderKind::EmbeddedSql => Some(6),
            ProviderKind::GenericReader => None,
        }
    }

    /// Next tier down the degradation path
    pub fn degraded(&self) -> Option<ProviderKind> {
        match self {
            ProviderKind::FullSql => Some(ProviderKind::EmbeddedSql),
            ProviderKind::EmbeddedSql => Some(ProviderKind::GenericReader),
            ProviderKind::GenericReader => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Primary key column type; governs literal quoting in compiled expressions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryKeyType {
    #[default]
    Integer,
    Text,
    Uuid,
}

/// Feature identifier as read from a dataset
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FeatureKey {
    Int(i64),
    Text(String),
}

impl fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureKey::Int(v) => write!(f, "{}", v),
            FeatureKey::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for FeatureKey {
    fn from(value: i64) -> Self {
        FeatureKey::Int(value)
    }
}

impl From<&str> for FeatureKey {
    fn from(value: &str) -> Self {
        FeatureKey::Text(value.to_string())
    }
}

impl From<String> for FeatureKey {
    fn from(value: String) -> Self {
        FeatureKey::Text(value)
    }
}

/// Identifies a target (or source) dataset registered with the engine
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct DatasetDescriptor {
    pub dataset_id: String,
    pub provider_kind: ProviderKind,
    #[serde(default)]
    pub schema_name: String,
    pub table_name: String,
    pub geometry_field: String,
    pub primary_key_field: String,
    #[serde(default)]
    pub primary_key_type: PrimaryKeyType,
    /// EPSG code of the dataset's coordinate reference system
    pub srid: u32,
}

impl DatasetDescriptor {
    /// Schema-qualified, quoted relation name
    pub fn relation(&self) -> String {
        qualified_table(&self.schema_name, &self.table_name)
    }

    pub fn quoted_geometry_field(&self) -> String {
        quote_ident(&self.geometry_field)
    }

    pub fn quoted_primary_key(&self) -> String {
        quote_ident(&self.primary_key_field)
    }

    /// Copy of this descriptor processed under a different provider tier
    pub fn with_provider_kind(&self, kind: ProviderKind) -> Self {
        Self {
            provider_kind: kind,
            ..self.clone()
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_serde() {
        let kind: ProviderKind = serde_json::from_str("\"embedded_sql\"").unwrap();
        assert_eq!(kind, ProviderKind::EmbeddedSql);
        assert_eq!(
            serde_json::to_string(&ProviderKind::GenericReader).unwrap(),
            "\"generic_reader\""
        );
    }

    #[test]
    fn test_degradation_path() {
        assert_eq!(ProviderKind::FullSql.degraded(), Some(ProviderKind::EmbeddedSql));
        assert_eq!(
            ProviderKind::EmbeddedSql.degraded(),
            Some(ProviderKind::GenericReader)
        );
        assert_eq!(ProviderKind::GenericReader.degraded(), None);
    }

    #[test]
    fn test_feature_key_untagged() {
        let keys: Vec<FeatureKey> = serde_json::from_str(r#"[1, "a"]"#).unwrap();
        assert_eq!(keys, vec![FeatureKey::Int(1), FeatureKey::Text("a".into())]);
    }

    #[test]
    fn test_relation_quoting() {
        let d = fixtures::descriptor("roads", ProviderKind::FullSql);
        assert_eq!(d.relation(), "\"public\".\"roads\"");
        assert_eq!(d.quoted_primary_key(), "\"id\"");
    }

    #[test]
    fn test_descriptor_defaults() {
        let json = r#"{
            "dataset_id": "parcels",
            "provider_kind": "generic_reader",
            "table_name": "parcels",
            "geometry_field": "geometry",
            "primary_key_field": "fid",
            "srid": 4326
        }"#;
        let d: DatasetDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(d.primary_key_type, PrimaryKeyType::Integer);
        assert_eq!(d.relation(), "\"parcels\"");
    }
}
