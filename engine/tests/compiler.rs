use geofilter::core::config::CacheConfig;
use geofilter::data::sql::PostgisDialect;
use geofilter::data::{CacheService, ExploredSelection, SelectionMode};
use geofilter::domain::compiler::{CompileTarget, SpatialOperand, compile, render_key};
use geofilter::domain::{
    DatasetDescriptor, FeatureKey, Filter, FilterChain, PrimaryKeyType, ProviderKind,
};

fn descriptor(key_type: PrimaryKeyType) -> DatasetDescriptor {
    DatasetDescriptor {
        dataset_id: "owners".to_string(),
        provider_kind: ProviderKind::FullSql,
        schema_name: "public".to_string(),
        table_name: "owners".to_string(),
        geometry_field: "geom".to_string(),
        primary_key_field: "owner_id".to_string(),
        primary_key_type: key_type,
        srid: 4326,
    }
}

fn compile_selection(payload: &str, key_type: PrimaryKeyType) -> String {
    let desc = descriptor(key_type);
    let mut chain = FilterChain::new("owners");
    chain.add(Filter::selection(payload));
    let target = CompileTarget::new(&desc, Some(&PostgisDialect));
    compile(&chain, &target, SpatialOperand::None).unwrap()
}

#[test]
fn test_key_literals_follow_key_type() {
    assert_eq!(
        compile_selection(r#"["O'Brien"]"#, PrimaryKeyType::Text),
        "(\"owner_id\" IN ('O''Brien'))"
    );
    assert_eq!(
        compile_selection("42", PrimaryKeyType::Integer),
        "(\"owner_id\" IN (42))"
    );
    assert_eq!(
        compile_selection("6F9619FF-8B86-D011-B42D-00CF4FC964FF", PrimaryKeyType::Uuid),
        "(\"owner_id\" IN ('6f9619ff-8b86-d011-b42d-00cf4fc964ff'))"
    );
}

#[test]
fn test_invalid_keys_rejected() {
    assert!(render_key("12a", PrimaryKeyType::Integer).is_err());
    assert!(render_key("not-a-uuid", PrimaryKeyType::Uuid).is_err());
}

#[test]
fn test_empty_chain_compiles_to_nothing() {
    let desc = descriptor(PrimaryKeyType::Integer);
    let chain = FilterChain::new("owners");
    let target = CompileTarget::new(&desc, Some(&PostgisDialect));
    assert_eq!(compile(&chain, &target, SpatialOperand::None).unwrap(), "");
}

#[test]
fn test_exploration_cache_round_trip() {
    let cache = CacheService::new(&CacheConfig::default()).unwrap();
    let selection = ExploredSelection {
        keys: vec![FeatureKey::Int(7), FeatureKey::Text("b".to_string())],
        expression: None,
    };
    cache.record_exploration("owners", SelectionMode::SingleFeature, selection.clone());

    let cached = cache.exploration("owners", SelectionMode::SingleFeature).unwrap();
    assert_eq!(*cached, selection);
    assert!(cache.exploration("owners", SelectionMode::MultipleFeatures).is_none());

    cache.invalidate_all();
    assert!(cache.exploration("owners", SelectionMode::SingleFeature).is_none());
}
