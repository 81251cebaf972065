//! Embedded SQL strategy: indexed scratch tables

use super::{Compiled, MaterializationRef, StrategyJob};
use crate::core::constants::TEMP_TABLE_PREFIX;
use crate::data::connector::DatasetHandle;
use crate::data::executor::SqlExecutor;
use crate::domain::compiler::{self, CompileTarget, SpatialOperand};
use crate::domain::error::EngineError;
use crate::utils::sql::quote_ident;

pub(super) fn build_expression(job: &StrategyJob<'_>) -> Result<Compiled, EngineError> {
    let executor = job.executor()?;
    let operand = match job.geometry {
        Some(geometry) => SpatialOperand::Prepared(geometry),
        None => SpatialOperand::None,
    };
    let target = CompileTarget::new(&job.handle.descriptor, Some(executor.backend().dialect()));
    Ok(Compiled::sql(compiler::compile(job.chain, &target, operand)?))
}

async fn drop_statements(executor: &dyn SqlExecutor, table: &str) {
    for sql in executor.backend().dialect().drop_table(table) {
        if let Err(e) = executor.execute(&sql).await {
            tracing::warn!(table = %table, error = %e, "Failed to drop scratch object");
        }
    }
}

pub(super) async fn materialize(
    job: &StrategyJob<'_>,
    compiled: &Compiled,
) -> Result<MaterializationRef, EngineError> {
    let executor = job.executor()?;
    let dialect = executor.backend().dialect();
    let desc = &job.handle.descriptor;
    let table = job.artifact_name(TEMP_TABLE_PREFIX);

    let mut select = format!(
        "SELECT {}, {} FROM {}",
        desc.quoted_primary_key(),
        desc.quoted_geometry_field(),
        desc.relation()
    );
    if !compiled.expression.is_empty() {
        select.push_str(" WHERE ");
        select.push_str(&compiled.expression);
    }

    // Leftovers of an earlier run with the same contents are replaced
    drop_statements(executor, &table).await;

    let mut statements = vec![dialect.create_table_as(&table, &select)];
    statements.extend(dialect.create_spatial_index(&table, &desc.geometry_field, desc.srid));

    if let Err(e) = executor.execute_all(&statements).await {
        tracing::warn!(dataset = %desc.dataset_id, table = %table, error = %e, "Scratch table failed, cleaning up");
        drop_statements(executor, &table).await;
        return Err(EngineError::materialization(&desc.dataset_id, e.to_string()));
    }

    tracing::debug!(dataset = %desc.dataset_id, table = %table, backend = %executor.backend(), "Scratch table ready");

    let subset = format!(
        "{} IN (SELECT {} FROM {})",
        desc.quoted_primary_key(),
        desc.quoted_primary_key(),
        quote_ident(&table)
    );
    Ok(MaterializationRef::TempTable { name: table, subset })
}

pub(super) async fn drop_table(handle: &DatasetHandle, table: &str) -> Result<(), EngineError> {
    if let Some(executor) = handle.sql.as_deref() {
        drop_statements(executor, table).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::BackendStrategy;
    use super::*;
    use crate::data::executor::RecordingExecutor;
    use crate::data::sql::SqlBackend;
    use crate::data::subset::MemorySubset;
    use crate::domain::dataset::ProviderKind;
    use crate::domain::filter::{Filter, FilterChain};

    fn setup(executor: Arc<RecordingExecutor>) -> (DatasetHandle, Arc<MemorySubset>) {
        let subset = Arc::new(MemorySubset::default());
        let mut handle =
            super::super::tests::handle(ProviderKind::EmbeddedSql, Arc::clone(&subset));
        handle.descriptor.schema_name.clear();
        handle.sql = Some(executor);
        (handle, subset)
    }

    #[tokio::test]
    async fn test_spatialite_table_and_index() {
        let executor = Arc::new(RecordingExecutor::new(SqlBackend::Spatialite));
        let (handle, subset) = setup(Arc::clone(&executor));
        let mut chain = FilterChain::new("roads");
        chain.add(Filter::selection("1,2"));
        let job = StrategyJob {
            handle: &handle,
            chain: &chain,
            geometry: None,
            scratch_schema: "geofilter",
        };

        let strategy = BackendStrategy::EmbeddedSql;
        let compiled = strategy.build_expression(&job).await.unwrap();
        let reference = strategy.materialize(&job, &compiled).await.unwrap();
        strategy.apply(&reference, &handle).await.unwrap();

        let statements = executor.statements();
        let create = statements
            .iter()
            .find(|s| s.starts_with("CREATE TABLE"))
            .unwrap();
        assert!(create.contains("\"geofilter_tmp_"));
        assert!(create.ends_with("FROM \"roads\" WHERE (\"id\" IN (1,2))"));
        assert!(statements.iter().any(|s| s.starts_with("SELECT CreateSpatialIndex(")));
        assert!(subset.applied()[0].starts_with("\"id\" IN (SELECT \"id\" FROM \"geofilter_tmp_"));
    }

    #[tokio::test]
    async fn test_failure_drops_partial_table() {
        let executor =
            Arc::new(RecordingExecutor::new(SqlBackend::Duckdb).fail_on("USING RTREE"));
        let (handle, subset) = setup(Arc::clone(&executor));
        let chain = FilterChain::new("roads");
        let job = StrategyJob {
            handle: &handle,
            chain: &chain,
            geometry: None,
            scratch_schema: "geofilter",
        };

        let strategy = BackendStrategy::EmbeddedSql;
        let compiled = strategy.build_expression(&job).await.unwrap();
        let err = strategy.materialize(&job, &compiled).await.unwrap_err();
        assert!(err.is_materialization());
        let last = executor.statements().pop().unwrap();
        assert!(last.starts_with("DROP TABLE IF EXISTS \"geofilter_tmp_"));
        assert!(subset.applied().is_empty());
    }

    #[tokio::test]
    async fn test_missing_executor_is_metadata_error() {
        let subset = Arc::new(MemorySubset::default());
        let handle = super::super::tests::handle(ProviderKind::EmbeddedSql, subset);
        let chain = FilterChain::new("roads");
        let job = StrategyJob {
            handle: &handle,
            chain: &chain,
            geometry: None,
            scratch_schema: "geofilter",
        };
        let err = BackendStrategy::EmbeddedSql.build_expression(&job).await.unwrap_err();
        assert!(matches!(err, EngineError::DatasetMetadata { .. }));
    }
}
