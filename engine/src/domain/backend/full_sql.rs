//! Full SQL strategy: materialized views in a scratch schema

use super::{Compiled, MaterializationRef, StrategyJob};
use crate::core::constants::MATERIALIZED_VIEW_PREFIX;
use crate::data::connector::DatasetHandle;
use crate::data::sql::{PostgisDialect, SqlBackend};
use crate::domain::compiler::{self, CompileTarget, SpatialOperand};
use crate::domain::error::EngineError;
use crate::utils::sql::qualified_table;

fn require_postgis(job: &StrategyJob<'_>) -> Result<(), EngineError> {
    let executor = job.executor()?;
    if executor.backend() != SqlBackend::Postgis {
        return Err(EngineError::metadata(
            &job.handle.descriptor.dataset_id,
            format!(
                "full SQL datasets need a postgis executor, found {}",
                executor.backend()
            ),
        ));
    }
    Ok(())
}

pub(super) fn build_expression(job: &StrategyJob<'_>) -> Result<Compiled, EngineError> {
    require_postgis(job)?;
    let operand = match job.geometry {
        Some(geometry) => SpatialOperand::Prepared(geometry),
        None => SpatialOperand::None,
    };
    let target = CompileTarget::new(&job.handle.descriptor, Some(&PostgisDialect));
    Ok(Compiled::sql(compiler::compile(job.chain, &target, operand)?))
}

pub(super) async fn materialize(
    job: &StrategyJob<'_>,
    compiled: &Compiled,
) -> Result<MaterializationRef, EngineError> {
    require_postgis(job)?;
    let executor = job.executor()?;
    let desc = &job.handle.descriptor;
    let dialect = PostgisDialect;
    let view = job.artifact_name(MATERIALIZED_VIEW_PREFIX);
    let schema = job.scratch_schema;

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

    // Identical contents map to the same view name, so an existing view only
    // needs a refresh
    let statements = vec![
        dialect.create_schema(schema),
        dialect.create_materialized_view(schema, &view, &select),
        dialect.create_gist_index(schema, &view, &desc.geometry_field),
        dialect.refresh_materialized_view(schema, &view),
    ];

    if let Err(e) = executor.execute_all(&statements).await {
        tracing::warn!(dataset = %desc.dataset_id, view = %view, error = %e, "Materialized view failed, dropping");
        if let Err(drop_err) = executor
            .execute(&dialect.drop_materialized_view(schema, &view))
            .await
        {
            tracing::warn!(view = %view, error = %drop_err, "Failed to drop partial view");
        }
        return Err(EngineError::materialization(&desc.dataset_id, e.to_string()));
    }

    tracing::debug!(dataset = %desc.dataset_id, schema = %schema, view = %view, "Materialized view ready");

    let subset = format!(
        "{} IN (SELECT {} FROM {})",
        desc.quoted_primary_key(),
        desc.quoted_primary_key(),
        qualified_table(schema, &view)
    );
    Ok(MaterializationRef::MaterializedView {
        schema: schema.to_string(),
        name: view,
        subset,
    })
}

pub(super) async fn drop_view(handle: &DatasetHandle, schema: &str, view: &str) -> Result<(), EngineError> {
    let Some(executor) = handle.sql.as_deref() else {
        return Ok(());
    };
    executor
        .execute(&PostgisDialect.drop_materialized_view(schema, view))
        .await
        .map_err(|e| EngineError::materialization(&handle.descriptor.dataset_id, e.to_string()))
}
