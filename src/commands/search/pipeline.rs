use std::path::Path;

use anyhow::{Context, Result, bail};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::dataset::load_descriptions;
use crate::embedder::Embedder;
use crate::model::SearchOutcome;
use crate::semantic::format_vector_literal;
use crate::store::VectorTable;

pub(super) struct SearchPlan<'a> {
    pub(super) query: &'a str,
    pub(super) csv_path: &'a Path,
    pub(super) column: &'a str,
    pub(super) limit: usize,
    pub(super) drop_existing: bool,
}

/// Runs the whole search in one transaction. `report` sees the outcome
/// before commit; any error from the pipeline or from `report` rolls
/// everything back, including the table creation.
pub(super) fn search_in_transaction<F>(
    connection: &mut Connection,
    table: &VectorTable,
    embedder: &mut dyn Embedder,
    plan: &SearchPlan<'_>,
    report: F,
) -> Result<SearchOutcome>
where
    F: FnOnce(&SearchOutcome) -> Result<()>,
{
    let tx = connection
        .transaction()
        .context("failed to begin search transaction")?;

    let result = execute_search(&tx, table, embedder, plan).and_then(|outcome| {
        report(&outcome)?;
        Ok(outcome)
    });

    match result {
        Ok(outcome) => {
            tx.commit().context("failed to commit search transaction")?;
            info!(
                table = %table.name(),
                rows_inserted = outcome.rows_inserted,
                returned = outcome.hits.len(),
                "search transaction committed"
            );
            Ok(outcome)
        }
        Err(err) => {
            match tx.rollback() {
                Ok(()) => warn!(table = %table.name(), error = %err, "search transaction rolled back"),
                Err(rollback_err) => warn!(
                    table = %table.name(),
                    error = %err,
                    rollback_error = %rollback_err,
                    "search transaction rollback failed"
                ),
            }
            Err(err)
        }
    }
}

pub(super) fn execute_search(
    connection: &Connection,
    table: &VectorTable,
    embedder: &mut dyn Embedder,
    plan: &SearchPlan<'_>,
) -> Result<SearchOutcome> {
    if plan.drop_existing {
        table.drop_if_exists(connection)?;
    }
    table.create(connection)?;
    info!(table = %table.name(), dimensions = table.dimensions(), "created vector table");

    let loaded = load_descriptions(plan.csv_path, plan.column)?;
    let descriptions = loaded.descriptions;
    let rows_loaded = descriptions.len();
    info!(
        path = %plan.csv_path.display(),
        source_sha256 = %loaded.sha256,
        rows = rows_loaded,
        "loaded descriptions"
    );

    let vectors = embedder
        .embed_batch(&descriptions)
        .context("failed to embed descriptions")?;
    if vectors.len() != rows_loaded {
        bail!(
            "embedding backend returned {} vectors for {} rows",
            vectors.len(),
            rows_loaded
        );
    }

    let mut rows_inserted = 0usize;
    for (index, (description, vector)) in descriptions.iter().zip(&vectors).enumerate() {
        let literal = format_vector_literal(vector);
        let inserted = table
            .insert(connection, description, &literal)
            .with_context(|| format!("failed to insert row {index} into {}", table.name()))?;
        rows_inserted += inserted;
        debug!(row = index, inserted, "inserted description row");
    }
    info!(table = %table.name(), rows_inserted, "inserted description rows");

    let query_vector = embedder
        .embed_query(plan.query)
        .context("failed to embed search query")?;
    let hits = table.nearest(connection, &format_vector_literal(&query_vector), plan.limit)?;

    Ok(SearchOutcome {
        source_sha256: loaded.sha256,
        rows_loaded,
        rows_inserted,
        hits,
    })
}
