use std::io::Write;

use anyhow::{Context, Result};

use crate::model::{SearchOutcome, SearchResponse};

pub(super) fn write_json_response<W: Write>(
    output: &mut W,
    query: &str,
    table: &str,
    model_id: &str,
    limit: usize,
    outcome: &SearchOutcome,
) -> Result<()> {
    let response = SearchResponse {
        query,
        table,
        model_id,
        limit,
        rows_inserted: outcome.rows_inserted,
        returned: outcome.hits.len(),
        results: &outcome.hits,
    };

    serde_json::to_writer_pretty(&mut *output, &response)
        .context("failed to serialize search json output")?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}

pub(super) fn write_text_response<W: Write>(
    output: &mut W,
    query: &str,
    table: &str,
    model_id: &str,
    outcome: &SearchOutcome,
) -> Result<()> {
    writeln!(output, "Query: {query}")?;
    writeln!(
        output,
        "Table: {table} rows_inserted={} model={model_id}",
        outcome.rows_inserted
    )?;
    writeln!(output, "Results: {}", outcome.hits.len())?;

    for hit in &outcome.hits {
        writeln!(output, "{}.\tscore={:.6}", hit.rank, hit.score)?;
        writeln!(output, "\tdescription: {}", hit.description)?;
    }

    output.flush()?;
    Ok(())
}
