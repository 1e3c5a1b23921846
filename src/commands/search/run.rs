use std::io;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::cli::{SearchArgs, resolve_db_path};
use crate::embedder::build_embedder;
use crate::model::{SearchOutcome, SearchRunManifest};
use crate::store::{VectorTable, open_store};
use crate::util::{now_utc_string, utc_compact_string, write_json_pretty};

use super::output::{write_json_response, write_text_response};
use super::pipeline::{SearchPlan, search_in_transaction};

pub fn run(args: SearchArgs) -> Result<()> {
    let started_at = now_utc_string();
    let started = Instant::now();
    let run_id = format!("search-{}", utc_compact_string(Utc::now()));

    let mut embedder = build_embedder(args.backend, args.model_id.as_deref())?;
    let model = embedder.model().clone();
    let table = VectorTable::new(&args.table, model.dimensions)?;
    let db_path = resolve_db_path(&args.cache_root, args.db_path.as_ref());

    info!(
        run_id = %run_id,
        query = %args.query,
        csv_path = %args.csv_path.display(),
        db_path = %db_path.display(),
        table = %table.name(),
        model_id = %model.model_id,
        backend = %model.backend,
        "starting search"
    );

    let plan = SearchPlan {
        query: &args.query,
        csv_path: &args.csv_path,
        column: &args.column,
        limit: args.limit,
        drop_existing: args.drop_existing,
    };

    let mut connection = open_store(&db_path)?;
    let result = search_in_transaction(
        &mut connection,
        &table,
        &mut *embedder,
        &plan,
        |outcome| {
            let mut output = io::BufWriter::new(io::stdout().lock());
            if args.json {
                write_json_response(
                    &mut output,
                    &args.query,
                    table.name(),
                    &model.model_id,
                    args.limit,
                    outcome,
                )
            } else {
                write_text_response(
                    &mut output,
                    &args.query,
                    table.name(),
                    &model.model_id,
                    outcome,
                )
            }
        },
    );
    let closed = connection
        .close()
        .map_err(|(_, err)| err)
        .with_context(|| format!("failed to close {}", db_path.display()));

    if let Some(manifest_path) = &args.run_manifest {
        let manifest = SearchRunManifest {
            manifest_version: 1,
            run_id,
            started_at,
            finished_at: now_utc_string(),
            query: args.query.clone(),
            source_path: args.csv_path.display().to_string(),
            source_sha256: result
                .as_ref()
                .ok()
                .map(|outcome| outcome.source_sha256.clone()),
            db_path: db_path.display().to_string(),
            table: table.name().to_string(),
            model_id: model.model_id.clone(),
            model_name: model.model_name.clone(),
            embedding_dim: model.dimensions,
            normalization: model.normalization.clone(),
            backend: model.backend.clone(),
            rows_loaded: result.as_ref().map_or(0, |outcome| outcome.rows_loaded),
            rows_inserted: result.as_ref().map_or(0, |outcome| outcome.rows_inserted),
            returned: result.as_ref().map_or(0, |outcome| outcome.hits.len()),
            duration_ms: started.elapsed().as_millis(),
            status: if result.is_ok() { "completed" } else { "rolled_back" }.to_string(),
            failure_reason: result.as_ref().err().map(|err| format!("{err:#}")),
        };
        match write_json_pretty(manifest_path, &manifest) {
            Ok(()) => info!(
                path = %manifest_path.display(),
                status = %manifest.status,
                "wrote search run manifest"
            ),
            Err(err) => warn!(
                path = %manifest_path.display(),
                error = %format!("{err:#}"),
                "failed to write search run manifest"
            ),
        }
    }

    let outcome: SearchOutcome = result?;
    closed?;

    info!(
        rows_loaded = outcome.rows_loaded,
        rows_inserted = outcome.rows_inserted,
        returned = outcome.hits.len(),
        duration_ms = started.elapsed().as_millis() as u64,
        "search completed"
    );

    Ok(())
}
