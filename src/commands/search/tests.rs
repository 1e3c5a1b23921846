use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use rusqlite::Connection;

use super::output::{write_json_response, write_text_response};
use super::pipeline::{SearchPlan, search_in_transaction};
use super::run;
use crate::cli::{EmbedBackend, SearchArgs};
use crate::embedder::{Embedder, LocalHashEmbedder};
use crate::model::{SearchHit, SearchOutcome};
use crate::semantic::{
    DEFAULT_EMBEDDING_DIM, LOCAL_HASH_BACKEND, SemanticModelConfig, format_vector_literal,
    resolve_model_config,
};
use crate::store::{VectorTable, register_vector_functions};

const REVIEWS: &[&str] = &[
    "Magnificently powerful and intense, with caramel and peat smoke",
    "Silky smooth texture with honeyed vanilla and soft oak",
    "Briny seaweed, iodine and tarry rope on the nose",
    "Dried fruit, sherry cask spice and dark chocolate",
    "Light and grassy with green apple and lemon zest",
    "Waxy heather honey, orange peel and a long warming finish",
];

/// Truncates the vector of one row so its insert violates the column's
/// declared dimensionality.
struct TruncatingEmbedder {
    inner: LocalHashEmbedder,
    poisoned_row: usize,
}

impl Embedder for TruncatingEmbedder {
    fn model(&self) -> &SemanticModelConfig {
        self.inner.model()
    }

    fn embed_batch(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = self.inner.embed_batch(texts)?;
        if let Some(vector) = vectors.get_mut(self.poisoned_row) {
            vector.pop();
        }
        Ok(vectors)
    }
}

fn local_embedder() -> LocalHashEmbedder {
    LocalHashEmbedder::new(resolve_model_config(None, LOCAL_HASH_BACKEND))
}

fn memory_store() -> Connection {
    let connection = Connection::open_in_memory().unwrap();
    register_vector_functions(&connection).unwrap();
    connection
}

fn write_reviews_csv(dir: &Path, descriptions: &[&str]) -> PathBuf {
    let path = dir.join("scotch_review.csv");
    let mut writer = csv::Writer::from_path(&path).unwrap();
    writer
        .write_record(["", "name", "category", "description"])
        .unwrap();
    for (index, description) in descriptions.iter().enumerate() {
        let id = index.to_string();
        let name = format!("Whisky {index}");
        writer
            .write_record([id.as_str(), name.as_str(), "Single Malt", *description])
            .unwrap();
    }
    writer.flush().unwrap();
    path
}

fn plan<'a>(query: &'a str, csv_path: &'a Path, limit: usize) -> SearchPlan<'a> {
    SearchPlan {
        query,
        csv_path,
        column: "description",
        limit,
        drop_existing: false,
    }
}

fn reviews_table() -> VectorTable {
    VectorTable::new("zzz2", DEFAULT_EMBEDDING_DIM).unwrap()
}

#[test]
fn search_inserts_every_row_before_querying() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = write_reviews_csv(dir.path(), REVIEWS);
    let mut connection = memory_store();
    let table = reviews_table();
    let mut embedder = local_embedder();
    let mut reported_rows = None;

    let outcome = search_in_transaction(
        &mut connection,
        &table,
        &mut embedder,
        &plan("smooth", &csv_path, 1),
        |outcome| {
            reported_rows = Some(outcome.rows_inserted);
            Ok(())
        },
    )
    .unwrap();

    assert_eq!(outcome.rows_loaded, REVIEWS.len());
    assert_eq!(outcome.rows_inserted, REVIEWS.len());
    assert_eq!(reported_rows, Some(REVIEWS.len()));
    assert_eq!(table.count_rows(&connection).unwrap(), REVIEWS.len() as i64);

    let loaded = crate::dataset::load_descriptions(&csv_path, "description").unwrap();
    assert_eq!(outcome.source_sha256, loaded.sha256);
}

#[test]
fn every_stored_vector_has_model_dimensionality() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = write_reviews_csv(dir.path(), REVIEWS);
    let mut connection = memory_store();
    let table = reviews_table();

    search_in_transaction(
        &mut connection,
        &table,
        &mut local_embedder(),
        &plan("smooth", &csv_path, 1),
        |_| Ok(()),
    )
    .unwrap();

    assert_eq!(table.stored_dimensions(&connection).unwrap(), vec![384]);
}

#[test]
fn similarity_query_is_top_one_by_default_and_bounded_by_limit() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = write_reviews_csv(dir.path(), REVIEWS);

    let mut connection = memory_store();
    let outcome = search_in_transaction(
        &mut connection,
        &reviews_table(),
        &mut local_embedder(),
        &plan("smooth", &csv_path, 1),
        |_| Ok(()),
    )
    .unwrap();
    assert_eq!(outcome.hits.len(), 1);
    assert_eq!(outcome.hits[0].rank, 1);

    let mut connection = memory_store();
    let outcome = search_in_transaction(
        &mut connection,
        &reviews_table(),
        &mut local_embedder(),
        &plan("smooth", &csv_path, 50),
        |_| Ok(()),
    )
    .unwrap();
    assert_eq!(outcome.hits.len(), REVIEWS.len());
    assert!(
        outcome
            .hits
            .windows(2)
            .all(|pair| pair[0].score >= pair[1].score)
    );
}

#[test]
fn exact_text_query_returns_that_row_first() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = write_reviews_csv(dir.path(), REVIEWS);
    let mut connection = memory_store();

    let outcome = search_in_transaction(
        &mut connection,
        &reviews_table(),
        &mut local_embedder(),
        &plan(REVIEWS[2], &csv_path, 1),
        |_| Ok(()),
    )
    .unwrap();

    assert_eq!(outcome.hits[0].description, REVIEWS[2]);
    assert!((outcome.hits[0].score - 1.0).abs() < 1e-5);
}

#[test]
fn search_fails_when_table_exists_and_leaves_it_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = write_reviews_csv(dir.path(), REVIEWS);
    let mut connection = memory_store();
    let table = reviews_table();
    table.create(&connection).unwrap();
    let literal = format_vector_literal(&[0.0; DEFAULT_EMBEDDING_DIM]);
    table.insert(&connection, "pre-existing", &literal).unwrap();

    let mut reported = false;
    let result = search_in_transaction(
        &mut connection,
        &table,
        &mut local_embedder(),
        &plan("smooth", &csv_path, 1),
        |_| {
            reported = true;
            Ok(())
        },
    );

    let err = result.unwrap_err();
    assert!(format!("{err:#}").contains("failed to create table zzz2"));
    assert!(!reported);
    assert_eq!(table.count_rows(&connection).unwrap(), 1);
}

#[test]
fn drop_existing_recreates_the_table() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = write_reviews_csv(dir.path(), REVIEWS);
    let mut connection = memory_store();
    let table = reviews_table();
    table.create(&connection).unwrap();
    let literal = format_vector_literal(&[0.0; DEFAULT_EMBEDDING_DIM]);
    table.insert(&connection, "stale", &literal).unwrap();

    let mut search_plan = plan("smooth", &csv_path, 1);
    search_plan.drop_existing = true;
    let outcome = search_in_transaction(
        &mut connection,
        &table,
        &mut local_embedder(),
        &search_plan,
        |_| Ok(()),
    )
    .unwrap();

    assert_eq!(outcome.rows_inserted, REVIEWS.len());
    assert_eq!(table.count_rows(&connection).unwrap(), REVIEWS.len() as i64);
}

#[test]
fn failed_insert_midway_rolls_back_everything() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = write_reviews_csv(dir.path(), REVIEWS);
    let mut connection = memory_store();
    let table = reviews_table();
    let poisoned_row = REVIEWS.len() / 2;
    let mut embedder = TruncatingEmbedder {
        inner: local_embedder(),
        poisoned_row,
    };

    let err = search_in_transaction(
        &mut connection,
        &table,
        &mut embedder,
        &plan("smooth", &csv_path, 1),
        |_| Ok(()),
    )
    .unwrap_err();

    assert!(format!("{err:#}").contains(&format!("failed to insert row {poisoned_row}")));
    assert!(!table.exists(&connection).unwrap());
}

#[test]
fn report_failure_rolls_back_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = write_reviews_csv(dir.path(), REVIEWS);
    let mut connection = memory_store();
    let table = reviews_table();

    let result = search_in_transaction(
        &mut connection,
        &table,
        &mut local_embedder(),
        &plan("smooth", &csv_path, 1),
        |_| Err(anyhow::anyhow!("stdout closed")),
    );

    assert!(result.is_err());
    assert!(!table.exists(&connection).unwrap());
}

#[test]
fn missing_csv_rolls_back_table_creation() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("missing.csv");
    let mut connection = memory_store();
    let table = reviews_table();

    let err = search_in_transaction(
        &mut connection,
        &table,
        &mut local_embedder(),
        &plan("smooth", &csv_path, 1),
        |_| Ok(()),
    )
    .unwrap_err();

    assert!(format!("{err:#}").contains("failed to open CSV"));
    assert!(!table.exists(&connection).unwrap());
}

#[test]
fn text_response_lists_ranked_hits() {
    let outcome = SearchOutcome {
        source_sha256: String::new(),
        rows_loaded: 2,
        rows_inserted: 2,
        hits: vec![SearchHit {
            rank: 1,
            description: "Silky smooth".to_string(),
            score: 0.5,
        }],
    };
    let mut buffer = Vec::<u8>::new();
    write_text_response(&mut buffer, "smooth", "zzz2", "miniLM", &outcome).unwrap();

    let text = String::from_utf8(buffer).unwrap();
    assert_eq!(
        text,
        "Query: smooth\nTable: zzz2 rows_inserted=2 model=miniLM\nResults: 1\n1.\tscore=0.500000\n\tdescription: Silky smooth\n"
    );
}

#[test]
fn json_response_reports_returned_count() {
    let outcome = SearchOutcome {
        source_sha256: String::new(),
        rows_loaded: 3,
        rows_inserted: 3,
        hits: Vec::new(),
    };
    let mut buffer = Vec::<u8>::new();
    write_json_response(&mut buffer, "smooth", "zzz2", "miniLM", 1, &outcome).unwrap();

    let value: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
    assert_eq!(value["query"], "smooth");
    assert_eq!(value["rows_inserted"], 3);
    assert_eq!(value["returned"], 0);
    assert!(value["results"].as_array().unwrap().is_empty());
}

fn search_args(dir: &Path, csv_path: PathBuf, manifest_path: PathBuf) -> SearchArgs {
    SearchArgs {
        query: "smooth".to_string(),
        cache_root: dir.join("cache"),
        db_path: None,
        csv_path,
        column: "description".to_string(),
        table: "review_vectors".to_string(),
        backend: EmbedBackend::LocalHash,
        model_id: None,
        limit: 1,
        drop_existing: false,
        json: false,
        run_manifest: Some(manifest_path),
    }
}

#[test]
fn run_commits_to_disk_and_refuses_a_second_run() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = write_reviews_csv(dir.path(), REVIEWS);
    let manifest_path = dir.path().join("manifests/search_run.json");

    run(search_args(dir.path(), csv_path.clone(), manifest_path.clone())).unwrap();

    let manifest: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&manifest_path).unwrap()).unwrap();
    assert_eq!(manifest["status"], "completed");
    assert_eq!(manifest["rows_inserted"], REVIEWS.len());
    assert_eq!(manifest["returned"], 1);
    assert_eq!(manifest["embedding_dim"], 384);
    assert_eq!(manifest["source_sha256"].as_str().unwrap().len(), 64);

    let db_path = dir.path().join("cache/semsearch_index.sqlite");
    let connection = crate::store::open_store_read_only(&db_path).unwrap();
    let table = VectorTable::new("review_vectors", DEFAULT_EMBEDDING_DIM).unwrap();
    assert_eq!(table.count_rows(&connection).unwrap(), REVIEWS.len() as i64);
    drop(connection);

    assert!(run(search_args(dir.path(), csv_path, manifest_path.clone())).is_err());
    let manifest: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&manifest_path).unwrap()).unwrap();
    assert_eq!(manifest["status"], "rolled_back");
    assert!(manifest["source_sha256"].is_null());
    assert!(
        manifest["failure_reason"]
            .as_str()
            .unwrap()
            .contains("review_vectors")
    );
}

#[test]
fn manifest_write_failure_does_not_fail_a_committed_run() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = write_reviews_csv(dir.path(), REVIEWS);
    let blocker = dir.path().join("blocker");
    fs::write(&blocker, b"not a directory").unwrap();
    let manifest_path = blocker.join("search_run.json");

    run(search_args(dir.path(), csv_path, manifest_path.clone())).unwrap();

    assert!(!manifest_path.exists());
    let db_path = dir.path().join("cache/semsearch_index.sqlite");
    let connection = crate::store::open_store_read_only(&db_path).unwrap();
    let table = VectorTable::new("review_vectors", DEFAULT_EMBEDDING_DIM).unwrap();
    assert_eq!(table.count_rows(&connection).unwrap(), REVIEWS.len() as i64);
}

#[test]
fn manifest_write_failure_keeps_the_search_error() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = write_reviews_csv(dir.path(), REVIEWS);
    let blocker = dir.path().join("blocker");
    fs::write(&blocker, b"not a directory").unwrap();
    let manifest_path = blocker.join("search_run.json");

    run(search_args(dir.path(), csv_path.clone(), manifest_path.clone())).unwrap();
    let err = run(search_args(dir.path(), csv_path, manifest_path)).unwrap_err();

    let message = format!("{err:#}");
    assert!(message.contains("failed to create table review_vectors"));
    assert!(!message.contains("failed to create directory"));
}
