use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub rank: usize,
    pub description: String,
    pub score: f64,
}

/// What one search pipeline run did inside its transaction.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub source_sha256: String,
    pub rows_loaded: usize,
    pub rows_inserted: usize,
    pub hits: Vec<SearchHit>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse<'a> {
    pub query: &'a str,
    pub table: &'a str,
    pub model_id: &'a str,
    pub limit: usize,
    pub rows_inserted: usize,
    pub returned: usize,
    pub results: &'a [SearchHit],
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub query: String,
    pub source_path: String,
    pub source_sha256: Option<String>,
    pub db_path: String,
    pub table: String,
    pub model_id: String,
    pub model_name: String,
    pub embedding_dim: usize,
    pub normalization: String,
    pub backend: String,
    pub rows_loaded: usize,
    pub rows_inserted: usize,
    pub returned: usize,
    pub duration_ms: u128,
    pub status: String,
    pub failure_reason: Option<String>,
}
