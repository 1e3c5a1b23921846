use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::semantic::{FASTEMBED_BACKEND, LOCAL_HASH_BACKEND};

#[derive(Parser, Debug)]
#[command(
    name = "semsearch",
    version,
    about = "Embed a CSV text column into SQLite and run a vector similarity search"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Search(SearchArgs),
    Status(StatusArgs),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum EmbedBackend {
    LocalHash,
    Fastembed,
}

impl EmbedBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LocalHash => LOCAL_HASH_BACKEND,
            Self::Fastembed => FASTEMBED_BACKEND,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    #[arg(long, default_value = "smooth")]
    pub query: String,

    #[arg(long, default_value = ".cache/semsearch")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long, default_value = "data/scotch_review.csv")]
    pub csv_path: PathBuf,

    #[arg(long, default_value = "description")]
    pub column: String,

    #[arg(long, default_value = "review_vectors")]
    pub table: String,

    #[arg(long, value_enum, default_value_t = EmbedBackend::LocalHash)]
    pub backend: EmbedBackend,

    #[arg(long)]
    pub model_id: Option<String>,

    #[arg(long, default_value_t = 1)]
    pub limit: usize,

    /// Drop the table inside the search transaction before recreating it.
    #[arg(long, default_value_t = false)]
    pub drop_existing: bool,

    #[arg(long, default_value_t = false)]
    pub json: bool,

    #[arg(long)]
    pub run_manifest: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/semsearch")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long, default_value = "review_vectors")]
    pub table: String,
}

pub fn resolve_db_path(cache_root: &Path, db_path: Option<&PathBuf>) -> PathBuf {
    db_path
        .cloned()
        .unwrap_or_else(|| cache_root.join("semsearch_index.sqlite"))
}
