use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;
use rusqlite::functions::{Context as FunctionContext, FunctionFlags};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, OptionalExtension, named_params};

use crate::model::SearchHit;
use crate::semantic::{decode_vector_blob, dot_product, encode_vector_blob, parse_vector_literal};
use crate::util::ensure_directory;

pub const DESCRIPTION_MAX_CHARS: usize = 2000;

static TABLE_IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("table identifier pattern is valid")
});

pub fn open_store(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_directory(parent)?;
        }
    }

    let connection = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("failed to open {}", db_path.display()))?;

    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;

    register_vector_functions(&connection)?;
    Ok(connection)
}

pub fn open_store_read_only(db_path: &Path) -> Result<Connection> {
    let connection = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("failed to open {} read-only", db_path.display()))?;

    register_vector_functions(&connection)?;
    Ok(connection)
}

/// Registers `TO_VECTOR`, `VECTOR_DOT_PRODUCT` and `VECTOR_DIM` on the
/// connection. Vectors are blobs of little-endian doubles.
pub fn register_vector_functions(connection: &Connection) -> Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;

    connection
        .create_scalar_function("TO_VECTOR", 1, flags, |ctx| {
            let literal = ctx.get::<String>(0)?;
            let values = parse_vector_literal(&literal).map_err(user_function_error)?;
            Ok(encode_vector_blob(&values))
        })
        .context("failed to register TO_VECTOR")?;

    connection
        .create_scalar_function("VECTOR_DOT_PRODUCT", 2, flags, |ctx| {
            let left = vector_argument(ctx, 0)?;
            let right = vector_argument(ctx, 1)?;
            dot_product(&left, &right).ok_or_else(|| {
                user_function_error(anyhow!(
                    "VECTOR_DOT_PRODUCT dimension mismatch: {} vs {}",
                    left.len(),
                    right.len()
                ))
            })
        })
        .context("failed to register VECTOR_DOT_PRODUCT")?;

    connection
        .create_scalar_function("VECTOR_DIM", 1, flags, |ctx| {
            let values = vector_argument(ctx, 0)?;
            Ok(values.len() as i64)
        })
        .context("failed to register VECTOR_DIM")?;

    Ok(())
}

fn vector_argument(ctx: &FunctionContext<'_>, index: usize) -> rusqlite::Result<Vec<f64>> {
    match ctx.get_raw(index) {
        ValueRef::Blob(blob) => decode_vector_blob(blob).ok_or_else(|| {
            user_function_error(anyhow!(
                "argument {index} is not a vector blob ({} bytes)",
                blob.len()
            ))
        }),
        other => Err(user_function_error(anyhow!(
            "argument {index} must be a vector blob, got {:?}",
            other.data_type()
        ))),
    }
}

fn user_function_error(err: anyhow::Error) -> rusqlite::Error {
    rusqlite::Error::UserFunctionError(err.into())
}

/// The single text + vector relation a search run populates.
#[derive(Debug, Clone)]
pub struct VectorTable {
    name: String,
    dimensions: usize,
}

impl VectorTable {
    pub fn new(name: &str, dimensions: usize) -> Result<Self> {
        if !TABLE_IDENTIFIER.is_match(name) {
            bail!("invalid table name '{name}': expected [A-Za-z_][A-Za-z0-9_]*");
        }
        if dimensions == 0 {
            bail!("vector table '{name}' needs a non-zero dimensionality");
        }

        Ok(Self {
            name: name.to_string(),
            dimensions,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Plain `CREATE TABLE`: fails when the table already exists.
    pub fn create(&self, connection: &Connection) -> Result<()> {
        let sql = format!(
            "
            CREATE TABLE {table} (
              description VARCHAR({max_chars}) CHECK (length(description) <= {max_chars}),
              description_vector BLOB NOT NULL CHECK (VECTOR_DIM(description_vector) = {dims})
            )
            ",
            table = self.name,
            max_chars = DESCRIPTION_MAX_CHARS,
            dims = self.dimensions,
        );
        connection
            .execute(&sql, [])
            .with_context(|| format!("failed to create table {}", self.name))?;
        Ok(())
    }

    pub fn drop_if_exists(&self, connection: &Connection) -> Result<()> {
        connection
            .execute(&format!("DROP TABLE IF EXISTS {}", self.name), [])
            .with_context(|| format!("failed to drop table {}", self.name))?;
        Ok(())
    }

    pub fn exists(&self, connection: &Connection) -> Result<bool> {
        let found = connection
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1 LIMIT 1",
                [&self.name],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .is_some();
        Ok(found)
    }

    pub fn insert(
        &self,
        connection: &Connection,
        description: &str,
        vector_literal: &str,
    ) -> Result<usize> {
        let sql = format!(
            "
            INSERT INTO {}
            (description, description_vector)
            VALUES (:description, TO_VECTOR(:description_vector))
            ",
            self.name
        );
        let mut statement = connection.prepare_cached(&sql)?;
        let inserted = statement.execute(named_params! {
            ":description": description,
            ":description_vector": vector_literal,
        })?;
        Ok(inserted)
    }

    /// Rows ranked by dot product against the query vector, best first.
    pub fn nearest(
        &self,
        connection: &Connection,
        query_literal: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let sql = format!(
            "
            SELECT
              description,
              VECTOR_DOT_PRODUCT(description_vector, TO_VECTOR(:search_vector)) AS score
            FROM {}
            ORDER BY score DESC
            LIMIT :limit
            ",
            self.name
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut statement = connection.prepare(&sql)?;
        let mut rows = statement.query(named_params! {
            ":search_vector": query_literal,
            ":limit": limit,
        })?;

        let mut out = Vec::<SearchHit>::new();
        while let Some(row) = rows.next()? {
            out.push(SearchHit {
                rank: out.len() + 1,
                description: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                score: row.get(1)?,
            });
        }

        Ok(out)
    }

    pub fn count_rows(&self, connection: &Connection) -> Result<i64> {
        let count = connection.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.name),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Distinct stored vector lengths, ascending.
    pub fn stored_dimensions(&self, connection: &Connection) -> Result<Vec<usize>> {
        let mut statement = connection.prepare(&format!(
            "SELECT DISTINCT VECTOR_DIM(description_vector) AS dims FROM {} ORDER BY dims",
            self.name
        ))?;
        let mut rows = statement.query([])?;
        let mut out = Vec::<usize>::new();
        while let Some(row) = rows.next()? {
            out.push(row.get::<_, i64>(0)? as usize);
        }
        Ok(out)
    }
}
