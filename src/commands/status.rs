use anyhow::Result;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::cli::{StatusArgs, resolve_db_path};
use crate::semantic::DEFAULT_EMBEDDING_DIM;
use crate::store::{VectorTable, open_store_read_only};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStatus {
    pub rows: i64,
    pub dimensions: Vec<usize>,
}

pub fn run(args: StatusArgs) -> Result<()> {
    let db_path = resolve_db_path(&args.cache_root, args.db_path.as_ref());
    let table = VectorTable::new(&args.table, DEFAULT_EMBEDDING_DIM)?;

    info!(db_path = %db_path.display(), table = %table.name(), "status requested");

    if !db_path.exists() {
        warn!(path = %db_path.display(), "database file missing");
        return Ok(());
    }

    let connection = open_store_read_only(&db_path)?;
    match table_status(&connection, &table)? {
        Some(status) => {
            info!(
                path = %db_path.display(),
                table = %table.name(),
                rows = status.rows,
                dimensions = ?status.dimensions,
                "vector table status"
            );
            if status
                .dimensions
                .iter()
                .any(|dims| *dims != table.dimensions())
            {
                warn!(
                    table = %table.name(),
                    expected = table.dimensions(),
                    found = ?status.dimensions,
                    "stored vectors do not match the model dimensionality"
                );
            }
        }
        None => warn!(table = %table.name(), "vector table missing"),
    }

    Ok(())
}

pub fn table_status(connection: &Connection, table: &VectorTable) -> Result<Option<TableStatus>> {
    if !table.exists(connection)? {
        return Ok(None);
    }

    Ok(Some(TableStatus {
        rows: table.count_rows(connection)?,
        dimensions: table.stored_dimensions(connection)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::open_store;

    #[test]
    fn table_status_reports_rows_and_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("index.sqlite");
        let connection = open_store(&db_path).unwrap();
        let table = VectorTable::new("reviews", 2).unwrap();
        assert_eq!(table_status(&connection, &table).unwrap(), None);

        table.create(&connection).unwrap();
        table.insert(&connection, "a", "[1, 0]").unwrap();
        table.insert(&connection, "b", "[0, 1]").unwrap();
        drop(connection);

        let reader = open_store_read_only(&db_path).unwrap();
        let status = table_status(&reader, &table).unwrap().unwrap();
        assert_eq!(status.rows, 2);
        assert_eq!(status.dimensions, vec![2]);
    }

    #[test]
    fn run_tolerates_missing_database() {
        let dir = tempfile::tempdir().unwrap();
        let args = StatusArgs {
            cache_root: dir.path().to_path_buf(),
            db_path: Some(dir.path().join("absent.sqlite")),
            table: "review_vectors".to_string(),
        };
        assert!(run(args).is_ok());
    }

    #[test]
    fn run_rejects_invalid_table_name() {
        let dir = tempfile::tempdir().unwrap();
        let args = StatusArgs {
            cache_root: dir.path().to_path_buf(),
            db_path: None,
            table: "bad-name".to_string(),
        };
        assert!(run(args).is_err());
    }
}
