use std::fs;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result, bail};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct LoadedDescriptions {
    pub descriptions: Vec<String>,
    pub sha256: String,
}

/// Reads every value of `column` from the CSV at `path`, in file order,
/// together with the SHA-256 of the bytes that were parsed.
pub fn load_descriptions(path: &Path, column: &str) -> Result<LoadedDescriptions> {
    let raw = fs::read(path).with_context(|| format!("failed to open CSV: {}", path.display()))?;
    let sha256 = format!("{:x}", Sha256::digest(&raw));
    let descriptions = read_descriptions(raw.as_slice(), column)
        .with_context(|| format!("failed to load {}", path.display()))?;

    Ok(LoadedDescriptions {
        descriptions,
        sha256,
    })
}

pub fn read_descriptions<R: Read>(reader: R, column: &str) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers = reader.headers().context("failed to read CSV header")?.clone();
    let Some(position) = headers.iter().position(|header| header.trim() == column) else {
        let available = headers
            .iter()
            .map(|header| format!("'{header}'"))
            .collect::<Vec<String>>()
            .join(", ");
        bail!("column '{column}' not found in CSV header (available: {available})");
    };

    let mut out = Vec::<String>::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("failed to parse CSV record {}", index + 1))?;
        let Some(value) = record.get(position) else {
            bail!(
                "CSV record {} has {} fields, missing column '{column}'",
                index + 1,
                record.len()
            );
        };
        out.push(value.to_string());
    }

    Ok(out)
}
