use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const DEFAULT_MODEL_ID: &str = "miniLM-L6-v2-local-v1";
pub const FASTEMBED_MODEL_ID: &str = "all-MiniLM-L6-v2";
pub const DEFAULT_MODEL_NAME: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const DEFAULT_EMBEDDING_DIM: usize = 384;
pub const DEFAULT_NORMALIZATION: &str = "l2";
pub const LOCAL_HASH_BACKEND: &str = "local-hash-v1";
pub const FASTEMBED_BACKEND: &str = "fastembed";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticModelConfig {
    pub model_id: String,
    pub model_name: String,
    pub dimensions: usize,
    pub normalization: String,
    pub backend: String,
}

/// Resolves the model identity for a backend. A blank `model_id` falls back
/// to the backend's default identifier.
pub fn resolve_model_config(model_id: Option<&str>, backend: &str) -> SemanticModelConfig {
    let default_id = if backend == FASTEMBED_BACKEND {
        FASTEMBED_MODEL_ID
    } else {
        DEFAULT_MODEL_ID
    };
    let resolved_id = model_id
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(default_id);

    let model_name = if resolved_id == DEFAULT_MODEL_ID || resolved_id == FASTEMBED_MODEL_ID {
        DEFAULT_MODEL_NAME
    } else {
        resolved_id
    };

    SemanticModelConfig {
        model_id: resolved_id.to_string(),
        model_name: model_name.to_string(),
        dimensions: DEFAULT_EMBEDDING_DIM,
        normalization: DEFAULT_NORMALIZATION.to_string(),
        backend: backend.to_string(),
    }
}

pub fn normalize_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<&str>>().join(" ")
}

pub fn embed_text_local(payload: &str, dimensions: usize) -> Vec<f32> {
    let dims = dimensions.max(8);
    let mut vector = vec![0_f32; dims];
    let mut tokens = tokenize_payload(payload);

    if tokens.is_empty() {
        return vector;
    }

    for token in tokens.drain(..) {
        let hash = stable_hash(&token);
        let index = (hash as usize) % dims;
        let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        let weight = 1.0 + (((hash >> 48) & 0xFF) as f32 / 255.0);
        vector[index] += sign * weight;
    }

    normalize_vector(&mut vector);
    vector
}

/// Dot product of two equally sized vectors; `None` when the lengths differ
/// or either side is empty.
pub fn dot_product(left: &[f64], right: &[f64]) -> Option<f64> {
    if left.len() != right.len() || left.is_empty() {
        return None;
    }

    Some(
        left.iter()
            .zip(right.iter())
            .map(|(left_value, right_value)| left_value * right_value)
            .sum::<f64>(),
    )
}

/// Renders a vector as the stringified list accepted by `TO_VECTOR`.
pub fn format_vector_literal(values: &[f32]) -> String {
    let rendered = values
        .iter()
        .map(|value| value.to_string())
        .collect::<Vec<String>>();
    format!("[{}]", rendered.join(", "))
}

pub fn parse_vector_literal(literal: &str) -> Result<Vec<f64>> {
    let trimmed = literal.trim();
    let inner = trimmed
        .strip_prefix('[')
        .map(|rest| rest.strip_suffix(']'))
        .unwrap_or(Some(trimmed));
    let Some(inner) = inner else {
        bail!("unbalanced brackets in vector literal");
    };

    if inner.trim().is_empty() {
        bail!("vector literal is empty");
    }

    let mut out = Vec::<f64>::new();
    for (index, raw) in inner.split(',').enumerate() {
        let token = raw.trim();
        let value = token
            .parse::<f64>()
            .map_err(|err| anyhow::anyhow!("invalid vector element {index} '{token}': {err}"))?;
        if !value.is_finite() {
            bail!("vector element {index} is not finite");
        }
        out.push(value);
    }

    Ok(out)
}

pub fn encode_vector_blob(values: &[f64]) -> Vec<u8> {
    let mut out = Vec::<u8>::with_capacity(values.len() * 8);
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

pub fn decode_vector_blob(blob: &[u8]) -> Option<Vec<f64>> {
    if blob.is_empty() || blob.len() % 8 != 0 {
        return None;
    }

    let out = blob
        .chunks_exact(8)
        .map(|chunk| {
            let mut bytes = [0_u8; 8];
            bytes.copy_from_slice(chunk);
            f64::from_le_bytes(bytes)
        })
        .collect::<Vec<f64>>();

    Some(out)
}

pub fn normalize_vector(values: &mut [f32]) {
    let squared_norm = values
        .iter()
        .map(|value| f64::from(*value) * f64::from(*value))
        .sum::<f64>();

    if squared_norm <= 0.0 {
        return;
    }

    let norm = squared_norm.sqrt() as f32;
    if norm == 0.0 {
        return;
    }

    for value in values {
        *value /= norm;
    }
}

/// First eight bytes of the token's SHA-256, little-endian. Stored vectors
/// depend on this staying fixed across builds and toolchains.
fn stable_hash(value: &str) -> u64 {
    let digest = Sha256::digest(value.as_bytes());
    let mut prefix = [0_u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(prefix)
}

fn tokenize_payload(payload: &str) -> Vec<String> {
    let normalized = normalize_whitespace(payload);
    if normalized.is_empty() {
        return Vec::new();
    }

    let words = normalized
        .split(' ')
        .map(|value| {
            value
                .chars()
                .filter(|character| character.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|value| !value.is_empty())
        .collect::<Vec<String>>();

    let mut features = Vec::<String>::with_capacity(words.len() * 2);
    for (index, word) in words.iter().enumerate() {
        features.push(format!("w:{word}"));
        if let Some(next) = words.get(index + 1) {
            features.push(format!("b:{word}_{next}"));
        }
    }
    features
}
