use anyhow::{Result, bail};

use crate::cli::EmbedBackend;
use crate::semantic::{SemanticModelConfig, embed_text_local, resolve_model_config};

/// Maps text to fixed-length vectors for one model.
pub trait Embedder {
    fn model(&self) -> &SemanticModelConfig;

    fn embed_batch(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed_query(&mut self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()])?;
        match vectors.pop() {
            Some(vector) if vectors.is_empty() => Ok(vector),
            _ => bail!("embedding backend returned no vector for the query"),
        }
    }
}

pub fn build_embedder(backend: EmbedBackend, model_id: Option<&str>) -> Result<Box<dyn Embedder>> {
    let model = resolve_model_config(model_id, backend.as_str());
    match backend {
        EmbedBackend::LocalHash => Ok(Box::new(LocalHashEmbedder::new(model))),
        EmbedBackend::Fastembed => build_fastembed(model),
    }
}

#[cfg(feature = "fastembed")]
fn build_fastembed(model: SemanticModelConfig) -> Result<Box<dyn Embedder>> {
    Ok(Box::new(fastembed_backend::FastEmbedder::new(model)?))
}

#[cfg(not(feature = "fastembed"))]
fn build_fastembed(_model: SemanticModelConfig) -> Result<Box<dyn Embedder>> {
    bail!("the fastembed backend is not compiled in; rebuild with `--features fastembed`")
}

/// Deterministic feature-hashing embedder; needs no model download.
pub struct LocalHashEmbedder {
    model: SemanticModelConfig,
}

impl LocalHashEmbedder {
    pub fn new(model: SemanticModelConfig) -> Self {
        Self { model }
    }
}

impl Embedder for LocalHashEmbedder {
    fn model(&self) -> &SemanticModelConfig {
        &self.model
    }

    fn embed_batch(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| embed_text_local(text, self.model.dimensions))
            .collect())
    }
}

#[cfg(feature = "fastembed")]
mod fastembed_backend {
    use anyhow::{Result, anyhow, bail};
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use tracing::info;

    use super::Embedder;
    use crate::semantic::{SemanticModelConfig, normalize_vector};

    pub(super) struct FastEmbedder {
        model: SemanticModelConfig,
        inner: TextEmbedding,
    }

    impl FastEmbedder {
        pub(super) fn new(model: SemanticModelConfig) -> Result<Self> {
            info!(model_name = %model.model_name, "loading fastembed model");
            let options =
                InitOptions::new(EmbeddingModel::AllMiniLML6V2).with_show_download_progress(false);
            let inner = TextEmbedding::try_new(options)
                .map_err(|err| anyhow!("failed to initialize fastembed model: {err}"))?;
            Ok(Self { model, inner })
        }
    }

    impl Embedder for FastEmbedder {
        fn model(&self) -> &SemanticModelConfig {
            &self.model
        }

        fn embed_batch(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }

            let refs = texts.iter().map(String::as_str).collect::<Vec<&str>>();
            let mut vectors = self
                .inner
                .embed(refs, None)
                .map_err(|err| anyhow!("fastembed generation failed: {err}"))?;

            for vector in &mut vectors {
                if vector.len() != self.model.dimensions {
                    bail!(
                        "fastembed returned {} dimensions, expected {}",
                        vector.len(),
                        self.model.dimensions
                    );
                }
                normalize_vector(vector);
            }
            Ok(vectors)
        }
    }

}
