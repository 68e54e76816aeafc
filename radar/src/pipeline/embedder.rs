use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::{Arc, LazyLock, Mutex};

use crate::config::FASTEMBED_CACHE_DIR;

/// Recorded with every stored vector; a mismatch against stored rows means
/// the whole embedding table must be rebuilt.
pub const MODEL_NAME: &str = "paraphrase-multilingual-MiniLM-L12-v2";
pub const EMBEDDING_DIM: usize = 384;

/// The model truncates long inputs anyway; the title plus the first 600
/// chars of the body is what distinguishes near-duplicates.
const MAX_BODY_CHARS: usize = 600;

static EMBEDDING_MODEL: LazyLock<Arc<Mutex<TextEmbedding>>> =
    LazyLock::new(|| embedding_model().expect("failed to initialize embedding model"));

/// Maps (title, body) to a unit-norm vector, so dot product equals cosine
/// similarity.
pub async fn embed(title: &str, content: &str) -> Result<Vec<f32>, eyre::Error> {
    let input = build_input(title, content);

    tokio::task::spawn_blocking(move || {
        let mut model = EMBEDDING_MODEL
            .lock()
            .map_err(|_| eyre::eyre!("embedding model lock poisoned"))?;
        let mut embeddings = model
            .embed(vec![input], None)
            .map_err(|err| eyre::eyre!(err))?;
        let mut vector = embeddings
            .pop()
            .ok_or_else(|| eyre::eyre!("embedding model returned no vector"))?;
        l2_normalize(&mut vector);
        Ok::<_, eyre::Error>(vector)
    })
    .await
    .map_err(|err| eyre::eyre!(err))?
}

pub fn build_input(title: &str, content: &str) -> String {
    let body: String = content.trim().chars().take(MAX_BODY_CHARS).collect();
    format!("{} [SEP] {}", title.trim(), body.trim())
}

pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

fn embedding_model() -> Result<Arc<Mutex<TextEmbedding>>, eyre::Error> {
    tracing::info!(model = MODEL_NAME, "Initializing FastEmbed model");
    let model = TextEmbedding::try_new(
        InitOptions::new(EmbeddingModel::ParaphraseMLMiniLML12V2).with_cache_dir(
            FASTEMBED_CACHE_DIR
                .parse()
                .map_err(|err| eyre::eyre!("invalid fastembed cache dir: {err}"))?,
        ),
    )
    .map_err(|err| eyre::eyre!(err))?;
    Ok(Arc::new(Mutex::new(model)))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn input_joins_title_and_truncated_body() {
        let input = build_input("Fed hikes rates", "Body text here.");
        assert_eq!(input, "Fed hikes rates [SEP] Body text here.");

        let long_body = "я".repeat(2000);
        let input = build_input("t", &long_body);
        let body_part = input.split(" [SEP] ").nth(1).unwrap();
        assert_eq!(body_part.chars().count(), MAX_BODY_CHARS);
    }

    #[test]
    fn normalization_yields_unit_norm() {
        let mut vector = vec![3.0f32, 4.0];
        l2_normalize(&mut vector);
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_stays_zero() {
        let mut vector = vec![0.0f32; 4];
        l2_normalize(&mut vector);
        assert!(vector.iter().all(|v| *v == 0.0));
    }
}
