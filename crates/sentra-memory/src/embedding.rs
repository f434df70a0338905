//! Deterministic text embeddings for fraud-pattern descriptions.
//!
//! Character trigrams are feature-hashed into a fixed-dimension vector and
//! L2-normalized. Identical text always embeds identically, which keeps the
//! pipeline reproducible and lets learned patterns be re-found by their own
//! description.

use sha2::{Digest, Sha256};

pub const EMBEDDING_DIM: usize = 384;

pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;

    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TrigramEmbedder;

impl TrigramEmbedder {
    pub fn new() -> Self {
        Self
    }
}

impl Embedder for TrigramEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let normalized: String = text
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        let chars: Vec<char> = normalized.chars().collect();

        let mut vector = vec![0.0f32; EMBEDDING_DIM];
        let mut bump = |token: &str| {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
                as usize
                % EMBEDDING_DIM;
            let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        };

        if chars.len() < 3 {
            if !chars.is_empty() {
                bump(&normalized);
            }
        } else {
            for window in chars.windows(3) {
                bump(&window.iter().collect::<String>());
            }
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
