use sha2::{Digest, Sha256};

/// Turns text into a fixed-size vector for the record store.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;

    fn dimension(&self) -> usize;
}

/// Deterministic feature-hashing embedder.
///
/// Word tokens and character trigrams are hashed into signed buckets and the
/// result is L2-normalized, so identical text always yields identical vectors
/// and overlapping vocabulary yields positive cosine similarity.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dim: usize,
}

const TRIGRAM_WEIGHT: f32 = 0.5;

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(16) }
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut bucket_bytes = [0u8; 8];
        bucket_bytes.copy_from_slice(&digest[..8]);
        let bucket = (u64::from_le_bytes(bucket_bytes) % self.dim as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.dim];
        let lowered = text.to_lowercase();
        for token in lowered
            .split(|ch: char| !ch.is_alphanumeric())
            .filter(|token| !token.is_empty())
        {
            self.add_feature(&mut vector, token, 1.0);
            let padded: Vec<char> = format!("#{token}#").chars().collect();
            for window in padded.windows(3) {
                let trigram: String = window.iter().collect();
                self.add_feature(&mut vector, &trigram, TRIGRAM_WEIGHT);
            }
        }
        normalize(&mut vector);
        vector
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

fn l2(vec: &[f32]) -> f32 {
    vec.iter().map(|v| v * v).sum::<f32>().sqrt()
}

fn normalize(vec: &mut [f32]) {
    let norm = l2(vec);
    if norm > 0.0 {
        vec.iter_mut().for_each(|v| *v /= norm);
    }
}

/// Cosine similarity over the shared prefix of both vectors.
///
/// Zero vectors score `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().min(b.len());
    if len == 0 {
        return 0.0;
    }
    let (a, b) = (&a[..len], &b[..len]);
    let norm_a = l2(a);
    let norm_b = l2(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_is_identical_vector() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("Log in to the portal");
        let b = embedder.embed("log in to the PORTAL");
        assert_eq!(a, b);
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shared_vocabulary_scores_higher_than_disjoint() {
        let embedder = HashingEmbedder::default();
        let goal = embedder.embed("create supplier record");
        let close = embedder.embed("create a new supplier");
        let far = embedder.embed("weather forecast tomorrow");
        assert!(cosine_similarity(&goal, &close) > cosine_similarity(&goal, &far));
    }

    #[test]
    fn dimension_has_a_floor() {
        assert_eq!(HashingEmbedder::new(4).dimension(), 16);
        assert_eq!(HashingEmbedder::new(4).embed("x").len(), 16);
    }

    #[test]
    fn cosine_handles_degenerate_input() {
        assert_eq!(cosine_similarity(&[], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
