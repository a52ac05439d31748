//! Vector similarity metrics

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::RetrievalError;

/// Vector similarity metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    /// Cosine similarity (normalized dot product)
    #[default]
    Cosine,
    /// Euclidean distance mapped to `1 / (1 + d)`
    Euclidean,
    DotProduct,
}

impl SimilarityMetric {
    /// Similarity between two vectors; higher is closer.
    /// Vectors of different length are compared over their common prefix.
    pub fn calculate(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            SimilarityMetric::Cosine => {
                let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm_a > 0.0 && norm_b > 0.0 {
                    dot / (norm_a * norm_b)
                } else {
                    0.0
                }
            }
            SimilarityMetric::Euclidean => {
                let dist: f32 = a
                    .iter()
                    .zip(b)
                    .map(|(x, y)| (x - y).powi(2))
                    .sum::<f32>()
                    .sqrt();
                1.0 / (1.0 + dist)
            }
            SimilarityMetric::DotProduct => a.iter().zip(b).map(|(x, y)| x * y).sum(),
        }
    }
}

impl FromStr for SimilarityMetric {
    type Err = RetrievalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cosine" => Ok(SimilarityMetric::Cosine),
            "euclidean" => Ok(SimilarityMetric::Euclidean),
            "dotproduct" | "dot_product" => Ok(SimilarityMetric::DotProduct),
            other => Err(RetrievalError::Config(format!("Unknown similarity metric: {}", other))),
        }
    }
}
