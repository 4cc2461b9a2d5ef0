//! Similarity and distance measures.
//!
//! Components are accumulated in `f64`. A zero-norm operand has cosine
//! similarity 0.

use crate::types::LoomError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How candidates are scored and ranked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    /// Cosine similarity, best first = highest.
    #[default]
    CosineSimilarity,
    /// `1 - cosine`, best first = lowest.
    CosineDistance,
    /// `1 / (1 + euclidean)`, best first = highest.
    EuclideanSimilarity,
    /// Euclidean distance, best first = lowest.
    EuclideanDistance,
    /// Inner product, best first = highest.
    DotProduct,
}

/// Every measure of one candidate against the query.
///
/// `score` is the similarity of the search type (cosine for cosine types,
/// `1 / (1 + d)` for euclidean types, the inner product for dot product).
/// `distance` is the cosine distance for cosine types and the euclidean
/// distance otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measures {
    pub score: f64,
    pub distance: f64,
    pub inner_product: f64,
}

/// Result thresholds. Each applies only to the search types it names.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct Thresholds {
    pub min_score: Option<f64>,
    pub max_distance: Option<f64>,
    pub min_inner_product: Option<f64>,
}

impl SearchType {
    pub const ALL: [Self; 5] = [
        Self::CosineSimilarity,
        Self::CosineDistance,
        Self::EuclideanSimilarity,
        Self::EuclideanDistance,
        Self::DotProduct,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CosineSimilarity => "cosine_similarity",
            Self::CosineDistance => "cosine_distance",
            Self::EuclideanSimilarity => "euclidean_similarity",
            Self::EuclideanDistance => "euclidean_distance",
            Self::DotProduct => "dot_product",
        }
    }

    /// Whether results are ranked by ascending distance.
    #[must_use]
    pub const fn is_distance(self) -> bool {
        matches!(self, Self::CosineDistance | Self::EuclideanDistance)
    }

    /// Score `candidate` against `query`. Both must have the same length.
    #[must_use]
    pub fn measure(self, query: &[f32], candidate: &[f32]) -> Measures {
        let (mut dot, mut query_sq, mut candidate_sq, mut diff_sq) = (0.0, 0.0, 0.0, 0.0);
        for (&p, &c) in query.iter().zip(candidate) {
            let (p, c) = (f64::from(p), f64::from(c));
            dot += p * c;
            query_sq += p * p;
            candidate_sq += c * c;
            diff_sq += (p - c) * (p - c);
        }
        let norms = query_sq.sqrt() * candidate_sq.sqrt();
        let cosine = if norms == 0.0 { 0.0 } else { dot / norms };
        let euclidean = diff_sq.sqrt();

        match self {
            Self::CosineSimilarity | Self::CosineDistance => Measures {
                score: cosine,
                distance: 1.0 - cosine,
                inner_product: dot,
            },
            Self::EuclideanSimilarity | Self::EuclideanDistance => Measures {
                score: 1.0 / (1.0 + euclidean),
                distance: euclidean,
                inner_product: dot,
            },
            Self::DotProduct => Measures {
                score: dot,
                distance: euclidean,
                inner_product: dot,
            },
        }
    }

    /// A key where greater is better.
    pub(crate) fn rank(self, measures: &Measures) -> f64 {
        match self {
            Self::CosineSimilarity | Self::EuclideanSimilarity => measures.score,
            Self::CosineDistance | Self::EuclideanDistance => -measures.distance,
            Self::DotProduct => measures.inner_product,
        }
    }

    pub(crate) fn passes(self, measures: &Measures, thresholds: &Thresholds) -> bool {
        match self {
            Self::CosineSimilarity | Self::EuclideanSimilarity => thresholds
                .min_score
                .is_none_or(|min| measures.score >= min),
            Self::CosineDistance | Self::EuclideanDistance => thresholds
                .max_distance
                .is_none_or(|max| measures.distance <= max),
            Self::DotProduct => thresholds
                .min_inner_product
                .is_none_or(|min| measures.inner_product >= min),
        }
    }
}

impl std::fmt::Display for SearchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SearchType {
    type Err = LoomError;

    /// Accepts the snake_case name, with `-` allowed for `_`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == wanted)
            .ok_or_else(|| LoomError::bad_request(format!("unknown search type {s:?}")))
    }
}
