//! Similarity Resolver: map a free-text mention of an entity to its
//! canonical key.
//!
//! The question is embedded with the same model that produced the stored
//! vectors, every candidate is scored by cosine similarity, and the best
//! one wins. Ties go to the candidate that appears first.
//!
//! The search itself sits behind [`NearestNeighbor`]. [`LinearScan`] is the
//! only implementation; an indexed structure can replace it without
//! changing [`SimilarityResolver::resolve`].

use anyhow::{bail, Result};
use std::sync::Arc;

use crate::embedding::{cosine_similarity, Embedder};

/// Entity key → embedding, in the order the store returned them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingTable {
    entries: Vec<(String, Vec<f32>)>,
}

impl EmbeddingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, vector: Vec<f32>) {
        self.entries.push((key.into(), vector));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl<K: Into<String>> FromIterator<(K, Vec<f32>)> for EmbeddingTable {
    fn from_iter<I: IntoIterator<Item = (K, Vec<f32>)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (k, v) in iter {
            table.push(k, v);
        }
        table
    }
}

/// The winning candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMatch {
    pub key: String,
    pub score: f32,
}

/// Nearest-neighbour search over an [`EmbeddingTable`].
pub trait NearestNeighbor: Send + Sync {
    /// Best candidate for `query`, or `None` when the table is empty.
    fn nearest(&self, query: &[f32], table: &EmbeddingTable) -> Option<EntityMatch>;
}

/// Scores every candidate. Stable: an equal score never displaces an
/// earlier candidate.
pub struct LinearScan;

impl NearestNeighbor for LinearScan {
    fn nearest(&self, query: &[f32], table: &EmbeddingTable) -> Option<EntityMatch> {
        let mut best: Option<EntityMatch> = None;
        for (key, vector) in table.iter() {
            let score = cosine_similarity(query, vector);
            let better = match &best {
                None => true,
                Some(current) => score > current.score,
            };
            if better {
                best = Some(EntityMatch {
                    key: key.to_string(),
                    score,
                });
            }
        }
        best
    }
}

pub struct SimilarityResolver {
    embedder: Arc<dyn Embedder>,
    index: Box<dyn NearestNeighbor>,
}

impl SimilarityResolver {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self::with_index(embedder, Box::new(LinearScan))
    }

    pub fn with_index(embedder: Arc<dyn Embedder>, index: Box<dyn NearestNeighbor>) -> Self {
        Self { embedder, index }
    }

    /// Resolve `question` to the closest candidate. Returns `Ok(None)`
    /// without calling the embedder when there are no candidates, and an
    /// error when the question vector and a stored vector differ in length.
    pub async fn resolve(
        &self,
        question: &str,
        candidates: &EmbeddingTable,
    ) -> Result<Option<EntityMatch>> {
        if candidates.is_empty() {
            return Ok(None);
        }

        let query = self.embedder.embed_one(question).await?;
        if let Some((key, vector)) = candidates.iter().find(|(_, v)| v.len() != query.len()) {
            bail!(
                "embedding dimension mismatch: question has {} dimensions, stored vector for '{}' has {}",
                query.len(),
                key,
                vector.len()
            );
        }
        let best = self.index.nearest(&query, candidates);
        if let Some(m) = &best {
            tracing::debug!(
                key = %m.key,
                score = m.score,
                candidates = candidates.len(),
                "resolved entity"
            );
        }
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn model_name(&self) -> &str {
            "fixed"
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| self.0.clone()).collect())
        }
    }

    fn two_listings() -> EmbeddingTable {
        [
            ("18 W 38th St", vec![1.0, 0.0]),
            ("1 Penn Plaza", vec![0.0, 1.0]),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_linear_scan_picks_argmax() {
        let best = LinearScan.nearest(&[0.9, 0.1], &two_listings()).unwrap();
        assert_eq!(best.key, "18 W 38th St");

        let best = LinearScan.nearest(&[0.2, 0.8], &two_listings()).unwrap();
        assert_eq!(best.key, "1 Penn Plaza");
    }

    #[test]
    fn test_linear_scan_ties_keep_first() {
        let table: EmbeddingTable = [
            ("first", vec![0.6, 0.8]),
            ("second", vec![0.6, 0.8]),
        ]
        .into_iter()
        .collect();
        let best = LinearScan.nearest(&[1.0, 0.0], &table).unwrap();
        assert_eq!(best.key, "first");
    }

    #[test]
    fn test_linear_scan_empty() {
        assert!(LinearScan.nearest(&[1.0], &EmbeddingTable::new()).is_none());
    }

    #[tokio::test]
    async fn test_resolver_uses_question_embedding() {
        let resolver = SimilarityResolver::new(Arc::new(FixedEmbedder(vec![0.9, 0.1])));
        let m = resolver
            .resolve("what about 18 west 38th?", &two_listings())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(m.key, "18 W 38th St");
        assert!(m.score > 0.9);
    }

    #[tokio::test]
    async fn test_resolver_rejects_dimension_mismatch() {
        let resolver = SimilarityResolver::new(Arc::new(FixedEmbedder(vec![1.0, 0.0, 0.0])));
        let err = resolver
            .resolve("18 W 38th St", &two_listings())
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("question has 3 dimensions"));
        assert!(err.contains("'18 W 38th St' has 2"));
    }

    #[tokio::test]
    async fn test_resolver_empty_candidates() {
        let resolver = SimilarityResolver::new(Arc::new(crate::embedding::DisabledEmbedder));
        let m = resolver.resolve("anything", &EmbeddingTable::new()).await.unwrap();
        assert!(m.is_none());
    }
}
