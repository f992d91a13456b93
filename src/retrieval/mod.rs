//! Vector-store backend and retrieval plumbing.
//!
//! The fabric talks to its document store through the [`VectorStore`]
//! trait; [`InMemoryVectorStore`] is the shipped backend. Scoring is
//! deliberately simple: term-frequency cosine for the vector side,
//! idf-weighted term overlap for the keyword side, and a convex
//! combination for hybrid search.

pub mod chunker;

pub use chunker::TextChunker;

use crate::{
    config::RetrieverConfig,
    models::ValueMap,
    FabricError, Result,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

const DEFAULT_NAMESPACE: &str = "default";

/// One scored retrieval hit
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub document_id: String,
    pub content: String,
    pub score: f32,
    pub metadata: ValueMap,
}

/// Document store contract
///
/// `alpha` for hybrid search lies in [0, 1]: 0 is pure vector similarity,
/// 1 is pure keyword scoring. Transport failures surface as errors here
/// and are mapped to empty result lists by callers; they never poison
/// Controller state.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Store chunks with their metadata. `metadatas` must be empty or the
    /// same length as `chunks`; returns the assigned document ids.
    async fn add_documents(
        &self,
        chunks: Vec<String>,
        metadatas: Vec<ValueMap>,
        namespace: Option<&str>,
    ) -> Result<Vec<String>>;

    async fn similarity_search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&ValueMap>,
        namespace: Option<&str>,
    ) -> Result<Vec<SearchResult>>;

    async fn hybrid_search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&ValueMap>,
        namespace: Option<&str>,
        alpha: f32,
    ) -> Result<Vec<SearchResult>>;

    async fn delete_documents(&self, ids: &[String], namespace: Option<&str>) -> Result<usize>;

    async fn delete_documents_by_filter(
        &self,
        filter: &ValueMap,
        namespace: Option<&str>,
    ) -> Result<usize>;

    async fn stats(&self) -> Result<ValueMap>;
}

#[derive(Debug, Clone)]
struct StoredDocument {
    id: String,
    content: String,
    metadata: ValueMap,
    terms: HashMap<String, f32>,
    norm: f32,
}

impl StoredDocument {
    fn matches(&self, filter: Option<&ValueMap>) -> bool {
        filter
            .map(|f| f.iter().all(|(k, v)| self.metadata.get(k) == Some(v)))
            .unwrap_or(true)
    }
}

/// In-process vector store with namespaces and equality filters
#[derive(Clone, Default)]
pub struct InMemoryVectorStore {
    namespaces: Arc<RwLock<HashMap<String, Vec<StoredDocument>>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn scored(
        documents: &[StoredDocument],
        query: &str,
        filter: Option<&ValueMap>,
        alpha: f32,
    ) -> Vec<(usize, f32)> {
        let query_terms = term_frequencies(query);
        if query_terms.is_empty() {
            return Vec::new();
        }
        let query_norm = norm(&query_terms);
        let candidates: Vec<usize> = (0..documents.len())
            .filter(|&i| documents[i].matches(filter))
            .collect();

        // Document frequency over the filtered candidate set.
        let mut document_frequency: HashMap<&str, usize> = HashMap::new();
        for &i in &candidates {
            for term in documents[i].terms.keys() {
                if query_terms.contains_key(term.as_str()) {
                    *document_frequency.entry(term.as_str()).or_insert(0) += 1;
                }
            }
        }
        let total = candidates.len().max(1) as f32;

        let mut vector_scores = Vec::with_capacity(candidates.len());
        let mut keyword_scores = Vec::with_capacity(candidates.len());
        for &i in &candidates {
            let doc = &documents[i];
            let mut dot = 0.0f32;
            let mut keyword = 0.0f32;
            for (term, query_tf) in &query_terms {
                if let Some(doc_tf) = doc.terms.get(term) {
                    dot += query_tf * doc_tf;
                    let df = document_frequency.get(term.as_str()).copied().unwrap_or(0) as f32;
                    let idf = (1.0 + total / (1.0 + df)).ln();
                    keyword += idf * doc_tf;
                }
            }
            let cosine = if doc.norm > 0.0 && query_norm > 0.0 {
                dot / (doc.norm * query_norm)
            } else {
                0.0
            };
            vector_scores.push(cosine);
            keyword_scores.push(keyword);
        }

        // Normalise both sides to [0, 1] before the convex combination so
        // alpha weighs comparable magnitudes.
        normalise(&mut vector_scores);
        normalise(&mut keyword_scores);

        let mut scored: Vec<(usize, f32)> = candidates
            .iter()
            .enumerate()
            .map(|(j, &i)| (i, alpha * keyword_scores[j] + (1.0 - alpha) * vector_scores[j]))
            .filter(|(_, score)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
    }

    fn collect(
        documents: &[StoredDocument],
        scored: Vec<(usize, f32)>,
        top_k: usize,
    ) -> Vec<SearchResult> {
        scored
            .into_iter()
            .take(top_k)
            .map(|(i, score)| {
                let doc = &documents[i];
                SearchResult {
                    document_id: doc.id.clone(),
                    content: doc.content.clone(),
                    score,
                    metadata: doc.metadata.clone(),
                }
            })
            .collect()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn add_documents(
        &self,
        chunks: Vec<String>,
        metadatas: Vec<ValueMap>,
        namespace: Option<&str>,
    ) -> Result<Vec<String>> {
        if !metadatas.is_empty() && metadatas.len() != chunks.len() {
            return Err(FabricError::Validation(format!(
                "metadatas length {} does not match chunks length {}",
                metadatas.len(),
                chunks.len()
            )));
        }
        let namespace = namespace.unwrap_or(DEFAULT_NAMESPACE).to_string();
        let mut metadatas = metadatas.into_iter();
        let mut ids = Vec::with_capacity(chunks.len());

        let mut namespaces = self.namespaces.write().await;
        let documents = namespaces.entry(namespace.clone()).or_default();
        for content in chunks {
            let terms = term_frequencies(&content);
            let norm = norm(&terms);
            let id = Uuid::new_v4().to_string();
            ids.push(id.clone());
            documents.push(StoredDocument {
                id,
                content,
                metadata: metadatas.next().unwrap_or_default(),
                terms,
                norm,
            });
        }
        debug!(namespace = %namespace, added = ids.len(), "documents indexed");
        Ok(ids)
    }

    async fn similarity_search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&ValueMap>,
        namespace: Option<&str>,
    ) -> Result<Vec<SearchResult>> {
        self.hybrid_search(query, top_k, filter, namespace, 0.0)
            .await
    }

    async fn hybrid_search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&ValueMap>,
        namespace: Option<&str>,
        alpha: f32,
    ) -> Result<Vec<SearchResult>> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(FabricError::Validation(format!(
                "hybrid alpha must lie in [0, 1], got {alpha}"
            )));
        }
        let namespaces = self.namespaces.read().await;
        let Some(documents) = namespaces.get(namespace.unwrap_or(DEFAULT_NAMESPACE)) else {
            return Ok(Vec::new());
        };
        let scored = Self::scored(documents, query, filter, alpha);
        Ok(Self::collect(documents, scored, top_k))
    }

    async fn delete_documents(&self, ids: &[String], namespace: Option<&str>) -> Result<usize> {
        let mut namespaces = self.namespaces.write().await;
        let Some(documents) = namespaces.get_mut(namespace.unwrap_or(DEFAULT_NAMESPACE)) else {
            return Ok(0);
        };
        let before = documents.len();
        documents.retain(|doc| !ids.contains(&doc.id));
        Ok(before - documents.len())
    }

    async fn delete_documents_by_filter(
        &self,
        filter: &ValueMap,
        namespace: Option<&str>,
    ) -> Result<usize> {
        let mut namespaces = self.namespaces.write().await;
        let Some(documents) = namespaces.get_mut(namespace.unwrap_or(DEFAULT_NAMESPACE)) else {
            return Ok(0);
        };
        let before = documents.len();
        documents.retain(|doc| !doc.matches(Some(filter)));
        Ok(before - documents.len())
    }

    async fn stats(&self) -> Result<ValueMap> {
        let namespaces = self.namespaces.read().await;
        let documents: usize = namespaces.values().map(Vec::len).sum();
        let terms: usize = namespaces
            .values()
            .flatten()
            .map(|doc| doc.terms.len())
            .sum();

        let mut stats = ValueMap::new();
        stats.insert("documents".to_string(), serde_json::json!(documents));
        stats.insert(
            "namespaces".to_string(),
            serde_json::json!(namespaces.len()),
        );
        stats.insert("indexed_terms".to_string(), serde_json::json!(terms));
        Ok(stats)
    }
}

/// Config-bound retrieval front door used by the QA agent
#[derive(Clone)]
pub struct Retriever {
    store: Arc<dyn VectorStore>,
    config: RetrieverConfig,
}

impl Retriever {
    pub fn new(store: Arc<dyn VectorStore>, config: RetrieverConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Retrieve with the configured strategy, top-k and alpha.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: Option<usize>,
        namespace: Option<&str>,
    ) -> Result<Vec<SearchResult>> {
        let top_k = top_k.unwrap_or(self.config.top_k);
        if self.config.use_hybrid_search {
            self.store
                .hybrid_search(query, top_k, None, namespace, self.config.alpha)
                .await
        } else {
            self.store
                .similarity_search(query, top_k, None, namespace)
                .await
        }
    }
}

fn term_frequencies(text: &str) -> HashMap<String, f32> {
    let mut counts: HashMap<String, f32> = HashMap::new();
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
    {
        *counts.entry(token.to_string()).or_insert(0.0) += 1.0;
    }
    counts
}

fn norm(terms: &HashMap<String, f32>) -> f32 {
    terms.values().map(|v| v * v).sum::<f32>().sqrt()
}

fn normalise(scores: &mut [f32]) {
    let max = scores.iter().copied().fold(0.0f32, f32::max);
    if max > 0.0 {
        for score in scores.iter_mut() {
            *score /= max;
        }
    }
}
