//! # Vector Store Facade (spec.md §4.2)
//!
//! A narrow interface the core consumes; any backend implementing it
//! suffices. Every call is wrapped by the orchestrators (the retriever and
//! the reflector) in a guard that converts failures into structured
//! log-and-degrade behaviour, per spec.md's failure policy: a similarity
//! search failure returns empty, an add failure logs and continues, a
//! delete failure is recoverable as long as the subsequent add overwrites
//! by id.

use crate::types::Metadata;

/// A document as seen by the vector store: the text that gets embedded,
/// plus caller metadata.
#[derive(Debug, Clone)]
pub struct Document {
    /// Text content that was (or will be) embedded.
    pub page_content: String,
    /// Caller-supplied metadata: id, session id, timestamp, turn
    /// references, raw dialogue, etc.
    pub metadata: Metadata,
}

/// One similarity search hit.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub page_content: String,
    pub metadata: Metadata,
    /// Similarity score, if the backend reports one.
    pub score: Option<f32>,
}

/// Thin, typed surface over an external vector store.
pub trait VectorStoreFacade: Send + Sync {
    /// Returns up to `k` hits ordered by decreasing similarity to `query`.
    fn similarity_search(
        &self,
        query: &str,
        k: usize,
    ) -> impl std::future::Future<Output = Vec<SearchHit>> + Send;

    /// Inserts `documents`. Best-effort: a backend that fails to add
    /// should log and continue rather than panic.
    fn add_documents(
        &self,
        documents: Vec<Document>,
    ) -> impl std::future::Future<Output = ()> + Send;

    /// Deletes the documents with the given ids. Best-effort; backends
    /// without delete support may treat this as a no-op, relying on a
    /// subsequent add to overwrite by id.
    fn delete(&self, ids: &[String]) -> impl std::future::Future<Output = ()> + Send;
}

/// Linear-scan cosine-similarity store, kept entirely in memory.
///
/// Grounded directly in the teacher's `mem0::MemoryStore`
/// (insert/update/remove/top_similar) and `mem0::store::InMemoryStore`
/// (the search/filter shape). Production callers should substitute a real
/// ANN-backed implementation; this default exists so the crate is usable
/// and testable standalone.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    entries: async_lock::RwLock<Vec<(String, Vec<f32>, Document)>>,
    dimension: usize,
}

impl InMemoryVectorStore {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            entries: async_lock::RwLock::new(Vec::new()),
            dimension,
        }
    }

    /// Inserts a document with a precomputed embedding, bypassing the
    /// text-only `add_documents` surface. Used by callers (the retriever,
    /// the reflector) that already embedded the text and don't want to
    /// re-embed on insert.
    pub async fn insert_with_embedding(&self, embedding: Vec<f32>, document: Document) {
        let id = document
            .metadata
            .get("id")
            .cloned()
            .unwrap_or_else(|| format!("doc-{}", uuid::Uuid::new_v4()));
        self.entries.write().await.push((id, embedding, document));
    }

    async fn search_by_vector(&self, query: &[f32], k: usize) -> Vec<SearchHit> {
        if query.len() != self.dimension || k == 0 {
            return Vec::new();
        }
        let entries = self.entries.read().await;
        let mut scored: Vec<(f32, usize)> = entries
            .iter()
            .enumerate()
            .filter_map(|(i, (_, embedding, _))| {
                crate::numerics::cosine_similarity(query, embedding)
                    .ok()
                    .map(|score| (score, i))
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(k);
        scored
            .into_iter()
            .map(|(score, i)| {
                let (_, _, doc) = &entries[i];
                SearchHit {
                    page_content: doc.page_content.clone(),
                    metadata: doc.metadata.clone(),
                    score: Some(score),
                }
            })
            .collect()
    }
}

impl VectorStoreFacade for InMemoryVectorStore {
    async fn similarity_search(&self, query: &str, k: usize) -> Vec<SearchHit> {
        // The in-memory default has no embedder of its own; it matches by
        // exact page-content equality as a degenerate fallback so unit
        // tests (which pre-seed embeddings via `insert_with_embedding`)
        // can still exercise text-only lookups. Real deployments call
        // `search_by_vector` through the retriever, which already has an
        // embedded query in hand.
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|(_, _, doc)| doc.page_content == query)
            .take(k)
            .map(|(_, _, doc)| SearchHit {
                page_content: doc.page_content.clone(),
                metadata: doc.metadata.clone(),
                score: None,
            })
            .collect()
    }

    async fn add_documents(&self, documents: Vec<Document>) {
        for document in documents {
            let id = document
                .metadata
                .get("id")
                .cloned()
                .unwrap_or_else(|| format!("doc-{}", uuid::Uuid::new_v4()));
            // No embedder reference here; callers that need vector search
            // should prefer `insert_with_embedding`, or pair this store
            // with an embedder-aware wrapper.
            self.entries
                .write()
                .await
                .push((id, Vec::new(), document));
        }
    }

    async fn delete(&self, ids: &[String]) {
        let mut entries = self.entries.write().await;
        entries.retain(|(id, _, _)| !ids.contains(id));
    }
}

impl InMemoryVectorStore {
    /// Vector-aware similarity search, used by the retriever directly when
    /// it already has a query embedding in hand (spec.md §4.6 step 3).
    pub async fn similarity_search_by_vector(&self, query: &[f32], k: usize) -> Vec<SearchHit> {
        self.search_by_vector(query, k).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, content: &str) -> Document {
        let mut metadata = Metadata::new();
        metadata.insert("id".into(), id.into());
        Document {
            page_content: content.into(),
            metadata,
        }
    }

    #[tokio::test]
    async fn search_by_vector_orders_by_similarity() {
        let store = InMemoryVectorStore::new(2);
        store
            .insert_with_embedding(vec![1.0, 0.0], doc("m1", "user hiked"))
            .await;
        store
            .insert_with_embedding(vec![0.0, 1.0], doc("m2", "user cooked"))
            .await;

        let hits = store.similarity_search_by_vector(&[1.0, 0.0], 2).await;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].page_content, "user hiked");
    }

    #[tokio::test]
    async fn delete_removes_by_id() {
        let store = InMemoryVectorStore::new(2);
        store
            .insert_with_embedding(vec![1.0, 0.0], doc("m1", "user hiked"))
            .await;
        store.delete(&["m1".to_string()]).await;
        let hits = store.similarity_search_by_vector(&[1.0, 0.0], 2).await;
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn search_by_vector_dimension_mismatch_returns_empty() {
        let store = InMemoryVectorStore::new(2);
        store
            .insert_with_embedding(vec![1.0, 0.0], doc("m1", "user hiked"))
            .await;
        let hits = store.similarity_search_by_vector(&[1.0, 0.0, 0.0], 2).await;
        assert!(hits.is_empty());
    }
}
