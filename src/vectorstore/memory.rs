use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Metadata, QueryResult, VectorStore, VectorStoreError};

#[derive(Debug, Clone)]
struct Entry {
    id: String,
    document: String,
    metadata: Metadata,
}

/// In-memory store scoring by token overlap.
///
/// Not an index — it exists so the engine can run (and be tested) without an
/// external backend. Insertion order is preserved; re-adding an existing id
/// replaces the entry instead of duplicating it.
#[derive(Default)]
pub struct InMemoryVectorStore {
    entries: RwLock<Option<Vec<Entry>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tokens(text: &str) -> HashSet<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn similarity(query: &HashSet<String>, document: &str) -> f64 {
        let doc_tokens = Self::tokens(document);
        if query.is_empty() || doc_tokens.is_empty() {
            return 0.0;
        }
        let shared = query.intersection(&doc_tokens).count() as f64;
        let union = query.union(&doc_tokens).count() as f64;
        shared / union
    }

    fn matches_filter(metadata: &Metadata, filter: Option<&Metadata>) -> bool {
        match filter {
            Some(filter) => filter.iter().all(|(k, v)| metadata.get(k) == Some(v)),
            None => true,
        }
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn initialize(&self) -> Result<(), VectorStoreError> {
        let mut entries = self.entries.write().await;
        if entries.is_none() {
            *entries = Some(Vec::new());
        }
        Ok(())
    }

    async fn add_documents(
        &self,
        documents: &[String],
        ids: &[String],
        metadatas: &[Metadata],
    ) -> Result<(), VectorStoreError> {
        if documents.len() != ids.len() {
            return Err(VectorStoreError::LengthMismatch(
                documents.len(),
                ids.len(),
            ));
        }

        let mut guard = self.entries.write().await;
        let entries = guard.as_mut().ok_or(VectorStoreError::NotInitialized)?;

        for (i, (document, id)) in documents.iter().zip(ids).enumerate() {
            let metadata = metadatas.get(i).cloned().unwrap_or_default();
            let entry = Entry {
                id: id.clone(),
                document: document.clone(),
                metadata,
            };
            match entries.iter_mut().find(|e| &e.id == id) {
                Some(existing) => *existing = entry,
                None => entries.push(entry),
            }
        }
        Ok(())
    }

    async fn query(
        &self,
        text: &str,
        top_k: usize,
        filter: Option<&Metadata>,
    ) -> Result<QueryResult, VectorStoreError> {
        let guard = self.entries.read().await;
        let entries = guard.as_ref().ok_or(VectorStoreError::NotInitialized)?;

        let query_tokens = Self::tokens(text);
        let mut scored: Vec<(&Entry, f64)> = entries
            .iter()
            .filter(|e| Self::matches_filter(&e.metadata, filter))
            .map(|e| (e, Self::similarity(&query_tokens, &e.document)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        let mut result = QueryResult::default();
        for (entry, similarity) in scored {
            result.ids.push(entry.id.clone());
            result.documents.push(entry.document.clone());
            result.metadatas.push(entry.metadata.clone());
            result.distances.push(1.0 - similarity);
        }
        Ok(result)
    }

    async fn count(&self) -> Result<usize, VectorStoreError> {
        let guard = self.entries.read().await;
        let entries = guard.as_ref().ok_or(VectorStoreError::NotInitialized)?;
        Ok(entries.len())
    }

    async fn get_sample(&self, limit: usize) -> Result<QueryResult, VectorStoreError> {
        let guard = self.entries.read().await;
        let entries = guard.as_ref().ok_or(VectorStoreError::NotInitialized)?;

        let mut result = QueryResult::default();
        for entry in entries.iter().take(limit) {
            result.ids.push(entry.id.clone());
            result.documents.push(entry.document.clone());
            result.metadatas.push(entry.metadata.clone());
            result.distances.push(0.0);
        }
        Ok(result)
    }

    async fn delete(&self, ids: &[String]) -> Result<usize, VectorStoreError> {
        let mut guard = self.entries.write().await;
        let entries = guard.as_mut().ok_or(VectorStoreError::NotInitialized)?;

        let before = entries.len();
        entries.retain(|e| !ids.contains(&e.id));
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::vectorstore::chunk_hierarchical;

    use super::*;

    async fn store_with(documents: &[(&str, &str)]) -> InMemoryVectorStore {
        let store = InMemoryVectorStore::new();
        store.initialize().await.unwrap();
        let docs: Vec<String> = documents.iter().map(|(_, d)| d.to_string()).collect();
        let ids: Vec<String> = documents.iter().map(|(id, _)| id.to_string()).collect();
        let metas = vec![Metadata::new(); docs.len()];
        store.add_documents(&docs, &ids, &metas).await.unwrap();
        store
    }

    #[tokio::test]
    async fn uninitialized_store_errors() {
        let store = InMemoryVectorStore::new();
        assert!(matches!(
            store.count().await,
            Err(VectorStoreError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn query_ranks_by_overlap() {
        let store = store_with(&[
            ("a", "rust async runtime internals"),
            ("b", "gardening tips for spring"),
            ("c", "async rust tasks and executors"),
        ])
        .await;

        let result = store.query("rust async", 2, None).await.unwrap();
        assert_eq!(result.ids.len(), 2);
        assert!(result.ids.contains(&"a".to_string()));
        assert!(result.ids.contains(&"c".to_string()));
        assert!(result.distances[0] <= result.distances[1]);
    }

    #[tokio::test]
    async fn metadata_filter_restricts_results() {
        let store = InMemoryVectorStore::new();
        store.initialize().await.unwrap();
        let mut meta_plan = Metadata::new();
        meta_plan.insert("kind".into(), json!("plan"));
        store
            .add_documents(
                &["successful deployment plan".into(), "random note".into()],
                &["p1".into(), "n1".into()],
                &[meta_plan.clone(), Metadata::new()],
            )
            .await
            .unwrap();

        let result = store
            .query("plan", 10, Some(&meta_plan))
            .await
            .unwrap();
        assert_eq!(result.ids, vec!["p1"]);
    }

    #[tokio::test]
    async fn reingestion_is_idempotent() {
        let store = InMemoryVectorStore::new();
        store.initialize().await.unwrap();

        let text = "First sentence. Second one!\n\nAnother paragraph.";
        for _ in 0..2 {
            let chunks = chunk_hierarchical(text, "doc-1");
            let docs: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            let ids: Vec<String> = chunks.iter().map(|c| c.chunk_id.clone()).collect();
            let metas = vec![Metadata::new(); docs.len()];
            store.add_documents(&docs, &ids, &metas).await.unwrap();
        }

        let chunks = chunk_hierarchical(text, "doc-1");
        assert_eq!(store.count().await.unwrap(), chunks.len());
    }

    #[tokio::test]
    async fn delete_removes_by_id() {
        let store = store_with(&[("a", "one"), ("b", "two")]).await;
        let removed = store.delete(&["a".to_string(), "zz".to_string()]).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
