use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::OnceCell;

use crate::vectorstore::{chunk_hierarchical, Metadata, VectorStore};

use super::{
    optional_u64, required_str, ParameterKind, Tool, ToolCategory, ToolDefinition, ToolError,
    ToolParameter,
};

const DEFAULT_TOP_K: usize = 5;

/// Document indexing and semantic retrieval over the consumed vector store.
///
/// Indexing chunks each document hierarchically with deterministic chunk
/// IDs, so re-ingesting a document is a no-op rather than a duplicate.
pub struct RagTool {
    store: Arc<dyn VectorStore>,
    initialized: OnceCell<()>,
}

impl RagTool {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self {
            store,
            initialized: OnceCell::new(),
        }
    }

    async fn ensure_initialized(&self) -> Result<(), ToolError> {
        self.initialized
            .get_or_try_init(|| async {
                self.store
                    .initialize()
                    .await
                    .map_err(ToolError::execution)
            })
            .await?;
        Ok(())
    }

    async fn index(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let documents = args
            .get("documents")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ToolError::Validation("Missing required parameter: documents".into())
            })?;

        let mut chunk_texts = Vec::new();
        let mut chunk_ids = Vec::new();
        let mut chunk_metas = Vec::new();
        let mut indexed_docs = 0usize;

        for (i, document) in documents.iter().enumerate() {
            let content = document["content"].as_str().ok_or_else(|| {
                ToolError::Validation(format!("Document {i} is missing 'content'"))
            })?;
            let title = document["title"].as_str().unwrap_or("untitled");
            let doc_id = document["id"].as_str().map(str::to_string).unwrap_or_else(|| {
                format!("doc-{title}")
            });

            for chunk in chunk_hierarchical(content, &doc_id) {
                let mut metadata = document["metadata"]
                    .as_object()
                    .cloned()
                    .unwrap_or_default();
                metadata.insert("doc_id".into(), json!(chunk.doc_id));
                metadata.insert("title".into(), json!(title));
                metadata.insert("level".into(), json!(format!("{:?}", chunk.level).to_lowercase()));

                chunk_texts.push(chunk.text);
                chunk_ids.push(chunk.chunk_id);
                chunk_metas.push(metadata);
            }
            indexed_docs += 1;
        }

        self.store
            .add_documents(&chunk_texts, &chunk_ids, &chunk_metas)
            .await
            .map_err(ToolError::execution)?;

        Ok(json!({
            "indexed_documents": indexed_docs,
            "indexed_chunks": chunk_ids.len(),
        }))
    }

    async fn query(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let query = required_str(args, "query")?;
        let top_k = optional_u64(args, "top_k")
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_TOP_K);
        let filter: Option<Metadata> = args
            .get("filter_metadata")
            .and_then(Value::as_object)
            .cloned();

        let result = self
            .store
            .query(query, top_k, filter.as_ref())
            .await
            .map_err(ToolError::execution)?;

        let hits: Vec<Value> = result
            .ids
            .iter()
            .zip(&result.documents)
            .zip(&result.metadatas)
            .zip(&result.distances)
            .map(|(((id, document), metadata), distance)| {
                json!({
                    "id": id,
                    "document": document,
                    "metadata": metadata,
                    "distance": distance,
                })
            })
            .collect();

        Ok(json!({ "query": query, "results": hits }))
    }

    async fn delete(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let ids: Vec<String> = args
            .get("document_ids")
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .ok_or_else(|| {
                ToolError::Validation("Missing required parameter: document_ids".into())
            })?;

        let removed = self.store.delete(&ids).await.map_err(ToolError::execution)?;
        Ok(json!({ "deleted": removed }))
    }

    async fn list(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let limit = optional_u64(args, "top_k").map(|n| n as usize).unwrap_or(20);
        let sample = self
            .store
            .get_sample(limit)
            .await
            .map_err(ToolError::execution)?;
        let total = self.store.count().await.map_err(ToolError::execution)?;

        Ok(json!({
            "count": total,
            "sample_ids": sample.ids,
        }))
    }
}

#[async_trait]
impl Tool for RagTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "rag_query",
            "Search indexed documents semantically; can also index, list and delete documents",
            ToolCategory::Rag,
        )
        .with_parameters([
            ToolParameter::new("action", ParameterKind::String)
                .description("Action to perform")
                .one_of([json!("query"), json!("index"), json!("list"), json!("delete")]),
            ToolParameter::new("query", ParameterKind::String)
                .description("Search query (for action=query)")
                .optional(),
            ToolParameter::new("documents", ParameterKind::Array)
                .description("Documents to index; each needs 'content', optional 'title'/'id'/'metadata'")
                .optional(),
            ToolParameter::new("top_k", ParameterKind::Number)
                .description("Number of results to return (default 5)")
                .optional(),
            ToolParameter::new("filter_metadata", ParameterKind::Object)
                .description("Metadata equality filter for queries")
                .optional(),
            ToolParameter::new("document_ids", ParameterKind::Array)
                .description("Chunk ids to delete (for action=delete)")
                .optional(),
        ])
        .with_returns(json!({ "results": "Action-dependent result object" }))
    }

    async fn run(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        self.ensure_initialized().await?;

        match required_str(args, "action")? {
            "query" => self.query(args).await,
            "index" => self.index(args).await,
            "list" => self.list(args).await,
            "delete" => self.delete(args).await,
            other => Err(ToolError::Validation(format!("Unknown action: {other}"))),
        }
    }
}
