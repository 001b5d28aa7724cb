use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("Vector store not initialized")]
    NotInitialized,

    #[error("Document count mismatch: {0} documents, {1} ids")]
    LengthMismatch(usize, usize),

    #[error("Backend error: {0}")]
    Backend(String),
}

pub type Metadata = Map<String, Value>;

/// Result of a similarity query, column-oriented like the backing stores
/// return it.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub ids: Vec<String>,
    pub documents: Vec<String>,
    pub metadatas: Vec<Metadata>,
    pub distances: Vec<f64>,
}

/// Consumed similarity-store interface. The engine never implements its own
/// index; backends plug in behind this trait.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn initialize(&self) -> Result<(), VectorStoreError>;

    async fn add_documents(
        &self,
        documents: &[String],
        ids: &[String],
        metadatas: &[Metadata],
    ) -> Result<(), VectorStoreError>;

    async fn query(
        &self,
        text: &str,
        top_k: usize,
        filter: Option<&Metadata>,
    ) -> Result<QueryResult, VectorStoreError>;

    async fn count(&self) -> Result<usize, VectorStoreError>;

    async fn get_sample(&self, limit: usize) -> Result<QueryResult, VectorStoreError>;

    async fn delete(&self, ids: &[String]) -> Result<usize, VectorStoreError>;
}
