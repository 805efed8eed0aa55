//! Error taxonomy shared by every layer of catalog-rag.

use thiserror::Error;

/// Errors returned by indexing, retrieval, and conversation operations.
///
/// Embedding, model, and timeout failures are transient: the caller may
/// retry, and none of them leave shared state partially mutated.
#[derive(Debug, Error)]
pub enum RagError {
    /// The embedding provider failed (network, auth, quota, bad response).
    #[error("embedding error: {0}")]
    Embedding(String),

    /// The language model output could not be read as a metadata filter.
    #[error("filter synthesis error: {0}")]
    FilterSynthesis(String),

    /// The relational table and the vector index disagree.
    #[error(
        "index inconsistency: {} id(s) missing from index, {} orphaned in index",
        missing_from_index.len(),
        orphaned_in_index.len()
    )]
    IndexInconsistency {
        missing_from_index: Vec<i64>,
        orphaned_in_index: Vec<i64>,
    },

    /// The language model failed while generating a reply or summary.
    #[error("conversation model error: {0}")]
    ConversationModel(String),

    /// An external call did not finish in time.
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: &'static str, secs: u64 },

    /// An item with this id is already indexed.
    #[error("item {0} is already indexed")]
    DuplicateItem(i64),

    /// The vector store backend failed.
    #[error("vector store error: {0}")]
    Store(String),

    /// Invalid configuration or input.
    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl RagError {
    /// Whether the failed operation may succeed if retried unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RagError::Embedding(_) | RagError::ConversationModel(_) | RagError::Timeout { .. }
        )
    }
}

impl From<serde_json::Error> for RagError {
    fn from(e: serde_json::Error) -> Self {
        RagError::Store(format!("serialization: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RagError::Embedding("quota".into()).is_transient());
        assert!(RagError::ConversationModel("503".into()).is_transient());
        assert!(RagError::Timeout {
            operation: "chat completion",
            secs: 5
        }
        .is_transient());
        assert!(!RagError::DuplicateItem(3).is_transient());
        assert!(!RagError::FilterSynthesis("prose".into()).is_transient());
    }

    #[test]
    fn test_inconsistency_message_counts() {
        let err = RagError::IndexInconsistency {
            missing_from_index: vec![1, 2],
            orphaned_in_index: vec![9],
        };
        assert_eq!(
            err.to_string(),
            "index inconsistency: 2 id(s) missing from index, 1 orphaned in index"
        );
    }
}
