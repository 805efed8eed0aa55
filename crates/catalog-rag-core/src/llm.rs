//! Chat model trait.
//!
//! Every language-model interaction in catalog-rag (filter synthesis,
//! summarization, reply generation) is a single prompt/response call
//! through [`ChatModel::complete`].

use async_trait::async_trait;

use crate::error::RagError;
use crate::models::ChatMessage;

/// A chat-completion language model.
///
/// Calls block on external I/O and are not deterministic. Implementations
/// report failures as [`RagError::ConversationModel`].
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Returns the model or deployment identifier.
    fn model_name(&self) -> &str;

    /// Send `messages` in order and return the assistant's reply text.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, RagError>;
}
