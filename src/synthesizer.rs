//! Query filter synthesis.
//!
//! Asks the chat model to turn a free-text question into a metadata
//! filter over the indexed keys (`id`, `color`, `price`). The call never
//! fails from the caller's point of view: a model error, a timeout, or an
//! unparseable answer all become [`FilterOutcome::Fallback`], and retrieval
//! proceeds unfiltered.

use std::sync::Arc;
use std::time::Duration;

use catalog_rag_core::filter::{parse_filter_response, FilterOutcome};
use catalog_rag_core::llm::ChatModel;
use catalog_rag_core::models::ChatMessage;
use catalog_rag_core::RagError;

/// Instruction describing the metadata keys and the output contract.
pub const FILTER_INSTRUCTION: &str = "Vas a recibir preguntas para buscar por similitud en un \
catálogo de productos. Los metadatos disponibles son id, color y price. Necesito que me devuelvas \
un filtro con los metadatos necesarios para aplicarlo en la búsqueda por similitud, usando \
exactamente esas claves. Si la pregunta no restringe ningún metadato devuelve null. Devuelve \
únicamente el diccionario y nada más, no indiques que es un json o un diccionario, devuelve solo \
el diccionario.";

pub struct FilterSynthesizer {
    model: Arc<dyn ChatModel>,
    timeout: Duration,
}

impl FilterSynthesizer {
    pub fn new(model: Arc<dyn ChatModel>, timeout_secs: u64) -> Self {
        Self {
            model,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// The two-message request sent for `query`.
    pub fn request(query: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(FILTER_INSTRUCTION),
            ChatMessage::human(format!("Pregunta: {}", query)),
        ]
    }

    /// Translate `query` into a filter, degrading to no filter on failure.
    pub async fn synthesize(&self, query: &str) -> FilterOutcome {
        let outcome = match self.ask(query).await {
            Ok(raw) => {
                log::debug!("filter model answered: {}", raw.trim());
                FilterOutcome::from_parse(parse_filter_response(&raw))
            }
            Err(e) => FilterOutcome::Fallback {
                reason: e.to_string(),
            },
        };

        if let FilterOutcome::Fallback { reason } = &outcome {
            log::warn!("filter synthesis failed, searching unfiltered: {}", reason);
        }
        outcome
    }

    async fn ask(&self, query: &str) -> Result<String, RagError> {
        let request = Self::request(query);
        match tokio::time::timeout(self.timeout, self.model.complete(&request)).await {
            Ok(result) => result,
            Err(_) => Err(RagError::Timeout {
                operation: "filter synthesis",
                secs: self.timeout.as_secs(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use catalog_rag_core::filter::MetadataFilter;

    struct Fixed(Result<String, String>);

    #[async_trait]
    impl ChatModel for Fixed {
        fn model_name(&self) -> &str {
            "fixed"
        }
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, RagError> {
            self.0.clone().map_err(RagError::ConversationModel)
        }
    }

    struct Slow;

    #[async_trait]
    impl ChatModel for Slow {
        fn model_name(&self) -> &str {
            "slow"
        }
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, RagError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("{}".to_string())
        }
    }

    fn synth(answer: Result<&str, &str>) -> FilterSynthesizer {
        let answer = answer.map(str::to_string).map_err(str::to_string);
        FilterSynthesizer::new(Arc::new(Fixed(answer)), 5)
    }

    #[test]
    fn test_request_shape() {
        let req = FilterSynthesizer::request("anillo dorado");
        assert_eq!(req.len(), 2);
        assert_eq!(req[1].content, "Pregunta: anillo dorado");
        assert!(req[0].content.contains("id, color y price"));
    }

    #[tokio::test]
    async fn test_parsed_filter() {
        let outcome = synth(Ok("{\"color\": \"gold\"}")).synthesize("gold ring").await;
        assert_eq!(
            outcome,
            FilterOutcome::Filtered(MetadataFilter::new().with("color", "gold"))
        );
    }

    #[tokio::test]
    async fn test_null_is_unconstrained() {
        let outcome = synth(Ok("null")).synthesize("anything").await;
        assert_eq!(outcome, FilterOutcome::Unconstrained);
    }

    #[tokio::test]
    async fn test_garbage_falls_back() {
        let outcome = synth(Ok("Claro, aquí tienes el filtro")).synthesize("q").await;
        assert!(outcome.is_fallback());
        assert!(outcome.filter().is_none());
    }

    #[tokio::test]
    async fn test_model_error_falls_back() {
        let outcome = synth(Err("quota exceeded")).synthesize("q").await;
        assert!(outcome.is_fallback());
    }

    #[tokio::test]
    async fn test_timeout_falls_back() {
        let synth = FilterSynthesizer::new(Arc::new(Slow), 1);
        match synth.synthesize("q").await {
            FilterOutcome::Fallback { reason } => assert!(reason.contains("timed out")),
            other => panic!("expected fallback, got {:?}", other),
        }
    }
}
