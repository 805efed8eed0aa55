//! Filtered retrieval over the whole corpus.
//!
//! A query first goes through the [`FilterSynthesizer`], then to
//! [`VectorIndex::search`] with the resulting filter. By default `k` is the
//! current index size, so every item satisfying the filter is returned,
//! ranked by similarity. Setting `retrieval.top_k` bounds the result
//! instead; this scales better but trades completeness for it.

use std::sync::Arc;

use catalog_rag_core::filter::FilterOutcome;
use catalog_rag_core::models::Retrieval;
use catalog_rag_core::RagError;

use crate::index::VectorIndex;
use crate::synthesizer::FilterSynthesizer;

pub struct Retriever {
    index: Arc<VectorIndex>,
    synthesizer: FilterSynthesizer,
    top_k: usize,
}

impl Retriever {
    /// `top_k == 0` searches the whole index.
    pub fn new(index: Arc<VectorIndex>, synthesizer: FilterSynthesizer, top_k: usize) -> Self {
        Self {
            index,
            synthesizer,
            top_k,
        }
    }

    /// Aligned ids and texts of the items matching `query`.
    ///
    /// Filter synthesis failures never surface here. Only embedding and
    /// store errors do.
    pub async fn retrieve(&self, query: &str) -> Result<Retrieval, RagError> {
        let size = self.index.len().await?;
        if size == 0 {
            log::debug!("retrieve on empty index");
            return Ok(Retrieval::default());
        }

        let k = match self.top_k {
            0 => size,
            n => n.min(size),
        };

        let outcome = self.synthesizer.synthesize(query).await;
        if let FilterOutcome::Filtered(filter) = &outcome {
            log::debug!("retrieving with filter {}", filter);
        }

        let hits = self.index.search(query, k, outcome.filter()).await?;
        log::debug!("retrieved {} of {} item(s)", hits.len(), size);
        Ok(Retrieval::from_hits(hits))
    }
}
