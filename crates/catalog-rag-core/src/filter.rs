//! Metadata filters and the parser for model-synthesized filters.
//!
//! A [`MetadataFilter`] is a conjunction of `key == value` constraints over
//! an item's [`Metadata`]. The language model is asked to answer with the
//! filter mapping only; [`parse_filter_response`] turns that answer into a
//! filter, an explicit "no filter", or a [`RagError::FilterSynthesis`].
//!
//! # Empty filters
//!
//! An empty filter matches every item. Searching with it is therefore
//! unconstrained, but removal treats it as a no-op (see
//! [`MetadataFilter::selects_for_removal`]) so that a stray `{}` can
//! never wipe the index.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::RagError;
use crate::models::{Metadata, MetadataValue};

/// Metadata keys the index exposes for filtering.
pub const FILTERABLE_KEYS: [&str; 3] = ["id", "color", "price"];

/// Attribute name → required value. All pairs must match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataFilter(BTreeMap<String, MetadataValue>);

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetadataValue)> {
        self.0.iter()
    }

    /// True iff every key is present in `metadata` with an equal value.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.0
            .iter()
            .all(|(key, value)| metadata.get(key).is_some_and(|v| v == value))
    }

    /// Removal semantics: an empty filter selects nothing.
    pub fn selects_for_removal(&self, metadata: &Metadata) -> bool {
        !self.is_empty() && self.matches(metadata)
    }

    /// Build a filter from a JSON object of scalars.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, RagError> {
        let object = value
            .as_object()
            .ok_or_else(|| RagError::Invalid(format!("filter must be an object, got {}", value)))?;
        let mut filter = MetadataFilter::new();
        for (key, v) in object {
            let scalar = MetadataValue::from_json(v).ok_or_else(|| {
                RagError::Invalid(format!("filter value for '{}' must be a scalar", key))
            })?;
            filter.insert(key.clone(), scalar);
        }
        Ok(filter)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl fmt::Display for MetadataFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

/// Result of asking the model for a filter.
///
/// Retrieval consumes this without error handling: both
/// [`Unconstrained`](FilterOutcome::Unconstrained) and
/// [`Fallback`](FilterOutcome::Fallback) search the whole index.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOutcome {
    /// The model produced a usable filter.
    Filtered(MetadataFilter),
    /// The model said no constraint applies.
    Unconstrained,
    /// Synthesis failed; search proceeds unfiltered.
    Fallback { reason: String },
}

impl FilterOutcome {
    pub fn filter(&self) -> Option<&MetadataFilter> {
        match self {
            FilterOutcome::Filtered(f) => Some(f),
            _ => None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, FilterOutcome::Fallback { .. })
    }

    /// Classify a parse result.
    pub fn from_parse(result: Result<Option<MetadataFilter>, RagError>) -> Self {
        match result {
            Ok(Some(f)) if !f.is_empty() => FilterOutcome::Filtered(f),
            Ok(_) => FilterOutcome::Unconstrained,
            Err(e) => FilterOutcome::Fallback {
                reason: e.to_string(),
            },
        }
    }
}

/// Parse the model's answer into a filter.
///
/// Accepts a JSON object of scalar values keyed by [`FILTERABLE_KEYS`],
/// optionally wrapped in a Markdown code fence. `null`, `None` and empty
/// output mean "no filter". Anything else is a synthesis error.
pub fn parse_filter_response(raw: &str) -> Result<Option<MetadataFilter>, RagError> {
    let text = strip_code_fence(raw.trim());
    if text.is_empty() || text == "null" || text == "None" {
        return Ok(None);
    }

    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| RagError::FilterSynthesis(format!("not a JSON mapping ({}): {}", e, text)))?;

    let object = match value {
        serde_json::Value::Null => return Ok(None),
        serde_json::Value::Object(o) => o,
        other => {
            return Err(RagError::FilterSynthesis(format!(
                "expected a mapping, got {}",
                other
            )))
        }
    };

    let mut filter = MetadataFilter::new();
    for (key, value) in object {
        if !FILTERABLE_KEYS.contains(&key.as_str()) {
            return Err(RagError::FilterSynthesis(format!(
                "unknown metadata key '{}'",
                key
            )));
        }
        let scalar = MetadataValue::from_json(&value).ok_or_else(|| {
            RagError::FilterSynthesis(format!("value for '{}' is not a scalar: {}", key, value))
        })?;
        filter.insert(key, scalar);
    }

    Ok(Some(filter))
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    // Drop an info string such as `json` on the opening fence line.
    match rest.find('\n') {
        Some(pos) if !rest[..pos].trim_start().starts_with('{') => rest[pos + 1..].trim(),
        _ => rest.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gold_ring_metadata() -> Metadata {
        let mut md = Metadata::new();
        md.insert("id".into(), MetadataValue::Int(1));
        md.insert("color".into(), "gold".into());
        md.insert("price".into(), MetadataValue::Float(100.0));
        md
    }

    #[test]
    fn test_matches_all_pairs() {
        let md = gold_ring_metadata();
        assert!(MetadataFilter::new().with("color", "gold").matches(&md));
        assert!(MetadataFilter::new()
            .with("color", "gold")
            .with("price", 100i64)
            .matches(&md));
        assert!(!MetadataFilter::new()
            .with("color", "gold")
            .with("price", 90i64)
            .matches(&md));
        assert!(!MetadataFilter::new().with("size", "M").matches(&md));
    }

    #[test]
    fn test_empty_filter_matches_but_never_removes() {
        let md = gold_ring_metadata();
        let empty = MetadataFilter::new();
        assert!(empty.matches(&md));
        assert!(!empty.selects_for_removal(&md));
        assert!(MetadataFilter::new()
            .with("id", 1i64)
            .selects_for_removal(&md));
    }

    #[test]
    fn test_parse_plain_mapping() {
        let f = parse_filter_response(r#"{"color": "gold"}"#).unwrap().unwrap();
        assert_eq!(f, MetadataFilter::new().with("color", "gold"));
    }

    #[test]
    fn test_parse_fenced_mapping() {
        let f = parse_filter_response("```json\n{\"price\": 100}\n```")
            .unwrap()
            .unwrap();
        assert_eq!(f, MetadataFilter::new().with("price", 100i64));
    }

    #[test]
    fn test_parse_no_filter_sentinels() {
        assert_eq!(parse_filter_response("null").unwrap(), None);
        assert_eq!(parse_filter_response("None").unwrap(), None);
        assert_eq!(parse_filter_response("   ").unwrap(), None);
        assert_eq!(
            parse_filter_response("{}").unwrap(),
            Some(MetadataFilter::new())
        );
    }

    #[test]
    fn test_parse_rejects_prose_and_shapes() {
        assert!(matches!(
            parse_filter_response("Here is your filter: color gold"),
            Err(RagError::FilterSynthesis(_))
        ));
        assert!(parse_filter_response("[1, 2]").is_err());
        assert!(parse_filter_response(r#"{"color": ["gold"]}"#).is_err());
        assert!(parse_filter_response(r#"{"material": "silver"}"#).is_err());
        assert!(parse_filter_response("{'color': 'gold'}").is_err());
    }

    #[test]
    fn test_outcome_classification() {
        let filtered = FilterOutcome::from_parse(parse_filter_response(r#"{"id": 3}"#));
        assert_eq!(filtered.filter().unwrap().len(), 1);

        let empty = FilterOutcome::from_parse(parse_filter_response("{}"));
        assert_eq!(empty, FilterOutcome::Unconstrained);

        let fallback = FilterOutcome::from_parse(parse_filter_response("nope"));
        assert!(fallback.is_fallback());
        assert!(fallback.filter().is_none());
    }

    #[test]
    fn test_from_json_roundtrip_display() {
        let f = MetadataFilter::from_json(&serde_json::json!({"color": "gold", "price": 100}))
            .unwrap();
        assert_eq!(f.to_string(), r#"{"color":"gold","price":100}"#);
        assert!(MetadataFilter::from_json(&serde_json::json!("gold")).is_err());
    }
}
