//! Core data models used throughout catalog-rag.
//!
//! These types represent the catalog records mirrored into the vector
//! index, the indexed items themselves, chat messages, and retrieval
//! results.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::RagError;

/// A filterable scalar attached to an indexed item.
///
/// Integers and floats compare numerically, so a filter value of `100`
/// matches a stored price of `100.0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl MetadataValue {
    /// Convert a JSON value into a scalar, rejecting arrays, objects and null.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(MetadataValue::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(MetadataValue::Int)
                .or_else(|| n.as_f64().map(MetadataValue::Float)),
            serde_json::Value::String(s) => Some(MetadataValue::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            MetadataValue::Bool(b) => serde_json::Value::from(*b),
            MetadataValue::Int(i) => serde_json::Value::from(*i),
            MetadataValue::Float(f) => serde_json::Value::from(*f),
            MetadataValue::Text(s) => serde_json::Value::from(s.as_str()),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Int(i) => Some(*i as f64),
            MetadataValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl PartialEq for MetadataValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (MetadataValue::Bool(a), MetadataValue::Bool(b)) => a == b,
            (MetadataValue::Text(a), MetadataValue::Text(b)) => a == b,
            (MetadataValue::Int(a), MetadataValue::Int(b)) => a == b,
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{}", b),
            MetadataValue::Int(i) => write!(f, "{}", i),
            MetadataValue::Float(x) => write!(f, "{}", x),
            MetadataValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Int(v)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::Text(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::Text(v)
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}

/// Filterable attributes of an indexed item.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// One retrievable unit in the vector index.
///
/// `id` equals the primary key of the catalog row it mirrors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedItem {
    pub id: i64,
    pub text: String,
    pub metadata: Metadata,
}

/// A product row from the catalog, the source of every indexed item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: i64,
    pub name: String,
    pub color: String,
    pub price: f64,
    pub description: String,
}

impl ProductRecord {
    /// Natural-language description embedded into the index.
    pub fn render_text(&self) -> String {
        format!(
            "Producto: {}. Color: {}. Precio: {}. Descripción: {}.",
            self.name, self.color, self.price, self.description
        )
    }

    /// The filterable attributes: `id`, `color`, `price`.
    pub fn metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("id".to_string(), MetadataValue::Int(self.id));
        metadata.insert("color".to_string(), MetadataValue::Text(self.color.clone()));
        metadata.insert("price".to_string(), MetadataValue::Float(self.price));
        metadata
    }

    pub fn to_indexed_item(&self) -> IndexedItem {
        IndexedItem {
            id: self.id,
            text: self.render_text(),
            metadata: self.metadata(),
        }
    }
}

/// A relational row: column name to dynamically-typed value.
pub type Row = BTreeMap<String, serde_json::Value>;

impl TryFrom<&Row> for ProductRecord {
    type Error = RagError;

    fn try_from(row: &Row) -> Result<Self, Self::Error> {
        let text = |key: &str| -> Result<String, RagError> {
            match row.get(key) {
                Some(serde_json::Value::String(s)) => Ok(s.clone()),
                Some(serde_json::Value::Null) | None if key == "description" => Ok(String::new()),
                Some(other) => Err(RagError::Invalid(format!(
                    "column '{}' is not text: {}",
                    key, other
                ))),
                None => Err(RagError::Invalid(format!("missing column '{}'", key))),
            }
        };

        let id = row
            .get("id")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| RagError::Invalid("missing or non-integer column 'id'".to_string()))?;
        let price = row
            .get("price")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| RagError::Invalid("missing or non-numeric column 'price'".to_string()))?;

        Ok(ProductRecord {
            id,
            name: text("name")?,
            color: text("color")?,
            price,
            description: text("description")?,
        })
    }
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Human,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::Human => "human",
            Role::Assistant => "assistant",
        }
    }
}

/// A role-tagged message in a conversation thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self {
            role: Role::Human,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A single vector search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: i64,
    pub text: String,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f64,
}

/// Retrieval output: `ids[i]` is the item whose description is `texts[i]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Retrieval {
    pub ids: Vec<i64>,
    pub texts: Vec<String>,
}

impl Retrieval {
    pub fn from_hits(hits: Vec<SearchHit>) -> Self {
        let mut retrieval = Retrieval::default();
        for hit in hits {
            retrieval.ids.push(hit.id);
            retrieval.texts.push(hit.text);
        }
        retrieval
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring() -> ProductRecord {
        ProductRecord {
            id: 1,
            name: "Ring".to_string(),
            color: "gold".to_string(),
            price: 100.0,
            description: "x".to_string(),
        }
    }

    #[test]
    fn test_render_text_template() {
        assert_eq!(
            ring().render_text(),
            "Producto: Ring. Color: gold. Precio: 100. Descripción: x."
        );
    }

    #[test]
    fn test_metadata_keys() {
        let md = ring().metadata();
        assert_eq!(md.len(), 3);
        assert_eq!(md["id"], MetadataValue::Int(1));
        assert_eq!(md["color"], MetadataValue::from("gold"));
        assert_eq!(md["price"], MetadataValue::Float(100.0));
    }

    #[test]
    fn test_numeric_values_compare_across_kinds() {
        assert_eq!(MetadataValue::Int(100), MetadataValue::Float(100.0));
        assert_ne!(MetadataValue::Int(100), MetadataValue::Float(100.5));
        assert_ne!(MetadataValue::Float(1e-17), MetadataValue::Float(2e-17));
        assert_ne!(MetadataValue::Int(0), MetadataValue::Float(1e-20));
        assert_ne!(MetadataValue::Int(1), MetadataValue::Text("1".into()));
        assert_ne!(MetadataValue::Bool(true), MetadataValue::Int(1));
    }

    #[test]
    fn test_from_json_rejects_compound_values() {
        assert!(MetadataValue::from_json(&serde_json::json!([1, 2])).is_none());
        assert!(MetadataValue::from_json(&serde_json::json!({"a": 1})).is_none());
        assert!(MetadataValue::from_json(&serde_json::Value::Null).is_none());
        assert_eq!(
            MetadataValue::from_json(&serde_json::json!(2.5)),
            Some(MetadataValue::Float(2.5))
        );
    }

    #[test]
    fn test_retrieval_is_index_aligned() {
        let r = Retrieval::from_hits(vec![
            SearchHit {
                id: 4,
                text: "four".into(),
                score: 0.9,
            },
            SearchHit {
                id: 2,
                text: "two".into(),
                score: 0.5,
            },
        ]);
        assert_eq!(r.ids, vec![4, 2]);
        assert_eq!(r.texts, vec!["four".to_string(), "two".to_string()]);
    }

    #[test]
    fn test_product_from_row() {
        let mut row = Row::new();
        row.insert("id".into(), serde_json::json!(1));
        row.insert("name".into(), serde_json::json!("Ring"));
        row.insert("color".into(), serde_json::json!("gold"));
        row.insert("price".into(), serde_json::json!(100));
        row.insert("description".into(), serde_json::Value::Null);
        row.insert("create_date".into(), serde_json::json!("2024-01-01T00:00:00Z"));

        let record = ProductRecord::try_from(&row).unwrap();
        assert_eq!(record.price, 100.0);
        assert_eq!(record.description, "");

        row.remove("color");
        assert!(matches!(
            ProductRecord::try_from(&row),
            Err(RagError::Invalid(_))
        ));
    }
}
