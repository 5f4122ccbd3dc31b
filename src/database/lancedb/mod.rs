// LanceDB vector database module
// Per-tenant document embeddings with metadata filtering

#[cfg(test)]
mod tests;

pub mod vector_store;

use serde::{Deserialize, Serialize};

pub use vector_store::VectorStore;

/// Embedding plus the metadata needed to filter it without re-embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Deterministic `{tenant}_{visitor}_{source}_{index}` identifier
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: VectorMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorMetadata {
    pub tenant_id: String,
    pub visitor_id: String,
    pub product: Option<String>,
    /// Intent label the text answers (benefits, pricing, ...)
    pub field: Option<String>,
    pub text: String,
    pub filename: String,
    pub created_at: String,
}

/// Similarity hit, best first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    pub metadata: VectorMetadata,
    pub score: f32,
}

/// Record as stored, without its embedding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    pub metadata: VectorMetadata,
}

/// Optional equality constraints applied on top of the tenant namespace
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MetadataFilter {
    pub product: Option<String>,
    pub field: Option<String>,
    pub visitor_id: Option<String>,
}

impl MetadataFilter {
    #[inline]
    pub fn product(product: &str) -> Self {
        Self {
            product: Some(product.to_string()),
            ..Self::default()
        }
    }

    #[inline]
    pub fn product_field(product: &str, field: &str) -> Self {
        Self {
            product: Some(product.to_string()),
            field: Some(field.to_string()),
            ..Self::default()
        }
    }

    #[inline]
    pub fn visitor(visitor_id: &str) -> Self {
        Self {
            visitor_id: Some(visitor_id.to_string()),
            ..Self::default()
        }
    }

    /// SQL predicate for LanceDB; the tenant clause is always present
    #[inline]
    pub fn predicate(&self, namespace: &str) -> String {
        let mut clauses = vec![format!("tenant_id = {}", quote(namespace))];
        if let Some(product) = &self.product {
            clauses.push(format!("product = {}", quote(product)));
        }
        if let Some(field) = &self.field {
            clauses.push(format!("field = {}", quote(field)));
        }
        if let Some(visitor_id) = &self.visitor_id {
            clauses.push(format!("visitor_id = {}", quote(visitor_id)));
        }
        clauses.join(" AND ")
    }
}

/// Single-quoted SQL string literal
pub(crate) fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
