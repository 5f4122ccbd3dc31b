
use std::time::Duration;
use tracing::{debug, warn};

use super::{Embedder, Intent, VectorIndex, bounded};
use crate::Result;
use crate::database::lancedb::{MetadataFilter, VectorMatch};

/// Context assembled for one resolved product
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductContext {
    pub product: String,
    /// `None` when the store had nothing for this product
    pub context: Option<String>,
}

/// Metadata-filtered retrieval with one relaxation step
pub struct ContextRetriever<'a> {
    vectors: &'a dyn VectorIndex,
    embedder: &'a dyn Embedder,
    top_k: usize,
    snippet_chars: usize,
    timeout: Duration,
}

impl<'a> ContextRetriever<'a> {
    #[inline]
    pub fn new(
        vectors: &'a dyn VectorIndex,
        embedder: &'a dyn Embedder,
        top_k: usize,
        snippet_chars: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            vectors,
            embedder,
            top_k,
            snippet_chars,
            timeout,
        }
    }

    /// One entry per product, same order as `products`
    #[inline]
    pub async fn retrieve(
        &self,
        tenant_id: &str,
        message: &str,
        products: &[String],
        intent: Option<Intent>,
    ) -> Result<Vec<ProductContext>> {
        let query_vector = bounded(self.timeout, "embedding", self.embedder.embed(message)).await?;

        let mut contexts = Vec::with_capacity(products.len());
        for product in products {
            let matches = self
                .matches_for(tenant_id, &query_vector, product, intent)
                .await?;
            let context = (!matches.is_empty()).then(|| self.format_context(&matches));
            if context.is_none() {
                warn!("No stored context for product {} of tenant {}", product, tenant_id);
            }
            contexts.push(ProductContext {
                product: product.clone(),
                context,
            });
        }

        Ok(contexts)
    }

    async fn matches_for(
        &self,
        tenant_id: &str,
        query_vector: &[f32],
        product: &str,
        intent: Option<Intent>,
    ) -> Result<Vec<VectorMatch>> {
        if let Some(intent) = intent {
            let filter = MetadataFilter::product_field(product, intent.label());
            let matches = self.query(tenant_id, query_vector, &filter).await?;
            if !matches.is_empty() {
                return Ok(matches);
            }
            debug!(
                "No {} records for {}, retrying without the field filter",
                intent, product
            );
        }

        self.query(tenant_id, query_vector, &MetadataFilter::product(product))
            .await
    }

    async fn query(
        &self,
        tenant_id: &str,
        query_vector: &[f32],
        filter: &MetadataFilter,
    ) -> Result<Vec<VectorMatch>> {
        bounded(
            self.timeout,
            "vector query",
            self.vectors.query(tenant_id, query_vector, self.top_k, filter),
        )
        .await
    }

    /// `PRODUCT / FIELD / TEXT` blocks in store order, each text capped
    fn format_context(&self, matches: &[VectorMatch]) -> String {
        matches
            .iter()
            .map(|m| {
                format!(
                    "PRODUCT: {}\nFIELD: {}\nTEXT: {}",
                    m.metadata.product.as_deref().unwrap_or("unknown"),
                    m.metadata.field.as_deref().unwrap_or("general"),
                    truncate_chars(&m.metadata.text, self.snippet_chars)
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// At most `max_chars` characters, never splitting a code point
#[inline]
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => text.get(..byte_index).unwrap_or(text),
        None => text,
    }
}
