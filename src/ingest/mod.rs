// Upload ingestion
// Field-level product items or freeform text, embedded into tenant-scoped vector records


use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::database::lancedb::{VectorMetadata, VectorRecord};
use crate::database::sqlite::models::{Plan, Tenant};
use crate::embeddings::chunk_text;
use crate::pipeline::{ChatStore, Embedder, Intent, VectorIndex, bounded};
use crate::{BotError, Result};

pub const DEFAULT_VISITOR: &str = "default";

fn default_visitor() -> String {
    DEFAULT_VISITOR.to_string()
}

/// One upload; the caller states which shape `payload` has
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    pub filename: String,
    #[serde(default = "default_visitor")]
    pub visitor_id: String,
    #[serde(flatten)]
    pub payload: IngestPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum IngestPayload {
    /// Each item becomes exactly one record
    Fields { items: Vec<FieldItem> },
    /// Cut into fixed character windows, one record per non-blank window
    Text {
        text: String,
        #[serde(default)]
        product: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldItem {
    pub product: String,
    #[serde(default)]
    pub field: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub records: usize,
    pub skipped: usize,
}

/// Validated piece of text waiting for its embedding
#[derive(Debug, Clone, PartialEq, Eq)]
struct Pending {
    index: usize,
    product: Option<String>,
    field: Option<String>,
    text: String,
}

pub struct Ingestor<'a> {
    store: &'a dyn ChatStore,
    vectors: &'a dyn VectorIndex,
    embedder: &'a dyn Embedder,
    upload_limit: i64,
    chunk_chars: usize,
    timeout: Duration,
}

impl<'a> Ingestor<'a> {
    #[inline]
    pub fn new(
        store: &'a dyn ChatStore,
        vectors: &'a dyn VectorIndex,
        embedder: &'a dyn Embedder,
        upload_limit: i64,
        chunk_chars: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            vectors,
            embedder,
            upload_limit,
            chunk_chars,
            timeout,
        }
    }

    #[inline]
    pub async fn ingest(&self, tenant_id: &str, request: &IngestRequest) -> Result<IngestReport> {
        self.ingest_with_progress(tenant_id, request, |_, _| {}).await
    }

    /// `progress(done, total)` is called after every embedded piece
    #[inline]
    pub async fn ingest_with_progress<F>(
        &self,
        tenant_id: &str,
        request: &IngestRequest,
        mut progress: F,
    ) -> Result<IngestReport>
    where
        F: FnMut(usize, usize) + Send,
    {
        let tenant = self.upload_allowed(tenant_id).await?;
        let filename = request.filename.trim();
        if filename.is_empty() {
            return Err(BotError::InvalidInput("filename is required".to_string()));
        }
        let visitor_id = match request.visitor_id.trim() {
            "" => DEFAULT_VISITOR,
            visitor => visitor,
        };

        let (pending, skipped) = self.pending_pieces(&request.payload)?;
        let total = pending.len();
        let created_at = Utc::now().to_rfc3339();

        let mut records = Vec::with_capacity(total);
        for (done, piece) in pending.into_iter().enumerate() {
            let vector = bounded(self.timeout, "embedding", self.embedder.embed(&piece.text)).await?;
            records.push(VectorRecord {
                id: record_id(&tenant.id, visitor_id, filename, piece.index),
                vector,
                metadata: VectorMetadata {
                    tenant_id: tenant.id.clone(),
                    visitor_id: visitor_id.to_string(),
                    product: piece.product,
                    field: piece.field,
                    text: piece.text,
                    filename: filename.to_string(),
                    created_at: created_at.clone(),
                },
            });
            progress(done + 1, total);
        }

        let count = records.len();
        if !records.is_empty() {
            bounded(
                self.timeout,
                "vector upsert",
                self.vectors.upsert(&tenant.id, records),
            )
            .await?;
        }

        if tenant.plan == Plan::Free {
            bounded(self.timeout, "upload counter", self.store.record_upload(&tenant.id)).await?;
        }

        info!(
            "Ingested {} records ({} skipped) from {} for tenant {}",
            count, skipped, filename, tenant.id
        );
        Ok(IngestReport {
            records: count,
            skipped,
        })
    }

    /// Re-embed a stored record with new text; id and other metadata stay
    #[inline]
    pub async fn replace_text(&self, tenant_id: &str, id: &str, new_text: &str) -> Result<()> {
        let new_text = new_text.trim();
        if new_text.is_empty() {
            return Err(BotError::InvalidInput("newText is required".to_string()));
        }

        let stored = bounded(self.timeout, "vector lookup", self.vectors.get(tenant_id, id))
            .await?
            .ok_or_else(|| BotError::NotFound(format!("vector {id}")))?;

        let vector = bounded(self.timeout, "embedding", self.embedder.embed(new_text)).await?;
        let record = VectorRecord {
            id: stored.id,
            vector,
            metadata: VectorMetadata {
                text: new_text.to_string(),
                ..stored.metadata
            },
        };
        bounded(
            self.timeout,
            "vector upsert",
            self.vectors.upsert(tenant_id, vec![record]),
        )
        .await?;
        debug!("Replaced text of vector {} for tenant {}", id, tenant_id);
        Ok(())
    }

    async fn upload_allowed(&self, tenant_id: &str) -> Result<Tenant> {
        let tenant = bounded(self.timeout, "tenant lookup", self.store.tenant(tenant_id))
            .await?
            .ok_or_else(|| BotError::NotFound(format!("tenant {tenant_id}")))?;

        if tenant.upload_quota_exhausted(self.upload_limit) {
            info!(
                "Tenant {} reached the upload limit ({})",
                tenant.id, tenant.upload_count
            );
            return Err(BotError::QuotaExceeded);
        }
        Ok(tenant)
    }

    fn pending_pieces(&self, payload: &IngestPayload) -> Result<(Vec<Pending>, usize)> {
        match payload {
            IngestPayload::Fields { items } => {
                let mut pending = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    let text = item.text.trim();
                    if text.is_empty() {
                        continue;
                    }
                    let product = item.product.trim();
                    if product.is_empty() {
                        return Err(BotError::InvalidInput(format!(
                            "item {index} has no product"
                        )));
                    }
                    pending.push(Pending {
                        index,
                        product: Some(product.to_string()),
                        field: normalize_field(item.field.as_deref())?,
                        text: text.to_string(),
                    });
                }
                let skipped = items.len() - pending.len();
                Ok((pending, skipped))
            }
            IngestPayload::Text { text, product } => {
                let product = product
                    .as_deref()
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string);
                let pending = chunk_text(text, self.chunk_chars)
                    .into_iter()
                    .map(|chunk| Pending {
                        index: chunk.index,
                        product: product.clone(),
                        field: None,
                        text: chunk.text,
                    })
                    .collect();
                Ok((pending, 0))
            }
        }
    }
}

/// Field labels must be intent labels so field-filtered retrieval can find them
fn normalize_field(field: Option<&str>) -> Result<Option<String>> {
    match field.map(str::trim).filter(|f| !f.is_empty()) {
        None => Ok(None),
        Some(raw) => Intent::parse_label(raw)
            .map(|intent| Some(intent.label().to_string()))
            .ok_or_else(|| BotError::InvalidInput(format!("unknown field '{raw}'"))),
    }
}

/// `{tenant}_{visitor}_{filename}_{index}`; re-uploading a file overwrites its records
#[inline]
pub fn record_id(tenant_id: &str, visitor_id: &str, filename: &str, index: usize) -> String {
    format!("{tenant_id}_{visitor_id}_{filename}_{index}")
}
