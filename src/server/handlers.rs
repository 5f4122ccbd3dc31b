use axum::Json;
use axum::extract::{Form, Path, Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::AppState;
use super::auth::AuthenticatedTenant;
use super::errors::ApiError;
use crate::database::lancedb::{MetadataFilter, StoredRecord, VectorMetadata};
use crate::database::sqlite::models::{
    ChatSummary, ChatTurn, KeywordEntry, KeywordUpdate, NewKeyword, Plan, SubscriptionStatus,
};
use crate::ingest::{IngestReport, IngestRequest};
use crate::pipeline::{TurnOutcome, bounded};
use crate::whatsapp::INVALID_MESSAGE_REPLY;

const VECTOR_SEARCH_LIMIT: usize = 10;
const UPLOAD_LIST_LIMIT: usize = 1000;

pub type ApiResult<T> = Result<Json<T>, ApiError>;

/// Missing or blank body fields become a 400 with a JSON error
fn required<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, ApiError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("{name} is required")))
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: &str) -> Json<Self> {
        Json(Self {
            message: message.to_string(),
        })
    }
}

#[inline]
pub async fn health() -> &'static str {
    "OK"
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: Option<String>,
    pub visitor_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
}

#[inline]
pub async fn chat(
    State(state): State<AppState>,
    AuthenticatedTenant(tenant): AuthenticatedTenant,
    Json(request): Json<ChatRequest>,
) -> ApiResult<ChatResponse> {
    let message = required(request.message.as_deref(), "message")?;
    let visitor_id = required(request.visitor_id.as_deref(), "visitorId")?;
    let turn = state
        .pipeline
        .handle_turn(&tenant.id, visitor_id, message)
        .await?;

    if turn.outcome == TurnOutcome::QuotaExceeded {
        return Err(ApiError::QuotaExceeded);
    }
    Ok(Json(ChatResponse { reply: turn.reply }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorRequest {
    pub visitor_id: Option<String>,
}

#[inline]
pub async fn reset_session(
    State(state): State<AppState>,
    AuthenticatedTenant(tenant): AuthenticatedTenant,
    Json(request): Json<VisitorRequest>,
) -> ApiResult<MessageResponse> {
    let visitor_id = required(request.visitor_id.as_deref(), "visitorId")?;
    state.pipeline.reset_session(&tenant.id, visitor_id).await?;
    Ok(MessageResponse::new("Session reset"))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanResponse {
    pub plan: Plan,
    pub subscription_status: SubscriptionStatus,
    pub question_count: i64,
    pub upload_count: i64,
}

#[inline]
pub async fn plan(AuthenticatedTenant(tenant): AuthenticatedTenant) -> Json<PlanResponse> {
    Json(PlanResponse {
        plan: tenant.plan,
        subscription_status: tenant.subscription_status,
        question_count: tenant.question_count,
        upload_count: tenant.upload_count,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorQuery {
    pub visitor_id: Option<String>,
}

impl VisitorQuery {
    fn visitor(&self) -> Option<&str> {
        self.visitor_id
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

#[inline]
pub async fn chats(
    State(state): State<AppState>,
    AuthenticatedTenant(tenant): AuthenticatedTenant,
    Query(query): Query<VisitorQuery>,
) -> ApiResult<Vec<ChatTurn>> {
    let visitor = query
        .visitor()
        .ok_or_else(|| ApiError::BadRequest("visitorId is required".to_string()))?;
    let turns = state
        .database
        .chat_history(&tenant.id, visitor)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(turns))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub message: String,
    #[serde(flatten)]
    pub report: IngestReport,
}

#[inline]
pub async fn upload(
    State(state): State<AppState>,
    AuthenticatedTenant(tenant): AuthenticatedTenant,
    Json(request): Json<IngestRequest>,
) -> ApiResult<UploadResponse> {
    let report = state
        .ingestor()
        .ingest(&tenant.id, &request)
        .await
        .inspect_err(|e| warn!("Upload for tenant {} refused or failed: {}", tenant.id, e))?;

    Ok(Json(UploadResponse {
        message: "Data embedded and uploaded successfully.".to_string(),
        report,
    }))
}

/// Stored record as listed to the tenant
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadEntry {
    pub id: String,
    pub filename: String,
    pub visitor_id: String,
    pub product: Option<String>,
    pub field: Option<String>,
    pub text: String,
    pub created_at: String,
}

impl From<StoredRecord> for UploadEntry {
    #[inline]
    fn from(record: StoredRecord) -> Self {
        let VectorMetadata {
            visitor_id,
            product,
            field,
            text,
            filename,
            created_at,
            ..
        } = record.metadata;
        Self {
            id: record.id,
            filename,
            visitor_id,
            product,
            field,
            text,
            created_at,
        }
    }
}

#[inline]
pub async fn uploads(
    State(state): State<AppState>,
    AuthenticatedTenant(tenant): AuthenticatedTenant,
    Query(query): Query<VisitorQuery>,
) -> ApiResult<Vec<UploadEntry>> {
    let filter = query
        .visitor()
        .map(MetadataFilter::visitor)
        .unwrap_or_default();
    let records = bounded(
        state.call_timeout(),
        "vector listing",
        state.vectors.list(&tenant.id, &filter, UPLOAD_LIST_LIMIT),
    )
    .await?;
    Ok(Json(records.into_iter().map(UploadEntry::from).collect()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorSearchQuery {
    #[serde(default)]
    pub query_text: String,
}

#[derive(Debug, Serialize)]
pub struct VectorHit {
    pub id: String,
    /// Absent when listing without a query
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    pub metadata: VectorMetadata,
}

#[inline]
pub async fn search_vectors(
    State(state): State<AppState>,
    AuthenticatedTenant(tenant): AuthenticatedTenant,
    Query(query): Query<VectorSearchQuery>,
) -> ApiResult<Vec<VectorHit>> {
    let timeout = state.call_timeout();
    let text = query.query_text.trim();

    // a zero query vector has no cosine direction, so a blank query lists instead
    if text.is_empty() {
        let records = bounded(
            timeout,
            "vector listing",
            state
                .vectors
                .list(&tenant.id, &MetadataFilter::default(), VECTOR_SEARCH_LIMIT),
        )
        .await?;
        return Ok(Json(
            records
                .into_iter()
                .map(|r| VectorHit {
                    id: r.id,
                    score: None,
                    metadata: r.metadata,
                })
                .collect(),
        ));
    }

    let vector = bounded(timeout, "embedding", state.embedder.embed(text)).await?;
    let matches = bounded(
        timeout,
        "vector query",
        state.vectors.query(
            &tenant.id,
            &vector,
            VECTOR_SEARCH_LIMIT,
            &MetadataFilter::default(),
        ),
    )
    .await?;
    Ok(Json(
        matches
            .into_iter()
            .map(|m| VectorHit {
                id: m.id,
                score: Some(m.score),
                metadata: m.metadata,
            })
            .collect(),
    ))
}

#[inline]
pub async fn delete_vector(
    State(state): State<AppState>,
    AuthenticatedTenant(tenant): AuthenticatedTenant,
    Path(id): Path<String>,
) -> ApiResult<MessageResponse> {
    let deleted = bounded(
        state.call_timeout(),
        "vector delete",
        state.vectors.delete(&id, &tenant.id),
    )
    .await?;
    if !deleted {
        return Err(ApiError::NotFound(format!("vector {id}")));
    }
    info!("Deleted vector {} for tenant {}", id, tenant.id);
    Ok(MessageResponse::new("Vector deleted"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateVectorRequest {
    pub new_text: String,
}

#[inline]
pub async fn update_vector(
    State(state): State<AppState>,
    AuthenticatedTenant(tenant): AuthenticatedTenant,
    Path(id): Path<String>,
    Json(request): Json<UpdateVectorRequest>,
) -> ApiResult<MessageResponse> {
    state
        .ingestor()
        .replace_text(&tenant.id, &id, &request.new_text)
        .await?;
    Ok(MessageResponse::new("Vector updated"))
}

#[inline]
pub async fn list_keywords(
    State(state): State<AppState>,
    AuthenticatedTenant(tenant): AuthenticatedTenant,
) -> ApiResult<Vec<KeywordEntry>> {
    let keywords = state
        .database
        .list_keywords(&tenant.id)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(keywords))
}

#[inline]
pub async fn create_keyword(
    State(state): State<AppState>,
    AuthenticatedTenant(tenant): AuthenticatedTenant,
    Json(keyword): Json<NewKeyword>,
) -> Result<(StatusCode, Json<KeywordEntry>), ApiError> {
    let keyword = keyword.normalized().ok_or_else(|| {
        ApiError::BadRequest("phrase and product are required and weight must be positive".to_string())
    })?;
    let entry = state
        .database
        .save_keyword(&tenant.id, &keyword)
        .await
        .map_err(ApiError::internal)?;
    Ok((StatusCode::CREATED, Json(entry)))
}

#[inline]
pub async fn update_keyword(
    State(state): State<AppState>,
    AuthenticatedTenant(tenant): AuthenticatedTenant,
    Path(id): Path<i64>,
    Json(update): Json<KeywordUpdate>,
) -> ApiResult<KeywordEntry> {
    let blank = |value: &Option<String>| value.as_deref().is_some_and(|v| v.trim().is_empty());
    if blank(&update.phrase) || blank(&update.product) {
        return Err(ApiError::BadRequest(
            "phrase and product cannot be empty".to_string(),
        ));
    }
    if update.weight.is_some_and(|w| w <= 0) {
        return Err(ApiError::BadRequest("weight must be positive".to_string()));
    }

    state
        .database
        .update_keyword(&tenant.id, id, update)
        .await
        .map_err(ApiError::internal)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("keyword {id}")))
}

#[inline]
pub async fn delete_keyword(
    State(state): State<AppState>,
    AuthenticatedTenant(tenant): AuthenticatedTenant,
    Path(id): Path<i64>,
) -> ApiResult<MessageResponse> {
    let deleted = state
        .database
        .delete_keyword(&tenant.id, id)
        .await
        .map_err(ApiError::internal)?;
    if !deleted {
        return Err(ApiError::NotFound(format!("keyword {id}")));
    }
    Ok(MessageResponse::new("Keyword deleted"))
}

#[inline]
pub async fn chat_summaries(
    State(state): State<AppState>,
    AuthenticatedTenant(tenant): AuthenticatedTenant,
) -> ApiResult<Vec<ChatSummary>> {
    let summaries = state
        .database
        .chat_summaries(&tenant.id)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(summaries))
}

#[inline]
pub async fn visitor_chats(
    State(state): State<AppState>,
    AuthenticatedTenant(tenant): AuthenticatedTenant,
    Path(visitor_id): Path<String>,
) -> ApiResult<Vec<ChatTurn>> {
    let turns = state
        .database
        .chat_history(&tenant.id, &visitor_id)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(turns))
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppForm {
    #[serde(rename = "Body")]
    pub body: Option<String>,
    #[serde(rename = "From")]
    pub from: Option<String>,
}

/// Twilio webhook; always acknowledged so Twilio does not redeliver
#[inline]
pub async fn whatsapp(
    State(state): State<AppState>,
    Form(form): Form<WhatsAppForm>,
) -> (StatusCode, &'static str) {
    let Some(from) = form.from.as_deref().map(str::trim).filter(|f| !f.is_empty()) else {
        warn!("WhatsApp webhook without a sender number");
        return (StatusCode::BAD_REQUEST, "Missing sender number.");
    };
    let Some(route) = state.whatsapp.as_ref() else {
        warn!("WhatsApp message from {} but WhatsApp is not configured", from);
        return (StatusCode::OK, "OK");
    };

    let body = form.body.as_deref().map(str::trim).unwrap_or_default();
    let reply = if body.is_empty() {
        INVALID_MESSAGE_REPLY.to_string()
    } else {
        match state.pipeline.handle_turn(&route.tenant_id, from, body).await {
            Ok(turn) => turn.reply,
            Err(e) => {
                error!("WhatsApp turn from {} failed: {}", from, e);
                return (StatusCode::OK, "OK");
            }
        }
    };

    if let Err(e) = route.client.send_message(from, &reply).await {
        error!("Failed to deliver WhatsApp reply to {}: {:#}", from, e);
    }
    (StatusCode::OK, "OK")
}
