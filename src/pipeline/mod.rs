// Conversational context resolution
// Keyword index, intent, product resolution, retrieval and reply composition for one turn

pub mod composer;
pub mod intent;
pub mod keywords;
pub mod resolver;
pub mod retriever;
pub mod session;

#[cfg(test)]
pub(crate) mod fakes;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::database::lancedb::{MetadataFilter, StoredRecord, VectorMatch, VectorRecord};
use crate::database::sqlite::models::{
    ChatTurn, KeywordEntry, NewChatTurn, Plan, SessionState, SessionUpdate, Tenant, TurnCommit,
};
use crate::{BotError, Result};

pub use composer::{Composition, ReplyComposer};
pub use intent::{Intent, IntentClassifier};
pub use keywords::KeywordIndex;
pub use resolver::{ProductResolver, Resolution, ResolutionTier};
pub use retriever::{ContextRetriever, ProductContext};
pub use session::SessionStore;

pub const UPGRADE_MESSAGE: &str = "You have reached your plan limit. Upgrade to the paid plan for unlimited questions and uploads at https://careerengine.in/upgrade.";
pub const FAILURE_REPLY: &str =
    "Sorry, something went wrong while answering your question. Please try again shortly or contact support.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[inline]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[inline]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[inline]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Text to fixed-length vector
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// (system prompt, history, user message) to text
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, system: &str, history: &[ChatMessage], user: &str) -> Result<String>;
}

/// Namespaced vector storage; the namespace is always the tenant id
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> Result<()>;

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<VectorMatch>>;

    async fn delete(&self, id: &str, namespace: &str) -> Result<bool>;

    async fn get(&self, namespace: &str, id: &str) -> Result<Option<StoredRecord>>;

    async fn list(
        &self,
        namespace: &str,
        filter: &MetadataFilter,
        limit: usize,
    ) -> Result<Vec<StoredRecord>>;
}

/// Document store operations the turn pipeline depends on
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn tenant(&self, tenant_id: &str) -> Result<Option<Tenant>>;

    async fn keywords(&self, tenant_id: &str) -> Result<Vec<KeywordEntry>>;

    async fn session(&self, tenant_id: &str, visitor_id: &str) -> Result<Option<SessionState>>;

    async fn recent_turns(
        &self,
        tenant_id: &str,
        visitor_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatTurn>>;

    async fn save_session(
        &self,
        tenant_id: &str,
        visitor_id: &str,
        update: &SessionUpdate,
    ) -> Result<()>;

    /// Chat row, session merge and question counter must land together or not at all
    async fn commit_turn(&self, commit: TurnCommit) -> Result<()>;

    async fn reset_session(&self, tenant_id: &str, visitor_id: &str) -> Result<()>;

    async fn record_upload(&self, tenant_id: &str) -> Result<()>;
}

/// Bound an external call; expiry becomes `BotError::Timeout`
pub(crate) async fn bounded<T, F>(limit: Duration, label: &str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| BotError::Timeout(label.to_string()))?
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub top_k: usize,
    pub snippet_chars: usize,
    pub history_turns: usize,
    pub free_question_limit: i64,
    pub call_timeout: Duration,
}

impl Default for PipelineSettings {
    #[inline]
    fn default() -> Self {
        Self {
            top_k: 20,
            snippet_chars: 100,
            history_turns: 6,
            free_question_limit: 20,
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl PipelineSettings {
    #[inline]
    pub fn from_config(config: &Config) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            snippet_chars: config.retrieval.snippet_chars,
            history_turns: config.retrieval.history_turns,
            free_question_limit: config.limits.free_question_limit,
            // never cut an Ollama call off before its own retries have run
            call_timeout: Duration::from_secs(config.retrieval.call_timeout_seconds)
                .max(config.ollama.retry_budget()),
        }
    }
}

/// How a turn ended; decides what gets persisted and charged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Answered {
        products: Vec<String>,
        intent: Option<Intent>,
        tier: ResolutionTier,
    },
    Recommended {
        product: String,
    },
    NoContext {
        products: Vec<String>,
    },
    Unidentified,
    QuotaExceeded,
    Failed,
}

impl TurnOutcome {
    #[inline]
    pub fn is_chargeable(&self) -> bool {
        matches!(self, Self::Answered { .. } | Self::Recommended { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReply {
    pub reply: String,
    pub outcome: TurnOutcome,
}

impl TurnReply {
    fn failed() -> Self {
        Self {
            reply: FAILURE_REPLY.to_string(),
            outcome: TurnOutcome::Failed,
        }
    }

    fn quota_exceeded() -> Self {
        Self {
            reply: UPGRADE_MESSAGE.to_string(),
            outcome: TurnOutcome::QuotaExceeded,
        }
    }
}

/// Runs a whole conversational turn against injected collaborators
#[derive(Clone)]
pub struct ChatPipeline {
    store: Arc<dyn ChatStore>,
    vectors: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    completer: Arc<dyn Completer>,
    settings: PipelineSettings,
}

impl ChatPipeline {
    #[inline]
    pub fn new(
        store: Arc<dyn ChatStore>,
        vectors: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        completer: Arc<dyn Completer>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            vectors,
            embedder,
            completer,
            settings,
        }
    }

    #[inline]
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    fn sessions(&self) -> SessionStore<'_> {
        SessionStore::new(self.store.as_ref(), self.settings.call_timeout)
    }

    /// Answer one message. Only malformed input and unknown tenants are errors;
    /// every downstream failure is turned into a reply.
    #[inline]
    pub async fn handle_turn(
        &self,
        tenant_id: &str,
        visitor_id: &str,
        message: &str,
    ) -> Result<TurnReply> {
        let message = message.trim();
        let visitor_id = visitor_id.trim();
        if tenant_id.trim().is_empty() {
            return Err(BotError::InvalidInput("tenant is required".to_string()));
        }
        if visitor_id.is_empty() {
            return Err(BotError::InvalidInput("visitorId is required".to_string()));
        }
        if message.is_empty() {
            return Err(BotError::InvalidInput("message is required".to_string()));
        }

        let tenant = match bounded(
            self.settings.call_timeout,
            "tenant lookup",
            self.store.tenant(tenant_id),
        )
        .await
        {
            Ok(Some(tenant)) => tenant,
            Ok(None) => return Err(BotError::NotFound(format!("tenant {tenant_id}"))),
            Err(e) => {
                error!("Tenant lookup failed for {}: {}", tenant_id, e);
                return Ok(TurnReply::failed());
            }
        };

        if tenant.question_quota_exhausted(self.settings.free_question_limit) {
            info!(
                "Tenant {} reached the free question limit ({})",
                tenant.id, tenant.question_count
            );
            return Ok(TurnReply::quota_exceeded());
        }

        match self.run_turn(&tenant, visitor_id, message).await {
            Ok(reply) => {
                debug!(
                    "Turn for tenant {} visitor {} finished as {:?}",
                    tenant.id, visitor_id, reply.outcome
                );
                Ok(reply)
            }
            Err(e) => {
                error!(
                    "Turn failed for tenant {} visitor {}: {}",
                    tenant.id, visitor_id, e
                );
                Ok(TurnReply::failed())
            }
        }
    }

    async fn run_turn(&self, tenant: &Tenant, visitor_id: &str, message: &str) -> Result<TurnReply> {
        let timeout = self.settings.call_timeout;
        let session = self.sessions().read(&tenant.id, visitor_id).await?;

        let intent = IntentClassifier::new(self.completer.as_ref(), timeout)
            .classify(message)
            .await;
        let index = KeywordIndex::load(self.store.as_ref(), &tenant.id, timeout).await;

        let resolution = ProductResolver::new(self.completer.as_ref(), timeout)
            .resolve(message, intent, &index, &session)
            .await?;

        let (reply, outcome, session_update) = match resolution {
            Resolution::Products { products, tier } => {
                info!(
                    "Resolved {:?} via {:?} with intent {:?}",
                    products, tier, intent
                );
                let contexts = ContextRetriever::new(
                    self.vectors.as_ref(),
                    self.embedder.as_ref(),
                    self.settings.top_k,
                    self.settings.snippet_chars,
                    timeout,
                )
                .retrieve(&tenant.id, message, &products, intent)
                .await?;

                let history = self.history(&tenant.id, visitor_id).await?;
                let composition = ReplyComposer::new(self.completer.as_ref(), timeout)
                    .compose(&contexts, &history, message)
                    .await?;

                let update = SessionUpdate {
                    last_product: products.first().cloned(),
                    last_intent: intent.map(|i| i.label().to_string()),
                    last_matched_products: Some(products.clone()),
                };
                match composition {
                    Composition::Answer(reply) => (
                        reply,
                        TurnOutcome::Answered {
                            products,
                            intent,
                            tier,
                        },
                        Some(update),
                    ),
                    Composition::NoContext(reply) => {
                        (reply, TurnOutcome::NoContext { products }, Some(update))
                    }
                }
            }
            Resolution::Recommended { product, reply } => {
                let update = SessionUpdate {
                    last_product: Some(product.clone()),
                    last_intent: intent.map(|i| i.label().to_string()),
                    last_matched_products: Some(vec![product.clone()]),
                };
                (reply, TurnOutcome::Recommended { product }, Some(update))
            }
            Resolution::Unidentified { reply } => (reply, TurnOutcome::Unidentified, None),
        };

        let commit = TurnCommit {
            turn: NewChatTurn {
                tenant_id: tenant.id.clone(),
                visitor_id: visitor_id.to_string(),
                message: message.to_string(),
                reply: reply.clone(),
            },
            session: session_update,
            count_question: outcome.is_chargeable() && tenant.plan == Plan::Free,
        };
        self.sessions().commit(commit).await?;

        Ok(TurnReply { reply, outcome })
    }

    async fn history(&self, tenant_id: &str, visitor_id: &str) -> Result<Vec<ChatMessage>> {
        if self.settings.history_turns == 0 {
            return Ok(Vec::new());
        }
        let turns = bounded(
            self.settings.call_timeout,
            "chat history",
            self.store
                .recent_turns(tenant_id, visitor_id, self.settings.history_turns),
        )
        .await?;

        Ok(turns
            .into_iter()
            .flat_map(|turn| {
                [
                    ChatMessage::user(turn.message),
                    ChatMessage::assistant(turn.reply),
                ]
            })
            .collect())
    }

    /// Forget short-term memory for a visitor; the chat log stays
    #[inline]
    pub async fn reset_session(&self, tenant_id: &str, visitor_id: &str) -> Result<()> {
        if visitor_id.trim().is_empty() {
            return Err(BotError::InvalidInput("visitorId is required".to_string()));
        }
        self.sessions().reset(tenant_id, visitor_id.trim()).await
    }
}
