// In-memory collaborators for pipeline, ingest and server tests

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use super::{ChatMessage, ChatStore, Completer, Embedder, VectorIndex};
use crate::database::lancedb::{
    MetadataFilter, StoredRecord, VectorMatch, VectorMetadata, VectorRecord,
};
use crate::database::sqlite::models::{
    ChatTurn, KeywordEntry, Plan, SessionState, SessionUpdate, SubscriptionStatus, Tenant,
    TurnCommit,
};
use crate::{BotError, Result};

pub(crate) fn keyword(phrase: &str, product: &str, weight: i64) -> KeywordEntry {
    KeywordEntry {
        id: 0,
        tenant_id: "tenant-1".to_string(),
        phrase: phrase.to_string(),
        product: product.to_string(),
        weight,
        created_date: Utc::now().naive_utc(),
    }
}

pub(crate) fn tenant(id: &str, plan: Plan) -> Tenant {
    Tenant {
        id: id.to_string(),
        name: format!("{id} store"),
        api_key: format!("key-{id}"),
        plan,
        subscription_status: match plan {
            Plan::Paid => SubscriptionStatus::Active,
            Plan::Free => SubscriptionStatus::Inactive,
        },
        upload_count: 0,
        question_count: 0,
        created_date: Utc::now().naive_utc(),
    }
}

pub(crate) fn vector_match(product: &str, field: Option<&str>, text: &str) -> VectorMatch {
    VectorMatch {
        id: format!("{product}-{text}"),
        metadata: metadata("tenant-1", product, field, text),
        score: 1.0,
    }
}

pub(crate) fn metadata(
    tenant_id: &str,
    product: &str,
    field: Option<&str>,
    text: &str,
) -> VectorMetadata {
    VectorMetadata {
        tenant_id: tenant_id.to_string(),
        visitor_id: "visitor-1".to_string(),
        product: Some(product.to_string()),
        field: field.map(str::to_string),
        text: text.to_string(),
        filename: "catalog.json".to_string(),
        created_at: Utc::now().to_rfc3339(),
    }
}

#[derive(Default)]
struct StoreState {
    tenants: Vec<Tenant>,
    keywords: Vec<KeywordEntry>,
    sessions: HashMap<(String, String), SessionState>,
    turns: Vec<ChatTurn>,
}

#[derive(Default)]
pub(crate) struct FakeStore {
    state: Mutex<StoreState>,
    fail_keywords: AtomicBool,
    fail_tenants: AtomicBool,
    fail_commits: AtomicBool,
}

impl FakeStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_tenant(&self, id: &str, plan: Plan) {
        let mut state = self.state.lock().expect("store lock");
        state.tenants.push(tenant(id, plan));
    }

    pub(crate) fn set_question_count(&self, tenant_id: &str, count: i64) {
        let mut state = self.state.lock().expect("store lock");
        if let Some(t) = state.tenants.iter_mut().find(|t| t.id == tenant_id) {
            t.question_count = count;
        }
    }

    pub(crate) fn set_upload_count(&self, tenant_id: &str, count: i64) {
        let mut state = self.state.lock().expect("store lock");
        if let Some(t) = state.tenants.iter_mut().find(|t| t.id == tenant_id) {
            t.upload_count = count;
        }
    }

    pub(crate) fn tenant_snapshot(&self, tenant_id: &str) -> Tenant {
        let state = self.state.lock().expect("store lock");
        state
            .tenants
            .iter()
            .find(|t| t.id == tenant_id)
            .cloned()
            .expect("tenant exists")
    }

    pub(crate) fn add_keyword(&self, tenant_id: &str, phrase: &str, product: &str, weight: i64) {
        let mut state = self.state.lock().expect("store lock");
        let id = i64::try_from(state.keywords.len()).expect("small index") + 1;
        state.keywords.push(KeywordEntry {
            id,
            tenant_id: tenant_id.to_string(),
            ..keyword(phrase, product, weight)
        });
    }

    pub(crate) fn fail_keywords(&self) {
        self.fail_keywords.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_tenants(&self) {
        self.fail_tenants.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_commits(&self) {
        self.fail_commits.store(true, Ordering::SeqCst);
    }

    pub(crate) fn stored_session(&self, tenant_id: &str, visitor_id: &str) -> Option<SessionState> {
        let state = self.state.lock().expect("store lock");
        state
            .sessions
            .get(&(tenant_id.to_string(), visitor_id.to_string()))
            .cloned()
    }

    pub(crate) fn turns(&self) -> Vec<ChatTurn> {
        self.state.lock().expect("store lock").turns.clone()
    }
}

fn merge_session(state: &mut StoreState, tenant_id: &str, visitor_id: &str, update: &SessionUpdate) {
    let session = state
        .sessions
        .entry((tenant_id.to_string(), visitor_id.to_string()))
        .or_insert_with(|| SessionState::new(tenant_id, visitor_id));
    if let Some(product) = &update.last_product {
        session.last_product = Some(product.clone());
    }
    if let Some(intent) = &update.last_intent {
        session.last_intent = Some(intent.clone());
    }
    if let Some(products) = &update.last_matched_products {
        session.last_matched_products = products.clone();
    }
    session.updated_at = Some(Utc::now().naive_utc());
}

#[async_trait]
impl ChatStore for FakeStore {
    async fn tenant(&self, tenant_id: &str) -> Result<Option<Tenant>> {
        if self.fail_tenants.load(Ordering::SeqCst) {
            return Err(BotError::Database("tenant table unavailable".to_string()));
        }
        let state = self.state.lock().expect("store lock");
        Ok(state.tenants.iter().find(|t| t.id == tenant_id).cloned())
    }

    async fn keywords(&self, tenant_id: &str) -> Result<Vec<KeywordEntry>> {
        if self.fail_keywords.load(Ordering::SeqCst) {
            return Err(BotError::Database("keyword table unavailable".to_string()));
        }
        let state = self.state.lock().expect("store lock");
        Ok(state
            .keywords
            .iter()
            .filter(|k| k.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn session(&self, tenant_id: &str, visitor_id: &str) -> Result<Option<SessionState>> {
        Ok(self.stored_session(tenant_id, visitor_id))
    }

    async fn recent_turns(
        &self,
        tenant_id: &str,
        visitor_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatTurn>> {
        let state = self.state.lock().expect("store lock");
        let matching: Vec<ChatTurn> = state
            .turns
            .iter()
            .filter(|t| t.tenant_id == tenant_id && t.visitor_id == visitor_id)
            .cloned()
            .collect();
        let skip = matching.len().saturating_sub(limit);
        Ok(matching.into_iter().skip(skip).collect())
    }

    async fn save_session(
        &self,
        tenant_id: &str,
        visitor_id: &str,
        update: &SessionUpdate,
    ) -> Result<()> {
        let mut state = self.state.lock().expect("store lock");
        merge_session(&mut state, tenant_id, visitor_id, update);
        Ok(())
    }

    async fn commit_turn(&self, commit: TurnCommit) -> Result<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(BotError::Database("commit rejected".to_string()));
        }
        let mut state = self.state.lock().expect("store lock");
        let turn = commit.turn;
        let id = i64::try_from(state.turns.len()).expect("small index") + 1;
        if let Some(update) = commit.session.as_ref().filter(|u| !u.is_empty()) {
            merge_session(&mut state, &turn.tenant_id, &turn.visitor_id, update);
        }
        if commit.count_question {
            if let Some(t) = state.tenants.iter_mut().find(|t| t.id == turn.tenant_id) {
                t.question_count += 1;
            }
        }
        state.turns.push(ChatTurn {
            id,
            tenant_id: turn.tenant_id,
            visitor_id: turn.visitor_id,
            message: turn.message,
            reply: turn.reply,
            created_date: Utc::now().naive_utc(),
        });
        Ok(())
    }

    async fn reset_session(&self, tenant_id: &str, visitor_id: &str) -> Result<()> {
        let mut state = self.state.lock().expect("store lock");
        state
            .sessions
            .remove(&(tenant_id.to_string(), visitor_id.to_string()));
        Ok(())
    }

    async fn record_upload(&self, tenant_id: &str) -> Result<()> {
        let mut state = self.state.lock().expect("store lock");
        if let Some(t) = state.tenants.iter_mut().find(|t| t.id == tenant_id) {
            t.upload_count += 1;
        }
        Ok(())
    }
}

/// Filters stored records like the real index; scripted responses take precedence
#[derive(Default)]
pub(crate) struct FakeVectors {
    records: Mutex<Vec<VectorRecord>>,
    responses: Mutex<VecDeque<Vec<VectorMatch>>>,
    queries: Mutex<Vec<(String, MetadataFilter)>>,
}

impl FakeVectors {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_response(&self, matches: Vec<VectorMatch>) {
        self.responses
            .lock()
            .expect("responses lock")
            .push_back(matches);
    }

    pub(crate) fn insert(&self, id: &str, metadata: VectorMetadata) {
        self.records.lock().expect("records lock").push(VectorRecord {
            id: id.to_string(),
            vector: vec![0.5; 4],
            metadata,
        });
    }

    pub(crate) fn records(&self) -> Vec<VectorRecord> {
        self.records.lock().expect("records lock").clone()
    }

    pub(crate) fn recorded_filters(&self) -> Vec<MetadataFilter> {
        let queries = self.queries.lock().expect("queries lock");
        queries.iter().map(|(_, f)| f.clone()).collect()
    }

    pub(crate) fn recorded_namespaces(&self) -> Vec<String> {
        let queries = self.queries.lock().expect("queries lock");
        queries.iter().map(|(ns, _)| ns.clone()).collect()
    }

    pub(crate) fn query_count(&self) -> usize {
        self.queries.lock().expect("queries lock").len()
    }

    fn matching(&self, namespace: &str, filter: &MetadataFilter) -> Vec<VectorRecord> {
        let records = self.records.lock().expect("records lock");
        records
            .iter()
            .filter(|r| r.metadata.tenant_id == namespace)
            .filter(|r| filter.product.is_none() || r.metadata.product == filter.product)
            .filter(|r| filter.field.is_none() || r.metadata.field == filter.field)
            .filter(|r| {
                filter
                    .visitor_id
                    .as_ref()
                    .is_none_or(|v| &r.metadata.visitor_id == v)
            })
            .cloned()
            .collect()
    }
}

#[async_trait]
impl VectorIndex for FakeVectors {
    async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> Result<()> {
        let mut stored = self.records.lock().expect("records lock");
        for record in records {
            if record.metadata.tenant_id != namespace {
                return Err(BotError::InvalidInput("foreign tenant".to_string()));
            }
            stored.retain(|r| r.id != record.id);
            stored.push(record);
        }
        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        _vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<VectorMatch>> {
        self.queries
            .lock()
            .expect("queries lock")
            .push((namespace.to_string(), filter.clone()));
        let scripted = self.responses.lock().expect("responses lock").pop_front();
        if let Some(scripted) = scripted {
            return Ok(scripted);
        }
        Ok(self
            .matching(namespace, filter)
            .into_iter()
            .take(top_k)
            .map(|r| VectorMatch {
                id: r.id,
                metadata: r.metadata,
                score: 1.0,
            })
            .collect())
    }

    async fn delete(&self, id: &str, namespace: &str) -> Result<bool> {
        let mut stored = self.records.lock().expect("records lock");
        let before = stored.len();
        stored.retain(|r| !(r.id == id && r.metadata.tenant_id == namespace));
        Ok(stored.len() != before)
    }

    async fn get(&self, namespace: &str, id: &str) -> Result<Option<StoredRecord>> {
        let stored = self.records.lock().expect("records lock");
        Ok(stored
            .iter()
            .find(|r| r.id == id && r.metadata.tenant_id == namespace)
            .map(|r| StoredRecord {
                id: r.id.clone(),
                metadata: r.metadata.clone(),
            }))
    }

    async fn list(
        &self,
        namespace: &str,
        filter: &MetadataFilter,
        limit: usize,
    ) -> Result<Vec<StoredRecord>> {
        Ok(self
            .matching(namespace, filter)
            .into_iter()
            .take(limit)
            .map(|r| StoredRecord {
                id: r.id,
                metadata: r.metadata,
            })
            .collect())
    }
}

/// Returns a constant vector of the configured length
pub(crate) struct CountingEmbedder {
    dimension: usize,
    calls: AtomicUsize,
    fail: AtomicBool,
}

impl CountingEmbedder {
    pub(crate) fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    pub(crate) fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for CountingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(BotError::Embedding("embedding service down".to_string()));
        }
        Ok(vec![0.5; self.dimension])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CompletionCall {
    pub system: String,
    pub history: Vec<ChatMessage>,
    pub user: String,
}

enum Scripted {
    Reply(String),
    Error(String),
    Stall,
}

/// Plays back queued replies in order; an empty queue answers "ok"
#[derive(Default)]
pub(crate) struct ScriptedCompleter {
    script: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<CompletionCall>>,
}

impl ScriptedCompleter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_reply(&self, reply: &str) {
        self.push(Scripted::Reply(reply.to_string()));
    }

    pub(crate) fn push_error(&self, message: &str) {
        self.push(Scripted::Error(message.to_string()));
    }

    /// Next call never finishes on its own
    pub(crate) fn push_stall(&self) {
        self.push(Scripted::Stall);
    }

    fn push(&self, step: Scripted) {
        self.script.lock().expect("script lock").push_back(step);
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }

    pub(crate) fn calls(&self) -> Vec<CompletionCall> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl Completer for ScriptedCompleter {
    async fn complete(&self, system: &str, history: &[ChatMessage], user: &str) -> Result<String> {
        self.calls.lock().expect("calls lock").push(CompletionCall {
            system: system.to_string(),
            history: history.to_vec(),
            user: user.to_string(),
        });
        let step = self.script.lock().expect("script lock").pop_front();
        match step {
            Some(Scripted::Reply(reply)) => Ok(reply),
            Some(Scripted::Error(message)) => Err(BotError::Completion(message)),
            Some(Scripted::Stall) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(BotError::Completion("stalled".to_string()))
            }
            None => Ok("ok".to_string()),
        }
    }
}
