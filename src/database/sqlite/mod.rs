use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::{debug, info};

use crate::BotError;
use crate::database::sqlite::models::{
    ChatSummary, ChatTurn, KeywordEntry, KeywordUpdate, NewKeyword, NewTenant, SessionState,
    SessionUpdate, Tenant, TurnCommit,
};
use crate::database::sqlite::queries::{
    ChatTurnQueries, KeywordQueries, SessionQueries, TenantQueries,
};
use crate::pipeline::ChatStore;


pub mod models;
pub mod queries;

pub type DbPool = Pool<Sqlite>;

#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    #[inline]
    pub async fn initialize_from_config_dir(config_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        Self::new(config_dir.join("metadata.db")).await
    }

    // Tenant operations
    #[inline]
    pub async fn create_tenant(&self, new_tenant: NewTenant) -> Result<Tenant> {
        TenantQueries::create(&self.pool, new_tenant).await
    }

    #[inline]
    pub async fn get_tenant(&self, id: &str) -> Result<Option<Tenant>> {
        TenantQueries::get_by_id(&self.pool, id).await
    }

    #[inline]
    pub async fn get_tenant_by_api_key(&self, api_key: &str) -> Result<Option<Tenant>> {
        TenantQueries::get_by_api_key(&self.pool, api_key).await
    }

    #[inline]
    pub async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        TenantQueries::list_all(&self.pool).await
    }

    // Keyword operations
    #[inline]
    pub async fn list_keywords(&self, tenant_id: &str) -> Result<Vec<KeywordEntry>> {
        KeywordQueries::list_by_tenant(&self.pool, tenant_id).await
    }

    #[inline]
    pub async fn save_keyword(&self, tenant_id: &str, keyword: &NewKeyword) -> Result<KeywordEntry> {
        let keyword = keyword
            .normalized()
            .ok_or_else(|| anyhow::anyhow!("Keyword needs a phrase, a product and a positive weight"))?;
        KeywordQueries::upsert(&self.pool, tenant_id, &keyword).await
    }

    #[inline]
    pub async fn update_keyword(
        &self,
        tenant_id: &str,
        id: i64,
        update: KeywordUpdate,
    ) -> Result<Option<KeywordEntry>> {
        let update = KeywordUpdate {
            phrase: update.phrase.map(|p| p.trim().to_lowercase()),
            product: update.product.map(|p| p.trim().to_string()),
            weight: update.weight,
        };
        KeywordQueries::update(&self.pool, tenant_id, id, update).await
    }

    #[inline]
    pub async fn delete_keyword(&self, tenant_id: &str, id: i64) -> Result<bool> {
        KeywordQueries::delete(&self.pool, tenant_id, id).await
    }

    /// Replace the tenant's keyword table; unusable rows are skipped
    #[inline]
    pub async fn import_keywords(&self, tenant_id: &str, keywords: &[NewKeyword]) -> Result<usize> {
        let normalized: Vec<NewKeyword> = keywords.iter().filter_map(NewKeyword::normalized).collect();
        KeywordQueries::replace_all(&self.pool, tenant_id, &normalized).await
    }

    // Chat log operations
    #[inline]
    pub async fn chat_history(&self, tenant_id: &str, visitor_id: &str) -> Result<Vec<ChatTurn>> {
        ChatTurnQueries::list_by_visitor(&self.pool, tenant_id, visitor_id).await
    }

    #[inline]
    pub async fn chat_summaries(&self, tenant_id: &str) -> Result<Vec<ChatSummary>> {
        ChatTurnQueries::summaries(&self.pool, tenant_id).await
    }

    /// Persist a finished turn: log row, session merge and question counter together
    #[inline]
    pub async fn commit_turn(&self, commit: &TurnCommit) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin turn transaction")?;

        ChatTurnQueries::insert(&mut *tx, &commit.turn).await?;

        if let Some(update) = commit.session.as_ref().filter(|u| !u.is_empty()) {
            SessionQueries::upsert(
                &mut *tx,
                &commit.turn.tenant_id,
                &commit.turn.visitor_id,
                update,
            )
            .await?;
        }

        if commit.count_question {
            TenantQueries::increment_question_count(&mut *tx, &commit.turn.tenant_id).await?;
        }

        tx.commit()
            .await
            .context("Failed to commit turn transaction")?;
        Ok(())
    }
}

fn store_error(err: anyhow::Error) -> BotError {
    BotError::Database(format!("{err:#}"))
}

#[async_trait]
impl ChatStore for Database {
    async fn tenant(&self, tenant_id: &str) -> crate::Result<Option<Tenant>> {
        self.get_tenant(tenant_id).await.map_err(store_error)
    }

    async fn keywords(&self, tenant_id: &str) -> crate::Result<Vec<KeywordEntry>> {
        self.list_keywords(tenant_id).await.map_err(store_error)
    }

    async fn session(
        &self,
        tenant_id: &str,
        visitor_id: &str,
    ) -> crate::Result<Option<SessionState>> {
        SessionQueries::get(&self.pool, tenant_id, visitor_id)
            .await
            .map_err(store_error)
    }

    async fn save_session(
        &self,
        tenant_id: &str,
        visitor_id: &str,
        update: &SessionUpdate,
    ) -> crate::Result<()> {
        SessionQueries::upsert(&self.pool, tenant_id, visitor_id, update)
            .await
            .map_err(store_error)
    }

    async fn recent_turns(
        &self,
        tenant_id: &str,
        visitor_id: &str,
        limit: usize,
    ) -> crate::Result<Vec<ChatTurn>> {
        ChatTurnQueries::recent(&self.pool, tenant_id, visitor_id, limit)
            .await
            .map_err(store_error)
    }

    async fn commit_turn(&self, commit: TurnCommit) -> crate::Result<()> {
        Database::commit_turn(self, &commit)
            .await
            .map_err(store_error)
    }

    async fn reset_session(&self, tenant_id: &str, visitor_id: &str) -> crate::Result<()> {
        SessionQueries::delete(&self.pool, tenant_id, visitor_id)
            .await
            .map(|_| ())
            .map_err(store_error)
    }

    async fn record_upload(&self, tenant_id: &str) -> crate::Result<()> {
        TenantQueries::increment_upload_count(&self.pool, tenant_id)
            .await
            .map_err(store_error)
    }
}
