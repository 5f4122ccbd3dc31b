
use super::models::*;
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{Executor, Sqlite, SqlitePool};
use tracing::debug;
use uuid::Uuid;

const TENANT_COLUMNS: &str = "id, name, api_key, plan, subscription_status, upload_count, question_count, created_date";
const KEYWORD_COLUMNS: &str = "id, tenant_id, phrase, product, weight, created_date";
const TURN_COLUMNS: &str = "id, tenant_id, visitor_id, message, reply, created_date";

pub struct TenantQueries;

impl TenantQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, new_tenant: NewTenant) -> Result<Tenant> {
        let id = Uuid::new_v4().to_string();
        let api_key = Uuid::new_v4().simple().to_string();
        let status = match new_tenant.plan {
            Plan::Paid => SubscriptionStatus::Active,
            Plan::Free => SubscriptionStatus::Inactive,
        };
        let now = Utc::now().naive_utc();

        sqlx::query(
            "INSERT INTO tenants (id, name, api_key, plan, subscription_status, created_date) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&new_tenant.name)
        .bind(&api_key)
        .bind(new_tenant.plan)
        .bind(status)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create tenant")?;

        Self::get_by_id(pool, &id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created tenant"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: &str) -> Result<Option<Tenant>> {
        sqlx::query_as::<_, Tenant>(&format!(
            "SELECT {TENANT_COLUMNS} FROM tenants WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get tenant by id")
    }

    #[inline]
    pub async fn get_by_api_key(pool: &SqlitePool, api_key: &str) -> Result<Option<Tenant>> {
        sqlx::query_as::<_, Tenant>(&format!(
            "SELECT {TENANT_COLUMNS} FROM tenants WHERE api_key = ?"
        ))
        .bind(api_key)
        .fetch_optional(pool)
        .await
        .context("Failed to get tenant by api key")
    }

    #[inline]
    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Tenant>> {
        sqlx::query_as::<_, Tenant>(&format!(
            "SELECT {TENANT_COLUMNS} FROM tenants ORDER BY created_date, name"
        ))
        .fetch_all(pool)
        .await
        .context("Failed to list tenants")
    }

    #[inline]
    pub async fn set_plan(
        pool: &SqlitePool,
        id: &str,
        plan: Plan,
        status: SubscriptionStatus,
    ) -> Result<Option<Tenant>> {
        sqlx::query("UPDATE tenants SET plan = ?, subscription_status = ? WHERE id = ?")
            .bind(plan)
            .bind(status)
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to update tenant plan")?;

        Self::get_by_id(pool, id).await
    }

    /// Atomic `question_count + 1`; never read-then-set
    #[inline]
    pub async fn increment_question_count<'e, E>(executor: E, id: &str) -> Result<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query("UPDATE tenants SET question_count = question_count + 1 WHERE id = ?")
            .bind(id)
            .execute(executor)
            .await
            .context("Failed to increment question count")?;
        Ok(())
    }

    #[inline]
    pub async fn increment_upload_count(pool: &SqlitePool, id: &str) -> Result<()> {
        sqlx::query("UPDATE tenants SET upload_count = upload_count + 1 WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to increment upload count")?;
        Ok(())
    }
}

pub struct KeywordQueries;

impl KeywordQueries {
    /// Inserts or overwrites the entry for `(tenant, phrase)`
    #[inline]
    pub async fn upsert<'e, E>(
        executor: E,
        tenant_id: &str,
        keyword: &NewKeyword,
    ) -> Result<KeywordEntry>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now().naive_utc();
        sqlx::query_as::<_, KeywordEntry>(&format!(
            r#"
            INSERT INTO product_keywords (tenant_id, phrase, product, weight, created_date)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (tenant_id, phrase)
            DO UPDATE SET product = excluded.product, weight = excluded.weight
            RETURNING {KEYWORD_COLUMNS}
            "#
        ))
        .bind(tenant_id)
        .bind(&keyword.phrase)
        .bind(&keyword.product)
        .bind(keyword.weight)
        .bind(now)
        .fetch_one(executor)
        .await
        .with_context(|| format!("Failed to save keyword '{}'", keyword.phrase))
    }

    #[inline]
    pub async fn list_by_tenant(pool: &SqlitePool, tenant_id: &str) -> Result<Vec<KeywordEntry>> {
        sqlx::query_as::<_, KeywordEntry>(&format!(
            "SELECT {KEYWORD_COLUMNS} FROM product_keywords WHERE tenant_id = ? ORDER BY id"
        ))
        .bind(tenant_id)
        .fetch_all(pool)
        .await
        .context("Failed to list keywords")
    }

    #[inline]
    pub async fn get_by_id(
        pool: &SqlitePool,
        tenant_id: &str,
        id: i64,
    ) -> Result<Option<KeywordEntry>> {
        sqlx::query_as::<_, KeywordEntry>(&format!(
            "SELECT {KEYWORD_COLUMNS} FROM product_keywords WHERE id = ? AND tenant_id = ?"
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await
        .context("Failed to get keyword by id")
    }

    #[inline]
    pub async fn update(
        pool: &SqlitePool,
        tenant_id: &str,
        id: i64,
        update: KeywordUpdate,
    ) -> Result<Option<KeywordEntry>> {
        sqlx::query(
            r#"
            UPDATE product_keywords
            SET phrase = COALESCE(?, phrase),
                product = COALESCE(?, product),
                weight = COALESCE(?, weight)
            WHERE id = ? AND tenant_id = ?
            "#,
        )
        .bind(update.phrase)
        .bind(update.product)
        .bind(update.weight)
        .bind(id)
        .bind(tenant_id)
        .execute(pool)
        .await
        .context("Failed to update keyword")?;

        Self::get_by_id(pool, tenant_id, id).await
    }

    #[inline]
    pub async fn delete(pool: &SqlitePool, tenant_id: &str, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM product_keywords WHERE id = ? AND tenant_id = ?")
            .bind(id)
            .bind(tenant_id)
            .execute(pool)
            .await
            .context("Failed to delete keyword")?;
        Ok(result.rows_affected() > 0)
    }

    #[inline]
    pub async fn delete_all<'e, E>(executor: E, tenant_id: &str) -> Result<u64>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("DELETE FROM product_keywords WHERE tenant_id = ?")
            .bind(tenant_id)
            .execute(executor)
            .await
            .context("Failed to clear keywords")?;
        Ok(result.rows_affected())
    }

    /// Swap the tenant's whole keyword table in one transaction
    #[inline]
    pub async fn replace_all(
        pool: &SqlitePool,
        tenant_id: &str,
        keywords: &[NewKeyword],
    ) -> Result<usize> {
        let mut tx = pool.begin().await.context("Failed to begin transaction")?;

        let removed = Self::delete_all(&mut *tx, tenant_id).await?;
        for keyword in keywords {
            Self::upsert(&mut *tx, tenant_id, keyword).await?;
        }

        tx.commit()
            .await
            .context("Failed to commit keyword import")?;

        debug!(
            "Replaced {} keywords with {} for tenant {}",
            removed,
            keywords.len(),
            tenant_id
        );
        Ok(keywords.len())
    }
}

pub struct SessionQueries;

impl SessionQueries {
    #[inline]
    pub async fn get(
        pool: &SqlitePool,
        tenant_id: &str,
        visitor_id: &str,
    ) -> Result<Option<SessionState>> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT tenant_id, visitor_id, last_product, last_intent, last_matched_products, updated_date
            FROM sessions WHERE tenant_id = ? AND visitor_id = ?
            "#,
        )
        .bind(tenant_id)
        .bind(visitor_id)
        .fetch_optional(pool)
        .await
        .context("Failed to get session")?;

        Ok(row.map(SessionState::from))
    }

    /// Merge-upsert: fields left as `None` keep their stored value
    #[inline]
    pub async fn upsert<'e, E>(
        executor: E,
        tenant_id: &str,
        visitor_id: &str,
        update: &SessionUpdate,
    ) -> Result<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let matched = update
            .last_matched_products
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to encode matched products")?;
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            INSERT INTO sessions (tenant_id, visitor_id, last_product, last_intent, last_matched_products, updated_date)
            VALUES (?1, ?2, ?3, ?4, COALESCE(?5, '[]'), ?6)
            ON CONFLICT (tenant_id, visitor_id) DO UPDATE SET
                last_product = COALESCE(?3, sessions.last_product),
                last_intent = COALESCE(?4, sessions.last_intent),
                last_matched_products = COALESCE(?5, sessions.last_matched_products),
                updated_date = ?6
            "#,
        )
        .bind(tenant_id)
        .bind(visitor_id)
        .bind(update.last_product.as_deref())
        .bind(update.last_intent.as_deref())
        .bind(matched)
        .bind(now)
        .execute(executor)
        .await
        .context("Failed to upsert session")?;

        Ok(())
    }

    #[inline]
    pub async fn delete(pool: &SqlitePool, tenant_id: &str, visitor_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE tenant_id = ? AND visitor_id = ?")
            .bind(tenant_id)
            .bind(visitor_id)
            .execute(pool)
            .await
            .context("Failed to delete session")?;
        Ok(result.rows_affected() > 0)
    }
}

pub struct ChatTurnQueries;

impl ChatTurnQueries {
    #[inline]
    pub async fn insert<'e, E>(executor: E, turn: &NewChatTurn) -> Result<i64>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now().naive_utc();
        let id = sqlx::query(
            "INSERT INTO chat_turns (tenant_id, visitor_id, message, reply, created_date) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&turn.tenant_id)
        .bind(&turn.visitor_id)
        .bind(&turn.message)
        .bind(&turn.reply)
        .bind(now)
        .execute(executor)
        .await
        .context("Failed to insert chat turn")?
        .last_insert_rowid();

        Ok(id)
    }

    /// The newest `limit` turns, returned oldest first
    #[inline]
    pub async fn recent(
        pool: &SqlitePool,
        tenant_id: &str,
        visitor_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatTurn>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut turns = sqlx::query_as::<_, ChatTurn>(&format!(
            "SELECT {TURN_COLUMNS} FROM chat_turns WHERE tenant_id = ? AND visitor_id = ? ORDER BY id DESC LIMIT ?"
        ))
        .bind(tenant_id)
        .bind(visitor_id)
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("Failed to get recent chat turns")?;

        turns.reverse();
        Ok(turns)
    }

    #[inline]
    pub async fn list_by_visitor(
        pool: &SqlitePool,
        tenant_id: &str,
        visitor_id: &str,
    ) -> Result<Vec<ChatTurn>> {
        sqlx::query_as::<_, ChatTurn>(&format!(
            "SELECT {TURN_COLUMNS} FROM chat_turns WHERE tenant_id = ? AND visitor_id = ? ORDER BY id"
        ))
        .bind(tenant_id)
        .bind(visitor_id)
        .fetch_all(pool)
        .await
        .context("Failed to list chat turns")
    }

    #[inline]
    pub async fn summaries(pool: &SqlitePool, tenant_id: &str) -> Result<Vec<ChatSummary>> {
        sqlx::query_as::<_, ChatSummary>(
            r#"
            SELECT c.visitor_id,
                   c.message AS latest_message,
                   c.reply AS latest_reply,
                   c.created_date AS last_updated,
                   grouped.turn_count
            FROM chat_turns c
            JOIN (
                SELECT visitor_id, MAX(id) AS latest_id, COUNT(*) AS turn_count
                FROM chat_turns
                WHERE tenant_id = ?
                GROUP BY visitor_id
            ) grouped ON c.id = grouped.latest_id
            ORDER BY c.id DESC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(pool)
        .await
        .context("Failed to summarise chats")
    }
}
