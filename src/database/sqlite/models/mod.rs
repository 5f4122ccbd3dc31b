#[cfg(test)]
mod tests;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub plan: Plan,
    pub subscription_status: SubscriptionStatus,
    pub upload_count: i64,
    pub question_count: i64,
    pub created_date: NaiveDateTime,
}

impl Tenant {
    /// Paid tenants with an active subscription bypass every ceiling
    #[inline]
    pub fn is_unlimited(&self) -> bool {
        self.plan == Plan::Paid && self.subscription_status == SubscriptionStatus::Active
    }

    #[inline]
    pub fn question_quota_exhausted(&self, limit: i64) -> bool {
        self.plan == Plan::Free && self.question_count >= limit
    }

    #[inline]
    pub fn upload_quota_exhausted(&self, limit: i64) -> bool {
        !self.is_unlimited() && self.upload_count >= limit
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Paid,
}

impl std::fmt::Display for Plan {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Plan::Free => write!(f, "free"),
            Plan::Paid => write!(f, "paid"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Inactive,
    Pending,
}

impl std::fmt::Display for SubscriptionStatus {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            SubscriptionStatus::Active => write!(f, "active"),
            SubscriptionStatus::Inactive => write!(f, "inactive"),
            SubscriptionStatus::Pending => write!(f, "pending"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTenant {
    pub name: String,
    pub plan: Plan,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct KeywordEntry {
    pub id: i64,
    pub tenant_id: String,
    pub phrase: String,
    pub product: String,
    pub weight: i64,
    pub created_date: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewKeyword {
    pub phrase: String,
    pub product: String,
    #[serde(default = "default_weight")]
    pub weight: i64,
}

const fn default_weight() -> i64 {
    1
}

impl NewKeyword {
    #[inline]
    pub fn new(phrase: &str, product: &str) -> Self {
        Self {
            phrase: phrase.to_string(),
            product: product.to_string(),
            weight: default_weight(),
        }
    }

    /// Trimmed lowercase phrase and trimmed product; `None` if anything is unusable
    #[inline]
    pub fn normalized(&self) -> Option<Self> {
        let phrase = self.phrase.trim().to_lowercase();
        let product = self.product.trim().to_string();
        (!phrase.is_empty() && !product.is_empty() && self.weight > 0).then_some(Self {
            phrase,
            product,
            weight: self.weight,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct KeywordUpdate {
    pub phrase: Option<String>,
    pub product: Option<String>,
    pub weight: Option<i64>,
}

/// Short-term memory of what a visitor is talking about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub visitor_id: String,
    pub tenant_id: String,
    pub last_product: Option<String>,
    pub last_intent: Option<String>,
    pub last_matched_products: Vec<String>,
    pub updated_at: Option<NaiveDateTime>,
}

impl SessionState {
    #[inline]
    pub fn new(tenant_id: &str, visitor_id: &str) -> Self {
        Self {
            visitor_id: visitor_id.to_string(),
            tenant_id: tenant_id.to_string(),
            ..Self::default()
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.last_product.is_none()
            && self.last_intent.is_none()
            && self.last_matched_products.is_empty()
    }
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct SessionRow {
    pub tenant_id: String,
    pub visitor_id: String,
    pub last_product: Option<String>,
    pub last_intent: Option<String>,
    pub last_matched_products: String,
    pub updated_date: NaiveDateTime,
}

impl From<SessionRow> for SessionState {
    #[inline]
    fn from(row: SessionRow) -> Self {
        let last_matched_products =
            serde_json::from_str(&row.last_matched_products).unwrap_or_default();
        Self {
            visitor_id: row.visitor_id,
            tenant_id: row.tenant_id,
            last_product: row.last_product,
            last_intent: row.last_intent,
            last_matched_products,
            updated_at: Some(row.updated_date),
        }
    }
}

/// Partial session write; `None` keeps whatever is stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SessionUpdate {
    pub last_product: Option<String>,
    pub last_intent: Option<String>,
    pub last_matched_products: Option<Vec<String>>,
}

impl SessionUpdate {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.last_product.is_none()
            && self.last_intent.is_none()
            && self.last_matched_products.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurn {
    pub id: i64,
    pub tenant_id: String,
    pub visitor_id: String,
    pub message: String,
    pub reply: String,
    pub created_date: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewChatTurn {
    pub tenant_id: String,
    pub visitor_id: String,
    pub message: String,
    pub reply: String,
}

/// Latest exchange per visitor, as shown in the admin chat viewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub visitor_id: String,
    pub latest_message: String,
    pub latest_reply: String,
    pub last_updated: NaiveDateTime,
    pub turn_count: i64,
}

/// Everything a completed turn writes, applied in one transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnCommit {
    pub turn: NewChatTurn,
    pub session: Option<SessionUpdate>,
    pub count_question: bool,
}
