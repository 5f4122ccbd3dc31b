
use itertools::Itertools;
use std::cmp::Reverse;
use std::time::Duration;
use tracing::{debug, warn};

use super::{ChatStore, bounded};
use crate::database::sqlite::models::KeywordEntry;

/// A tenant's phrase table, longest phrase first so "men combo" is tried before "men"
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordIndex {
    entries: Vec<KeywordEntry>,
}

impl KeywordIndex {
    #[inline]
    pub fn new(entries: Vec<KeywordEntry>) -> Self {
        let mut entries: Vec<KeywordEntry> = entries
            .into_iter()
            .map(|mut entry| {
                entry.phrase = entry.phrase.trim().to_lowercase();
                entry
            })
            .filter(|entry| !entry.phrase.is_empty())
            .collect();
        // Stable: equal lengths keep store order
        entries.sort_by_key(|entry| Reverse(entry.phrase.chars().count()));
        Self { entries }
    }

    /// Never fails: a store error degrades to an empty index
    #[inline]
    pub async fn load(store: &dyn ChatStore, tenant_id: &str, timeout: Duration) -> Self {
        match bounded(timeout, "keyword lookup", store.keywords(tenant_id)).await {
            Ok(entries) => {
                debug!("Loaded {} keywords for tenant {}", entries.len(), tenant_id);
                Self::new(entries)
            }
            Err(e) => {
                warn!(
                    "Keyword lookup failed for tenant {}, continuing without keywords: {}",
                    tenant_id, e
                );
                Self::default()
            }
        }
    }

    #[inline]
    pub fn entries(&self) -> &[KeywordEntry] {
        &self.entries
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Products whose phrase occurs anywhere in the message, unique, in scan order
    #[inline]
    pub fn scan(&self, message: &str) -> Vec<String> {
        let lowered = message.to_lowercase();
        self.entries
            .iter()
            .filter(|entry| lowered.contains(entry.phrase.as_str()))
            .map(|entry| entry.product.clone())
            .unique()
            .collect()
    }
}
