
use std::time::Duration;
use tracing::{debug, info};

use super::{ChatStore, bounded};
use crate::Result;
use crate::database::sqlite::models::{SessionState, SessionUpdate, TurnCommit};

/// Per-(tenant, visitor) short-term memory backed by the document store.
///
/// There is no in-process cache: every read goes to the store, so state
/// survives restarts and is shared between server instances.
pub struct SessionStore<'a> {
    store: &'a dyn ChatStore,
    timeout: Duration,
}

impl<'a> SessionStore<'a> {
    #[inline]
    pub fn new(store: &'a dyn ChatStore, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Stored state, or a blank one for a first-time visitor
    #[inline]
    pub async fn read(&self, tenant_id: &str, visitor_id: &str) -> Result<SessionState> {
        let stored = bounded(
            self.timeout,
            "session read",
            self.store.session(tenant_id, visitor_id),
        )
        .await?;

        Ok(stored.unwrap_or_else(|| {
            debug!("No session yet for visitor {} of tenant {}", visitor_id, tenant_id);
            SessionState::new(tenant_id, visitor_id)
        }))
    }

    /// Upsert with merge semantics: `None` fields keep their stored value
    #[inline]
    pub async fn write(
        &self,
        tenant_id: &str,
        visitor_id: &str,
        update: &SessionUpdate,
    ) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }
        bounded(
            self.timeout,
            "session write",
            self.store.save_session(tenant_id, visitor_id, update),
        )
        .await
    }

    /// Final mutation of a turn
    #[inline]
    pub async fn commit(&self, commit: TurnCommit) -> Result<()> {
        bounded(self.timeout, "turn commit", self.store.commit_turn(commit)).await
    }

    #[inline]
    pub async fn reset(&self, tenant_id: &str, visitor_id: &str) -> Result<()> {
        bounded(
            self.timeout,
            "session reset",
            self.store.reset_session(tenant_id, visitor_id),
        )
        .await?;
        info!("Session reset for visitor {} of tenant {}", visitor_id, tenant_id);
        Ok(())
    }
}
