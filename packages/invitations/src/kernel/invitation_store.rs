//! PostgreSQL-backed invitation store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use crate::common::InvitationId;
use crate::domains::invitations::{FamilyKey, InvitationRecord, InvitationStatus};
use crate::kernel::BaseInvitationStore;

/// Stores invitations in the `invitations` table.
///
/// Supersession runs in one transaction holding a family-scoped advisory
/// lock, so two concurrent creates for the same family serialize and leave
/// exactly one pending member.
#[derive(Clone)]
pub struct PostgresInvitationStore {
    pool: PgPool,
}

impl PostgresInvitationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl BaseInvitationStore for PostgresInvitationStore {
    async fn insert(&self, record: &InvitationRecord, supersede: bool) -> Result<u64> {
        let family = record.family()?;
        let mut tx = self.pool.begin().await?;

        InvitationRecord::lock_family(&family, &mut *tx).await?;
        let cancelled = if supersede {
            InvitationRecord::cancel_pending_in_family(&family, &mut *tx).await?
        } else {
            0
        };
        record
            .insert(&mut *tx)
            .await
            .context("Failed to insert invitation")?;

        tx.commit().await?;

        debug!(
            invitation_id = %record.id,
            invitation_type = %record.invitation_type,
            cancelled,
            "Invitation stored"
        );
        Ok(cancelled)
    }

    async fn find_by_id(&self, id: InvitationId) -> Result<Option<InvitationRecord>> {
        InvitationRecord::find_by_id(id, &self.pool).await
    }

    async fn find_by_selector(&self, selector: &str) -> Result<Option<InvitationRecord>> {
        InvitationRecord::find_by_selector(selector, &self.pool).await
    }

    async fn transition(
        &self,
        id: InvitationId,
        to: InvitationStatus,
        payload: &serde_json::Value,
    ) -> Result<Option<InvitationRecord>> {
        InvitationRecord::transition(id, to, payload, &self.pool).await
    }

    async fn cancel_family(&self, family: &FamilyKey) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        InvitationRecord::lock_family(family, &mut *tx).await?;
        let cancelled = InvitationRecord::cancel_pending_in_family(family, &mut *tx).await?;
        tx.commit().await?;
        Ok(cancelled)
    }

    async fn list_family(&self, family: &FamilyKey) -> Result<Vec<InvitationRecord>> {
        InvitationRecord::find_family(family, &self.pool).await
    }
}
