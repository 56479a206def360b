//! Create, look up and cancel invitations over a [`BaseInvitationStore`].
//!
//! Every record leaving the repository is rebuilt through the type registry,
//! so callers only ever see a typed [`Invitation`].

use anyhow::Context;
use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use super::error::{InvitationError, InvitationResult};
use super::kinds::PreDispatchAction;
use super::models::{FamilyKey, Invitation, InvitationRecord, InvitationStatus};
use super::token::{IssuedToken, TokenService};
use crate::common::InvitationId;
use crate::kernel::BaseInvitationStore;

/// A freshly persisted invitation and the only copy of its plaintext key.
pub struct CreatedInvitation {
    pub invitation: Invitation,
    pub plaintext_key: String,
    /// Pending family members cancelled by this create
    pub superseded: u64,
}

impl std::fmt::Debug for CreatedInvitation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreatedInvitation")
            .field("invitation", &self.invitation)
            .field("plaintext_key", &"<redacted>")
            .field("superseded", &self.superseded)
            .finish()
    }
}

pub struct InvitationRepository<'a> {
    store: &'a dyn BaseInvitationStore,
    tokens: &'a TokenService,
}

impl<'a> InvitationRepository<'a> {
    pub fn new(store: &'a dyn BaseInvitationStore, tokens: &'a TokenService) -> Self {
        Self { store, tokens }
    }

    /// Issue a key and persist `invitation` as pending for `ttl`.
    ///
    /// The kind's pre-dispatch action (family supersession for every shipped
    /// kind) happens atomically with the insert.
    pub async fn create(&self, invitation: &Invitation, ttl: Duration) -> InvitationResult<CreatedInvitation> {
        let expires_at = Utc::now()
            .checked_add_signed(ttl)
            .with_context(|| format!("Invitation lifetime {} is out of range", ttl))?;
        let issued = self.issue_token().await?;
        let record = invitation.to_record(&issued, expires_at);
        let supersede = invitation.pre_dispatch_action() == PreDispatchAction::CancelFamily;

        let superseded = self.store.insert(&record, supersede).await?;

        info!(
            invitation_id = %record.id,
            invitation_type = %record.invitation_type,
            context_id = record.context_id,
            superseded,
            "Invitation created"
        );

        Ok(CreatedInvitation {
            invitation: Invitation::from_record(record)?,
            plaintext_key: issued.plaintext,
            superseded,
        })
    }

    /// Any invitation by id, whatever its status. No key required; for
    /// inviter-side operations.
    pub async fn get_by_id(&self, id: InvitationId) -> InvitationResult<Invitation> {
        let record = self.store.find_by_id(id).await?.ok_or(InvitationError::NotFound)?;
        Invitation::from_record(record)
    }

    /// A pending, unexpired invitation whose key matches.
    pub async fn get_by_id_and_key(&self, id: InvitationId, key: &str) -> InvitationResult<Invitation> {
        let record = self.store.find_by_id(id).await?.ok_or(InvitationError::NotFound)?;
        self.resolve(record, key).await
    }

    /// A pending, unexpired invitation located by its key alone.
    pub async fn get_by_key(&self, key: &str) -> InvitationResult<Invitation> {
        let selector = TokenService::selector_of(key).ok_or(InvitationError::NotFound)?;
        let record = self
            .store
            .find_by_selector(selector)
            .await?
            .ok_or(InvitationError::NotFound)?;
        self.resolve(record, key).await
    }

    /// Cancel every pending member of a family. Idempotent.
    pub async fn cancel_family(&self, family: &FamilyKey) -> InvitationResult<u64> {
        let cancelled = self.store.cancel_family(family).await?;
        info!(
            invitation_type = %family.invitation_type,
            context_id = family.context_id,
            cancelled,
            "Invitation family cancelled"
        );
        Ok(cancelled)
    }

    /// Every member of a family, newest first
    pub async fn list_family(&self, family: &FamilyKey) -> InvitationResult<Vec<Invitation>> {
        self.store
            .list_family(family)
            .await?
            .into_iter()
            .map(Invitation::from_record)
            .collect()
    }

    /// Key first, then status, so a wrong key learns nothing about the record.
    async fn resolve(&self, record: InvitationRecord, key: &str) -> InvitationResult<Invitation> {
        if !self.verify(key, &record.key_hash).await? {
            warn!(invitation_id = %record.id, "Invitation key mismatch");
            return Err(InvitationError::TokenMismatch);
        }
        if record.status != InvitationStatus::Pending {
            debug!(invitation_id = %record.id, status = %record.status, "Invitation already handled");
            return Err(InvitationError::AlreadyHandled);
        }
        if record.is_expired(Utc::now()) {
            debug!(invitation_id = %record.id, "Invitation expired");
            return Err(InvitationError::Expired);
        }
        Invitation::from_record(record)
    }

    // Argon2 work runs on the blocking pool

    async fn issue_token(&self) -> InvitationResult<IssuedToken> {
        let tokens = self.tokens.clone();
        let issued = tokio::task::spawn_blocking(move || tokens.issue())
            .await
            .context("Token issuing task failed")??;
        Ok(issued)
    }

    async fn verify(&self, key: &str, hash: &str) -> InvitationResult<bool> {
        let tokens = self.tokens.clone();
        let (key, hash) = (key.to_string(), hash.to_string());
        let verified = tokio::task::spawn_blocking(move || tokens.verify(&key, &hash))
            .await
            .context("Token verification task failed")?;
        Ok(verified)
    }
}
