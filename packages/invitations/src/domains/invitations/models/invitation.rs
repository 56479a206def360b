use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use super::record::{FamilyKey, InvitationRecord, InvitationStatus};
use crate::common::{AssocId, ContextId, InvitationId, UserId};
use crate::domains::invitations::error::{InvitationError, InvitationResult};
use crate::domains::invitations::kinds::{InvitationKind, InvitationType, PreDispatchAction};
use crate::domains::invitations::mailable::{resolution_url, MailSettings, Mailable, ResolutionAction};
use crate::domains::invitations::payload::{Payload, PayloadAccessError};
use crate::domains::invitations::token::{IssuedToken, TokenService};
use crate::domains::invitations::validation::{identity_rules, Rule, ValidationMessages, ValidationPhase};
use crate::kernel::BaseInvitationStore;

/// Who and what an invitation is about. Four of these fields
/// (type, email, context, assoc) name its family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityKey {
    pub invitation_type: InvitationType,
    pub email: Option<String>,
    pub user_id: Option<UserId>,
    pub context_id: ContextId,
    pub assoc_id: Option<AssocId>,
}

impl IdentityKey {
    /// Invitation addressed to an email, known principal or not.
    pub fn for_email(invitation_type: InvitationType, email: &str, context_id: ContextId) -> Self {
        Self {
            invitation_type,
            email: Some(email.trim().to_lowercase()),
            user_id: None,
            context_id,
            assoc_id: None,
        }
    }

    /// Invitation addressed to a known principal.
    pub fn for_user(invitation_type: InvitationType, user_id: UserId, context_id: ContextId) -> Self {
        Self {
            invitation_type,
            email: None,
            user_id: Some(user_id),
            context_id,
            assoc_id: None,
        }
    }

    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_assoc(mut self, assoc_id: AssocId) -> Self {
        self.assoc_id = Some(assoc_id);
        self
    }

    pub fn family(&self) -> FamilyKey {
        FamilyKey::new(
            self.invitation_type,
            self.email.clone(),
            self.user_id,
            self.context_id,
            self.assoc_id,
        )
    }
}

/// Timestamps that exist once an invitation has been persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Persisted {
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// An invitation of any kind: identity key, payload and status, with the
/// kind-specific behavior resolved through [`InvitationType::kind`].
#[derive(Debug, Clone)]
pub struct Invitation {
    id: InvitationId,
    identity: IdentityKey,
    payload: Payload,
    status: InvitationStatus,
    inviter_id: Option<UserId>,
    persisted: Option<Persisted>,
}

impl Invitation {
    /// New, unpersisted invitation with an empty payload for its kind.
    pub fn draft(identity: IdentityKey) -> Self {
        let payload = Payload::new(identity.invitation_type.kind().payload_schema());
        Self::new(identity, payload)
    }

    pub fn new(identity: IdentityKey, payload: Payload) -> Self {
        Self {
            id: InvitationId::new(),
            identity,
            payload,
            status: InvitationStatus::Pending,
            inviter_id: None,
            persisted: None,
        }
    }

    pub fn with_inviter(mut self, inviter_id: UserId) -> Self {
        self.inviter_id = Some(inviter_id);
        self
    }

    /// Rebuild an invitation from storage through the type registry.
    pub fn from_record(record: InvitationRecord) -> InvitationResult<Self> {
        let invitation_type: InvitationType = record.invitation_type.parse()?;
        let payload = Payload::from_stored(invitation_type.kind().payload_schema(), record.payload);

        Ok(Self {
            id: record.id,
            identity: IdentityKey {
                invitation_type,
                email: record.email,
                user_id: record.user_id,
                context_id: record.context_id,
                assoc_id: record.assoc_id,
            },
            payload,
            status: record.status,
            inviter_id: record.inviter_id,
            persisted: Some(Persisted {
                expires_at: record.expires_at,
                created_at: record.created_at,
                updated_at: record.updated_at,
            }),
        })
    }

    /// Storage row for a new pending invitation. Only the key's selector and
    /// hash are carried over; the plaintext stays with the caller.
    pub fn to_record(&self, token: &IssuedToken, expires_at: DateTime<Utc>) -> InvitationRecord {
        InvitationRecord::builder()
            .id(self.id)
            .invitation_type(self.identity.invitation_type.as_str())
            .email(self.identity.email.as_ref().map(|e| e.trim().to_lowercase()))
            .user_id(self.identity.user_id)
            .context_id(self.identity.context_id)
            .assoc_id(self.identity.assoc_id)
            .key_selector(token.selector.clone())
            .key_hash(token.hash.clone())
            .expires_at(expires_at)
            .payload(self.payload.to_stored())
            .inviter_id(self.inviter_id)
            .build()
    }

    pub fn id(&self) -> InvitationId {
        self.id
    }

    pub fn identity(&self) -> &IdentityKey {
        &self.identity
    }

    pub fn invitation_type(&self) -> InvitationType {
        self.identity.invitation_type
    }

    pub fn kind(&self) -> &'static dyn InvitationKind {
        self.identity.invitation_type.kind()
    }

    pub fn family(&self) -> FamilyKey {
        self.identity.family()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut Payload {
        &mut self.payload
    }

    pub fn status(&self) -> InvitationStatus {
        self.status
    }

    pub fn inviter_id(&self) -> Option<UserId> {
        self.inviter_id
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted.is_some()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.persisted.map(|p| p.expires_at)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.persisted.map(|p| p.created_at)
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.persisted.map(|p| p.updated_at)
    }

    /// Past its expiry. Drafts never expire.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|at| at <= now)
    }

    /// Value a validation rule sees for `field`: identity fields first, then
    /// the payload under its current visibility rules.
    pub fn field_value(&self, field: &str) -> Result<Option<Value>, PayloadAccessError> {
        let identity = &self.identity;
        let value = match field {
            "email" => identity.email.as_ref().map(|e| json!(e)),
            "userId" => identity.user_id.map(|id| json!(id)),
            "contextId" => Some(json!(identity.context_id)),
            "assocId" => identity.assoc_id.map(|id| json!(id)),
            _ => self.payload.get(field)?.cloned(),
        };
        Ok(value)
    }

    /// Generic identity rules merged with the kind's rules. `Default` rules
    /// are always part of the set.
    pub fn validation_rules(&self, phase: ValidationPhase) -> Vec<Rule> {
        let kind = self.kind();
        let mut rules = identity_rules(ValidationPhase::Default);
        rules.extend(kind.rules(ValidationPhase::Default));
        if phase != ValidationPhase::Default {
            rules.extend(identity_rules(phase));
            rules.extend(kind.rules(phase));
        }
        rules
    }

    pub fn validation_messages(&self, phase: ValidationPhase) -> ValidationMessages {
        let kind = self.kind();
        let mut overrides = kind.messages(phase);
        if phase != ValidationPhase::Default {
            overrides.extend(kind.messages(ValidationPhase::Default));
        }
        ValidationMessages::new(overrides)
    }

    pub fn pre_dispatch_action(&self) -> PreDispatchAction {
        self.kind().pre_dispatch_action()
    }

    /// Phase-dependent payload normalization by the kind.
    pub fn update_payload(&mut self, phase: ValidationPhase, tokens: &TokenService) -> InvitationResult<()> {
        let kind = self.kind();
        kind.update_payload(phase, &mut self.payload, tokens)
    }

    /// Render the message carrying the accept/decline links.
    pub fn mailable(&self, plaintext_key: &str, settings: &MailSettings, recipient: &str) -> InvitationResult<Mailable> {
        let content = self.kind().mail_content(self)?;
        Ok(Mailable {
            from: settings.from.clone(),
            to: vec![recipient.to_string()],
            subject: content.subject,
            body: content.body,
            accept_url: resolution_url(&settings.base_url, self.id, ResolutionAction::Accept, plaintext_key)?,
            decline_url: resolution_url(&settings.base_url, self.id, ResolutionAction::Decline, plaintext_key)?,
        })
    }

    pub async fn accept(&self, store: &dyn BaseInvitationStore) -> InvitationResult<Invitation> {
        self.transition(InvitationStatus::Accepted, store).await
    }

    pub async fn decline(&self, store: &dyn BaseInvitationStore) -> InvitationResult<Invitation> {
        self.transition(InvitationStatus::Declined, store).await
    }

    pub async fn cancel(&self, store: &dyn BaseInvitationStore) -> InvitationResult<Invitation> {
        self.transition(InvitationStatus::Cancelled, store).await
    }

    /// Move a pending, unexpired invitation to a terminal status. Persists
    /// the current payload along with the status.
    async fn transition(&self, to: InvitationStatus, store: &dyn BaseInvitationStore) -> InvitationResult<Invitation> {
        if !self.is_persisted() {
            return Err(InvitationError::NotFound);
        }
        if self.status.is_terminal() {
            return Err(InvitationError::TransitionConflict);
        }
        if self.is_expired(Utc::now()) {
            return Err(InvitationError::Expired);
        }

        match store.transition(self.id, to, &self.payload.to_stored()).await? {
            Some(record) => {
                info!(invitation_id = %self.id, status = %to, "Invitation resolved");
                Invitation::from_record(record)
            }
            None => {
                // Lost the race, or expiry passed between the check and the update
                let current = store.find_by_id(self.id).await?.ok_or(InvitationError::NotFound)?;
                if current.status == InvitationStatus::Pending && current.is_expired(Utc::now()) {
                    Err(InvitationError::Expired)
                } else {
                    Err(InvitationError::TransitionConflict)
                }
            }
        }
    }
}
