// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// Invitation behavior lives in domains/invitations and is written against these traits.
//
// Naming convention: Base* for trait names (e.g., BaseMailer, BaseInvitationStore)

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::common::{AssocId, ContextId, InvitationId, UserGroupId, UserId};
use crate::domains::invitations::{FamilyKey, InvitationRecord, InvitationStatus, Mailable};

// =============================================================================
// Invitation Store Trait (Infrastructure - persistence)
// =============================================================================

#[async_trait]
pub trait BaseInvitationStore: Send + Sync {
    /// Persist a new pending record.
    ///
    /// With `supersede`, every pending member of the record's family is
    /// cancelled in the same atomic step. Returns how many were cancelled.
    async fn insert(&self, record: &InvitationRecord, supersede: bool) -> Result<u64>;

    async fn find_by_id(&self, id: InvitationId) -> Result<Option<InvitationRecord>>;

    /// Lookup by the public half of a key
    async fn find_by_selector(&self, selector: &str) -> Result<Option<InvitationRecord>>;

    /// Conditional move out of pending. `None` if the record is no longer
    /// pending or has expired.
    async fn transition(
        &self,
        id: InvitationId,
        to: InvitationStatus,
        payload: &serde_json::Value,
    ) -> Result<Option<InvitationRecord>>;

    /// Cancel all pending members of a family. Returns how many changed.
    async fn cancel_family(&self, family: &FamilyKey) -> Result<u64>;

    /// All members of a family, newest first
    async fn list_family(&self, family: &FamilyKey) -> Result<Vec<InvitationRecord>>;
}

// =============================================================================
// Mailer Trait (Infrastructure - message delivery)
// =============================================================================

#[async_trait]
pub trait BaseMailer: Send + Sync {
    /// Hand a rendered invitation to the transport
    async fn send(&self, mailable: &Mailable) -> Result<()>;
}

// =============================================================================
// Principal Store Trait (Infrastructure - users and user groups)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub email_validated: bool,
}

/// Account created on behalf of an invitee. `password_hash` is already a
/// one-way hash.
#[derive(Clone, PartialEq, Eq)]
pub struct NewPrincipal {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub given_name: String,
    pub family_name: Option<String>,
    pub affiliation: Option<String>,
}

impl std::fmt::Debug for NewPrincipal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewPrincipal")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("given_name", &self.given_name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait BasePrincipalStore: Send + Sync {
    async fn find_by_id(&self, id: UserId) -> Result<Option<Principal>>;

    /// Case-insensitive lookup
    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>>;

    async fn username_taken(&self, username: &str) -> Result<bool>;

    async fn create(&self, principal: NewPrincipal) -> Result<Principal>;

    async fn group_exists(&self, context_id: ContextId, group_id: UserGroupId) -> Result<bool>;

    /// Groups the principal holds in a context
    async fn groups_of(&self, user_id: UserId, context_id: ContextId) -> Result<Vec<UserGroupId>>;

    async fn assign_groups(&self, user_id: UserId, context_id: ContextId, groups: &[UserGroupId]) -> Result<()>;

    async fn remove_groups(&self, user_id: UserId, context_id: ContextId, groups: &[UserGroupId]) -> Result<()>;

    async fn mark_email_validated(&self, user_id: UserId) -> Result<()>;
}

// =============================================================================
// Review Assignment Trait (Infrastructure - reviewer workflow)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAssignmentStatus {
    AwaitingResponse,
    Accepted,
    Declined,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewAssignment {
    pub id: AssocId,
    pub reviewer_id: UserId,
    pub context_id: ContextId,
    pub status: ReviewAssignmentStatus,
    pub response_due: Option<NaiveDate>,
}

#[async_trait]
pub trait BaseReviewAssignments: Send + Sync {
    async fn find(&self, id: AssocId) -> Result<Option<ReviewAssignment>>;

    /// Record the reviewer's answer. `reason` only accompanies a decline.
    async fn respond(&self, id: AssocId, accepted: bool, reason: Option<&str>) -> Result<()>;
}
