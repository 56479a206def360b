//! Test fixtures for building invitations and collaborator state.

use chrono::{Duration, Utc};
use invitations_core::common::{AssocId, ContextId, UserGroupId, UserId};
use invitations_core::domains::invitations::{IdentityKey, Invitation, InvitationType};
use invitations_core::kernel::{MockPrincipalStore, ReviewAssignment, ReviewAssignmentStatus};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Context id no other test uses, for tests sharing a database
pub fn unique_context() -> ContextId {
    (Uuid::new_v4().as_u128() as i64 & 0x7fff_ffff_ffff) + 1
}

/// Draft `userRoleAssignment` invitation for an email
pub fn role_invitation(email: &str, context_id: ContextId, add: &[UserGroupId], remove: &[UserGroupId]) -> Invitation {
    let identity = IdentityKey::for_email(InvitationType::UserRoleAssignment, email, context_id);
    let mut invitation = Invitation::draft(identity);
    invitation
        .payload_mut()
        .set("userGroupsToAdd", add)
        .expect("userGroupsToAdd is writable in draft");
    invitation
        .payload_mut()
        .set("userGroupsToRemove", remove)
        .expect("userGroupsToRemove is writable in draft");
    invitation
}

/// Draft `reviewerAccess` invitation for an existing reviewer
pub fn reviewer_invitation(reviewer_id: UserId, context_id: ContextId, assoc_id: AssocId) -> Invitation {
    let identity = IdentityKey::for_user(InvitationType::ReviewerAccess, reviewer_id, context_id).with_assoc(assoc_id);
    let due = (Utc::now() + Duration::days(14)).date_naive().format("%Y-%m-%d").to_string();
    let mut invitation = Invitation::draft(identity);
    invitation
        .payload_mut()
        .set("responseDueDate", due)
        .expect("responseDueDate is writable in draft");
    invitation
}

/// Draft `registrationAccess` invitation
pub fn registration_invitation(user_id: UserId, email: &str, context_id: ContextId) -> Invitation {
    let identity = IdentityKey::for_email(InvitationType::RegistrationAccess, email, context_id).with_user(user_id);
    Invitation::draft(identity)
}

/// Principal store where `groups` exist in `context_id`
pub fn principals_with_groups(context_id: ContextId, groups: &[UserGroupId]) -> MockPrincipalStore {
    MockPrincipalStore::new().with_groups(context_id, groups)
}

pub fn awaiting_assignment(id: AssocId, reviewer_id: UserId, context_id: ContextId) -> ReviewAssignment {
    ReviewAssignment {
        id,
        reviewer_id,
        context_id,
        status: ReviewAssignmentStatus::AwaitingResponse,
        response_due: None,
    }
}

/// Invitee submission from a JSON object literal
pub fn submission(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("submission must be a JSON object, got {}", other),
    }
}
