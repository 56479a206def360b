//! Typed ID definitions for entities owned by this crate, plus aliases for
//! the integer keys of collaborators (principals, contexts, user groups).

pub use super::id::Id;

/// Marker type for Invitation records.
pub struct Invitation;

/// Typed ID for Invitation records.
pub type InvitationId = Id<Invitation>;

/// Principal (user account) id, owned by the principal store.
pub type UserId = i64;

/// Tenant scope an invitation belongs to.
pub type ContextId = i64;

/// Role-carrying group within a context.
pub type UserGroupId = i64;

/// Secondary key narrowing a family, e.g. a review assignment.
pub type AssocId = i64;
