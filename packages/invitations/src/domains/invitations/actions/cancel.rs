//! Cancel actions - the inviter withdraws one invitation or a whole family

use tracing::info;

use crate::common::InvitationId;
use crate::domains::invitations::error::InvitationResult;
use crate::domains::invitations::models::{FamilyKey, Invitation};
use crate::kernel::InvitationDeps;

/// Cancel a pending invitation. No key is needed; callers authorize the
/// inviter before calling.
pub async fn cancel_invitation(id: InvitationId, deps: &InvitationDeps) -> InvitationResult<Invitation> {
    let invitation = deps.repository().get_by_id(id).await?;
    let cancelled = invitation.cancel(deps.store.as_ref()).await?;

    info!(invitation_id = %id, "Invitation cancelled");
    Ok(cancelled)
}

/// Cancel every pending invitation in a family. Returns how many changed.
pub async fn cancel_invitation_family(family: &FamilyKey, deps: &InvitationDeps) -> InvitationResult<u64> {
    deps.repository().cancel_family(family).await
}
