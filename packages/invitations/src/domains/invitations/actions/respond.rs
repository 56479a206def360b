//! Accept and decline actions - the invitee's side of an invitation

use serde_json::{Map, Value};
use tracing::{error, info};

use crate::common::InvitationId;
use crate::domains::invitations::error::InvitationResult;
use crate::domains::invitations::models::Invitation;
use crate::domains::invitations::validation::{validate, ValidationErrors, ValidationPhase};
use crate::kernel::InvitationDeps;

/// Accept an invitation with the invitee's submitted fields.
///
/// This action:
/// 1. Looks the invitation up by id and key
/// 2. Applies the submission (only fields the invitee may write)
/// 3. Validates FINALIZE rules, then normalizes the payload
/// 4. Moves the record to accepted
/// 5. Hands off to the kind (group changes, assignment response, ...)
///
/// Returns the accepted invitation.
pub async fn accept_invitation(
    id: InvitationId,
    key: &str,
    submission: Map<String, Value>,
    deps: &InvitationDeps,
) -> InvitationResult<Invitation> {
    let mut invitation = deps.repository().get_by_id_and_key(id, key).await?;
    invitation.payload_mut().apply_submission(submission)?;

    validate(&invitation, ValidationPhase::Finalize, &deps.validation_context(None)).await?;
    invitation.update_payload(ValidationPhase::Finalize, &deps.tokens)?;

    let accepted = invitation.accept(deps.store.as_ref()).await?;

    if let Err(e) = accepted.kind().on_accepted(&accepted, &deps.collaborators()).await {
        error!(invitation_id = %id, error = %e, "Accepted invitation hand-off failed");
        return Err(e);
    }

    info!(
        invitation_id = %id,
        invitation_type = %accepted.invitation_type(),
        "Invitation accepted"
    );
    Ok(accepted)
}

/// Decline an invitation.
///
/// The submission may only carry the fields the kind takes with a decline
/// (a reviewer's reason, say). It is validated and normalized under the
/// `Decline` phase before the record moves to declined.
pub async fn decline_invitation(
    id: InvitationId,
    key: &str,
    submission: Map<String, Value>,
    deps: &InvitationDeps,
) -> InvitationResult<Invitation> {
    let mut invitation = deps.repository().get_by_id_and_key(id, key).await?;
    reject_fields_outside(invitation.kind().decline_fields(), &submission)?;
    invitation.payload_mut().apply_submission(submission)?;

    validate(&invitation, ValidationPhase::Decline, &deps.validation_context(None)).await?;
    invitation.update_payload(ValidationPhase::Decline, &deps.tokens)?;

    let declined = invitation.decline(deps.store.as_ref()).await?;

    if let Err(e) = declined.kind().on_declined(&declined, &deps.collaborators()).await {
        error!(invitation_id = %id, error = %e, "Declined invitation hand-off failed");
        return Err(e);
    }

    info!(
        invitation_id = %id,
        invitation_type = %declined.invitation_type(),
        "Invitation declined"
    );
    Ok(declined)
}

fn reject_fields_outside(allowed: &[&str], submission: &Map<String, Value>) -> InvitationResult<()> {
    let mut errors = ValidationErrors::new();
    for field in submission.keys().filter(|f| !allowed.contains(&f.as_str())) {
        errors.add(field, format!("The {} field cannot be sent with a decline.", field));
    }
    errors.into_result()
}
