//! Dispatch action - validates, persists and mails a new invitation

use tracing::{error, info};

use crate::common::UserId;
use crate::domains::invitations::error::{InvitationError, InvitationResult};
use crate::domains::invitations::mailable::Mailable;
use crate::domains::invitations::models::Invitation;
use crate::domains::invitations::validation::{validate, ValidationErrors, ValidationPhase};
use crate::kernel::InvitationDeps;

/// Outcome of a dispatch. The mailable carries the only copy of the key.
#[derive(Debug)]
pub struct DispatchedInvitation {
    pub invitation: Invitation,
    /// Pending family members this dispatch cancelled
    pub superseded: u64,
    pub mailable: Mailable,
}

/// Send an invitation out.
///
/// This action:
/// 1. Validates the draft (DEFAULT + INVITE); nothing is persisted on failure
/// 2. Normalizes and freezes the payload
/// 3. Persists it as pending, superseding its family
/// 4. Renders the mailable and hands it to the mailer
///
/// `actor` is the principal issuing the invitation, recorded as its inviter.
pub async fn dispatch_invitation(
    mut invitation: Invitation,
    actor: Option<UserId>,
    deps: &InvitationDeps,
) -> InvitationResult<DispatchedInvitation> {
    if invitation.is_persisted() {
        return Err(InvitationError::AlreadyHandled);
    }
    if let (Some(actor), None) = (actor, invitation.inviter_id()) {
        invitation = invitation.with_inviter(actor);
    }

    validate(&invitation, ValidationPhase::Invite, &deps.validation_context(actor)).await?;

    invitation.update_payload(ValidationPhase::Invite, &deps.tokens)?;
    invitation.payload_mut().mark_dispatched();

    let recipient = recipient(&invitation, deps).await?;
    let created = deps.repository().create(&invitation, deps.default_ttl).await?;
    let mailable = created
        .invitation
        .mailable(&created.plaintext_key, &deps.mail, &recipient)?;

    if let Err(e) = deps.mailer.send(&mailable).await {
        // The record stays pending; dispatching again supersedes it
        error!(invitation_id = %created.invitation.id(), error = %e, "Failed to send invitation");
        return Err(e.into());
    }

    info!(
        invitation_id = %created.invitation.id(),
        invitation_type = %created.invitation.invitation_type(),
        superseded = created.superseded,
        "Invitation dispatched"
    );

    Ok(DispatchedInvitation {
        invitation: created.invitation,
        superseded: created.superseded,
        mailable,
    })
}

/// Address the mail goes to: the invitation's email, else the account's.
async fn recipient(invitation: &Invitation, deps: &InvitationDeps) -> InvitationResult<String> {
    let identity = invitation.identity();
    if let Some(email) = &identity.email {
        return Ok(email.clone());
    }

    let principal = match identity.user_id {
        Some(user_id) => deps.principals.find_by_id(user_id).await?,
        None => None,
    };
    match principal {
        Some(principal) => Ok(principal.email),
        None => {
            let mut errors = ValidationErrors::new();
            errors.add("email", "There is no address to send this invitation to.");
            Err(InvitationError::Validation(errors))
        }
    }
}
