use async_trait::async_trait;
use tracing::info;

use super::{Collaborators, InvitationKind, InvitationType};
use crate::domains::invitations::error::{InvitationError, InvitationResult};
use crate::domains::invitations::mailable::MailContent;
use crate::domains::invitations::models::Invitation;
use crate::domains::invitations::payload::PayloadSchema;
use crate::domains::invitations::validation::{
    Constraint, Rule, ValidationContext, ValidationErrors, ValidationMessages, ValidationPhase,
};

/// Confirm the email address of a freshly registered account.
pub struct RegistrationAccess;

#[async_trait]
impl InvitationKind for RegistrationAccess {
    fn invitation_type(&self) -> InvitationType {
        InvitationType::RegistrationAccess
    }

    fn payload_schema(&self) -> PayloadSchema {
        PayloadSchema::new(&[])
    }

    fn rules(&self, phase: ValidationPhase) -> Vec<Rule> {
        match phase {
            ValidationPhase::Invite => vec![
                Rule::new("userId", Constraint::Required),
                Rule::new("email", Constraint::Required),
            ],
            _ => Vec::new(),
        }
    }

    async fn check(
        &self,
        phase: ValidationPhase,
        invitation: &Invitation,
        ctx: &ValidationContext<'_>,
        messages: &ValidationMessages,
        errors: &mut ValidationErrors,
    ) -> InvitationResult<()> {
        if phase != ValidationPhase::Invite {
            return Ok(());
        }
        let identity = invitation.identity();
        let Some(user_id) = identity.user_id else {
            return Ok(());
        };

        let Some(principal) = ctx.principals.find_by_id(user_id).await? else {
            errors.add("userId", format!("No account exists with id {}.", user_id));
            return Ok(());
        };

        let matches = identity
            .email
            .as_deref()
            .is_some_and(|email| email.eq_ignore_ascii_case(&principal.email));
        if !matches {
            errors.add(
                "email",
                messages
                    .text("email", "matches_account")
                    .unwrap_or_else(|| "The email does not belong to this account.".to_string()),
            );
        }
        if principal.email_validated {
            errors.add(
                "userId",
                messages
                    .text("userId", "unvalidated")
                    .unwrap_or_else(|| "This account's email is already confirmed.".to_string()),
            );
        }
        Ok(())
    }

    fn mail_content(&self, _invitation: &Invitation) -> InvitationResult<MailContent> {
        Ok(MailContent {
            subject: "Confirm your email address".to_string(),
            body: "Thanks for registering. Follow the accept link below to confirm your email address.".to_string(),
        })
    }

    async fn on_accepted(&self, invitation: &Invitation, collaborators: &Collaborators<'_>) -> InvitationResult<()> {
        let user_id = invitation
            .identity()
            .user_id
            .ok_or_else(|| InvitationError::Internal(anyhow::anyhow!("Registration invitation without an account")))?;
        collaborators.principals.mark_email_validated(user_id).await?;
        info!(user_id, "Email address confirmed");
        Ok(())
    }
}
