use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::info;

use super::{Collaborators, InvitationKind, InvitationType};
use crate::common::AssocId;
use crate::domains::invitations::error::{InvitationError, InvitationResult};
use crate::domains::invitations::mailable::MailContent;
use crate::domains::invitations::models::Invitation;
use crate::domains::invitations::payload::{FieldSpec, PayloadSchema};
use crate::domains::invitations::validation::{
    Constraint, Rule, RuleMessage, ValidationContext, ValidationErrors, ValidationMessages, ValidationPhase,
};
use crate::kernel::ReviewAssignmentStatus;

const FIELDS: &[FieldSpec] = &[
    FieldSpec::frozen_after_dispatch("responseDueDate"),
    FieldSpec::frozen_after_dispatch("message"),
    FieldSpec::hidden_before_dispatch("declineReason"),
];

/// Ask a registered reviewer to take on a review assignment (`assocId`).
pub struct ReviewerAccess;

impl ReviewerAccess {
    fn assignment_id(invitation: &Invitation) -> InvitationResult<AssocId> {
        invitation
            .identity()
            .assoc_id
            .ok_or_else(|| InvitationError::Internal(anyhow::anyhow!("Reviewer invitation without an assignment")))
    }

    async fn check_invite(
        invitation: &Invitation,
        ctx: &ValidationContext<'_>,
        messages: &ValidationMessages,
        errors: &mut ValidationErrors,
    ) -> InvitationResult<()> {
        let identity = invitation.identity();
        let (Some(user_id), Some(assoc_id)) = (identity.user_id, identity.assoc_id) else {
            // Reported by the declarative `required` rules
            return Ok(());
        };

        if ctx.principals.find_by_id(user_id).await?.is_none() {
            errors.add("userId", format!("No account exists with id {}.", user_id));
        }

        match ctx.reviews.find(assoc_id).await? {
            Some(assignment) if assignment.reviewer_id == user_id && assignment.context_id == identity.context_id => {
                if assignment.status != ReviewAssignmentStatus::AwaitingResponse {
                    errors.add(
                        "assocId",
                        messages
                            .text("assocId", "awaiting_response")
                            .unwrap_or_else(|| "The reviewer has already responded to this assignment.".to_string()),
                    );
                }
            }
            _ => errors.add(
                "assocId",
                messages
                    .text("assocId", "exists")
                    .unwrap_or_else(|| "No matching review assignment exists for this reviewer.".to_string()),
            ),
        }

        if let Some(due) = invitation.payload().get_as::<NaiveDate>("responseDueDate").ok().flatten() {
            if due < ctx.now.date_naive() {
                errors.add(
                    "responseDueDate",
                    messages
                        .text("responseDueDate", "after_or_equal")
                        .unwrap_or_else(|| "The response due date may not be in the past.".to_string()),
                );
            }
        }
        Ok(())
    }

    async fn check_still_open(
        invitation: &Invitation,
        ctx: &ValidationContext<'_>,
        messages: &ValidationMessages,
        errors: &mut ValidationErrors,
    ) -> InvitationResult<()> {
        let assoc_id = Self::assignment_id(invitation)?;
        let awaiting = ctx
            .reviews
            .find(assoc_id)
            .await?
            .is_some_and(|a| a.status == ReviewAssignmentStatus::AwaitingResponse);
        if !awaiting {
            errors.add(
                "assocId",
                messages
                    .text("assocId", "awaiting_response")
                    .unwrap_or_else(|| "This review assignment is no longer open.".to_string()),
            );
        }
        Ok(())
    }
}

#[async_trait]
impl InvitationKind for ReviewerAccess {
    fn invitation_type(&self) -> InvitationType {
        InvitationType::ReviewerAccess
    }

    fn payload_schema(&self) -> PayloadSchema {
        PayloadSchema::new(FIELDS)
    }

    fn rules(&self, phase: ValidationPhase) -> Vec<Rule> {
        match phase {
            ValidationPhase::Default => vec![
                Rule::new("responseDueDate", Constraint::Date),
                Rule::new("message", Constraint::MaxLength(2000)),
            ],
            ValidationPhase::Invite => vec![
                Rule::new("userId", Constraint::Required),
                Rule::new("assocId", Constraint::Required),
                Rule::new("responseDueDate", Constraint::Required),
            ],
            ValidationPhase::Finalize => Vec::new(),
            ValidationPhase::Decline => vec![Rule::new("declineReason", Constraint::MaxLength(2000))],
        }
    }

    fn decline_fields(&self) -> &'static [&'static str] {
        &["declineReason"]
    }

    fn messages(&self, phase: ValidationPhase) -> Vec<RuleMessage> {
        match phase {
            ValidationPhase::Invite => vec![RuleMessage::new(
                "assocId",
                "required",
                "A reviewer invitation must name its review assignment.",
            )],
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
        match phase {
            ValidationPhase::Default => Ok(()),
            ValidationPhase::Invite => Self::check_invite(invitation, ctx, messages, errors).await,
            ValidationPhase::Finalize | ValidationPhase::Decline => {
                Self::check_still_open(invitation, ctx, messages, errors).await
            }
        }
    }

    fn mail_content(&self, invitation: &Invitation) -> InvitationResult<MailContent> {
        let payload = invitation.payload();
        let mut body = String::from("You have been asked to review a submission.\n");
        if let Some(due) = payload.get_as::<String>("responseDueDate")? {
            body.push_str(&format!("\nPlease respond by {}.\n", due));
        }
        if let Some(message) = payload.get_as::<String>("message")? {
            body.push_str(&format!("\n{}\n", message));
        }
        body.push_str("\nUse the links below to accept or decline the request.");

        Ok(MailContent {
            subject: "Review request".to_string(),
            body,
        })
    }

    async fn on_accepted(&self, invitation: &Invitation, collaborators: &Collaborators<'_>) -> InvitationResult<()> {
        let assoc_id = Self::assignment_id(invitation)?;
        collaborators.reviews.respond(assoc_id, true, None).await?;
        info!(assoc_id, "Review assignment accepted");
        Ok(())
    }

    async fn on_declined(&self, invitation: &Invitation, collaborators: &Collaborators<'_>) -> InvitationResult<()> {
        let assoc_id = Self::assignment_id(invitation)?;
        let reason = invitation.payload().get_as::<String>("declineReason")?;
        collaborators
            .reviews
            .respond(assoc_id, false, reason.as_deref())
            .await?;
        info!(assoc_id, "Review assignment declined");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::invitations::models::IdentityKey;

    fn invitation() -> Invitation {
        let identity = IdentityKey::for_user(InvitationType::ReviewerAccess, 7, 1).with_assoc(3);
        let mut invitation = Invitation::draft(identity);
        invitation.payload_mut().set("responseDueDate", "2030-01-15").unwrap();
        invitation
    }

    #[test]
    fn test_decline_reason_hidden_until_dispatched() {
        let mut invitation = invitation();
        assert!(invitation.payload().get("declineReason").is_err());

        invitation.payload_mut().mark_dispatched();
        assert!(invitation.payload_mut().set("declineReason", "Conflict of interest").is_ok());
        assert!(invitation.payload_mut().set("responseDueDate", "2031-01-01").is_err());
    }

    #[test]
    fn test_decline_reason_bounded_only_on_decline() {
        let bounded = |phase| {
            ReviewerAccess
                .rules(phase)
                .iter()
                .any(|r| r.field == "declineReason" && r.constraint == Constraint::MaxLength(2000))
        };
        assert!(bounded(ValidationPhase::Decline));
        assert!(!bounded(ValidationPhase::Finalize));
        assert_eq!(ReviewerAccess.decline_fields(), ["declineReason"]);
    }

    #[test]
    fn test_mail_mentions_due_date() {
        let content = ReviewerAccess.mail_content(&invitation()).unwrap();
        assert!(content.body.contains("Please respond by 2030-01-15."));
    }

    #[test]
    fn test_assignment_id_required_for_hand_off() {
        let identity = IdentityKey::for_user(InvitationType::ReviewerAccess, 7, 1);
        let invitation = Invitation::draft(identity);
        assert!(ReviewerAccess::assignment_id(&invitation).is_err());
    }
}
