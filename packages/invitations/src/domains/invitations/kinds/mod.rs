//! Type registry: one [`InvitationKind`] per [`InvitationType`] tag.
//!
//! The set of kinds is closed. Resolving a tag is an exhaustive `match`, so
//! adding a kind means adding a variant and the compiler points at every
//! place that needs to learn about it.

mod registration_access;
mod reviewer_access;
mod user_role_assignment;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use registration_access::RegistrationAccess;
pub use reviewer_access::ReviewerAccess;
pub use user_role_assignment::UserRoleAssignment;

use super::error::InvitationResult;
use super::mailable::MailContent;
use super::models::Invitation;
use super::payload::{Payload, PayloadSchema};
use super::token::TokenService;
use super::validation::{Rule, RuleMessage, ValidationContext, ValidationErrors, ValidationMessages, ValidationPhase};
use crate::kernel::{BasePrincipalStore, BaseReviewAssignments};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InvitationType {
    UserRoleAssignment,
    ReviewerAccess,
    RegistrationAccess,
}

impl InvitationType {
    pub const ALL: [InvitationType; 3] = [
        InvitationType::UserRoleAssignment,
        InvitationType::ReviewerAccess,
        InvitationType::RegistrationAccess,
    ];

    /// Tag stored in the `type` column
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationType::UserRoleAssignment => "userRoleAssignment",
            InvitationType::ReviewerAccess => "reviewerAccess",
            InvitationType::RegistrationAccess => "registrationAccess",
        }
    }

    pub fn kind(&self) -> &'static dyn InvitationKind {
        match self {
            InvitationType::UserRoleAssignment => &UserRoleAssignment,
            InvitationType::ReviewerAccess => &ReviewerAccess,
            InvitationType::RegistrationAccess => &RegistrationAccess,
        }
    }
}

impl std::fmt::Display for InvitationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for InvitationType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "userRoleAssignment" => Ok(InvitationType::UserRoleAssignment),
            "reviewerAccess" => Ok(InvitationType::ReviewerAccess),
            "registrationAccess" => Ok(InvitationType::RegistrationAccess),
            _ => Err(anyhow::anyhow!("Invalid invitation type: {}", s)),
        }
    }
}

/// What the repository does to the family before inserting a new member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreDispatchAction {
    /// Cancel every pending member of the family
    CancelFamily,
    None,
}

/// Stores a kind may act on once the invitee has responded.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub principals: &'a dyn BasePrincipalStore,
    pub reviews: &'a dyn BaseReviewAssignments,
}

/// Behavior that varies per invitation type.
#[async_trait]
pub trait InvitationKind: Send + Sync {
    fn invitation_type(&self) -> InvitationType;

    fn payload_schema(&self) -> PayloadSchema;

    /// Declarative rules for exactly this phase
    fn rules(&self, phase: ValidationPhase) -> Vec<Rule>;

    /// Message overrides for this phase
    fn messages(&self, _phase: ValidationPhase) -> Vec<RuleMessage> {
        Vec::new()
    }

    /// Checks that need collaborators. Failures are added to `errors`.
    async fn check(
        &self,
        _phase: ValidationPhase,
        _invitation: &Invitation,
        _ctx: &ValidationContext<'_>,
        _messages: &ValidationMessages,
        _errors: &mut ValidationErrors,
    ) -> InvitationResult<()> {
        Ok(())
    }

    /// Payload fields an invitee may send with a decline. Anything else in
    /// a decline submission is rejected.
    fn decline_fields(&self) -> &'static [&'static str] {
        &[]
    }

    fn pre_dispatch_action(&self) -> PreDispatchAction {
        PreDispatchAction::CancelFamily
    }

    fn mail_content(&self, invitation: &Invitation) -> InvitationResult<MailContent>;

    fn update_payload(&self, _phase: ValidationPhase, _payload: &mut Payload, _tokens: &TokenService) -> InvitationResult<()> {
        Ok(())
    }

    async fn on_accepted(&self, _invitation: &Invitation, _collaborators: &Collaborators<'_>) -> InvitationResult<()> {
        Ok(())
    }

    async fn on_declined(&self, _invitation: &Invitation, _collaborators: &Collaborators<'_>) -> InvitationResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_round_trip() {
        for invitation_type in InvitationType::ALL {
            let parsed: InvitationType = invitation_type.as_str().parse().unwrap();
            assert_eq!(parsed, invitation_type);
            assert_eq!(
                serde_json::to_value(invitation_type).unwrap(),
                serde_json::json!(invitation_type.as_str())
            );
        }
    }

    #[test]
    fn test_unknown_tag_rejected() {
        assert!("adminAccess".parse::<InvitationType>().is_err());
        assert!("UserRoleAssignment".parse::<InvitationType>().is_err());
    }

    #[test]
    fn test_registry_resolves_matching_kind() {
        for invitation_type in InvitationType::ALL {
            assert_eq!(invitation_type.kind().invitation_type(), invitation_type);
        }
    }

    #[test]
    fn test_shipped_kinds_supersede_their_family() {
        for invitation_type in InvitationType::ALL {
            assert_eq!(
                invitation_type.kind().pre_dispatch_action(),
                PreDispatchAction::CancelFamily
            );
        }
    }
}
