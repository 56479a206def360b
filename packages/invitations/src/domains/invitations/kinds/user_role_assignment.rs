use async_trait::async_trait;
use std::collections::BTreeSet;
use tracing::info;

use super::{Collaborators, InvitationKind, InvitationType};
use crate::common::{ContextId, UserGroupId};
use crate::domains::invitations::error::{InvitationError, InvitationResult};
use crate::domains::invitations::mailable::MailContent;
use crate::domains::invitations::models::Invitation;
use crate::domains::invitations::payload::{FieldSpec, Payload, PayloadAccessError, PayloadSchema};
use crate::domains::invitations::token::TokenService;
use crate::domains::invitations::validation::{
    Constraint, Rule, RuleMessage, ValidationContext, ValidationErrors, ValidationMessages, ValidationPhase,
};
use crate::kernel::{BasePrincipalStore, NewPrincipal, Principal};

const GROUPS_TO_ADD: &str = "userGroupsToAdd";
const GROUPS_TO_REMOVE: &str = "userGroupsToRemove";
const PASSWORD: &str = "password";
const PASSWORD_HASH: &str = "passwordHash";

const FIELDS: &[FieldSpec] = &[
    FieldSpec::frozen_after_dispatch(GROUPS_TO_ADD),
    FieldSpec::frozen_after_dispatch(GROUPS_TO_REMOVE),
    FieldSpec::frozen_after_dispatch("message"),
    FieldSpec::hidden_before_dispatch("username"),
    FieldSpec::hidden_before_dispatch(PASSWORD),
    FieldSpec::derived(PASSWORD_HASH),
    FieldSpec::hidden_before_dispatch("givenName"),
    FieldSpec::hidden_before_dispatch("familyName"),
    FieldSpec::hidden_before_dispatch("affiliation"),
];

/// Grant and/or revoke user groups in a context. An invitee without an
/// account registers while accepting.
pub struct UserRoleAssignment;

impl UserRoleAssignment {
    /// Account the invitation is about, if one exists yet
    async fn subject(invitation: &Invitation, principals: &dyn BasePrincipalStore) -> InvitationResult<Option<Principal>> {
        let identity = invitation.identity();
        if let Some(user_id) = identity.user_id {
            return Ok(principals.find_by_id(user_id).await?);
        }
        match &identity.email {
            Some(email) => Ok(principals.find_by_email(email).await?),
            None => Ok(None),
        }
    }

    fn groups(payload: &Payload, field: &str) -> InvitationResult<Vec<UserGroupId>> {
        Ok(payload.get_as::<Vec<UserGroupId>>(field)?.unwrap_or_default())
    }

    async fn check_groups_exist(
        context_id: ContextId,
        field: &'static str,
        groups: &[UserGroupId],
        ctx: &ValidationContext<'_>,
        messages: &ValidationMessages,
        errors: &mut ValidationErrors,
    ) -> InvitationResult<()> {
        for group in groups {
            if !ctx.principals.group_exists(context_id, *group).await? {
                errors.add(
                    field,
                    messages
                        .text(field, "exists")
                        .unwrap_or_else(|| format!("User group {} does not exist in this context.", group)),
                );
            }
        }
        Ok(())
    }

    async fn check_invite(
        invitation: &Invitation,
        ctx: &ValidationContext<'_>,
        messages: &ValidationMessages,
        errors: &mut ValidationErrors,
    ) -> InvitationResult<()> {
        let identity = invitation.identity();
        let to_add = Self::groups(invitation.payload(), GROUPS_TO_ADD)?;
        let to_remove = Self::groups(invitation.payload(), GROUPS_TO_REMOVE)?;

        if let Some(user_id) = identity.user_id {
            if ctx.principals.find_by_id(user_id).await?.is_none() {
                errors.add("userId", format!("No account exists with id {}.", user_id));
                return Ok(());
            }
        }

        Self::check_groups_exist(identity.context_id, GROUPS_TO_ADD, &to_add, ctx, messages, errors).await?;
        Self::check_groups_exist(identity.context_id, GROUPS_TO_REMOVE, &to_remove, ctx, messages, errors).await?;

        let Some(subject) = Self::subject(invitation, ctx.principals).await? else {
            if !to_remove.is_empty() {
                errors.add(
                    GROUPS_TO_REMOVE,
                    messages
                        .text(GROUPS_TO_REMOVE, "unregistered")
                        .unwrap_or_else(|| "Groups cannot be removed from someone without an account.".to_string()),
                );
            }
            return Ok(());
        };

        let held: BTreeSet<UserGroupId> = ctx
            .principals
            .groups_of(subject.id, identity.context_id)
            .await?
            .into_iter()
            .collect();

        for group in to_add.iter().filter(|g| held.contains(g)) {
            errors.add(
                GROUPS_TO_ADD,
                messages
                    .text(GROUPS_TO_ADD, "not_held")
                    .unwrap_or_else(|| format!("The user already belongs to group {}.", group)),
            );
        }
        for group in to_remove.iter().filter(|g| !held.contains(g)) {
            errors.add(
                GROUPS_TO_REMOVE,
                messages
                    .text(GROUPS_TO_REMOVE, "held")
                    .unwrap_or_else(|| format!("The user does not belong to group {}.", group)),
            );
        }
        Ok(())
    }

    async fn check_finalize(
        invitation: &Invitation,
        ctx: &ValidationContext<'_>,
        messages: &ValidationMessages,
        errors: &mut ValidationErrors,
    ) -> InvitationResult<()> {
        let payload = invitation.payload();
        let identity = invitation.identity();

        // Groups may have been deleted while the invitation was out
        let to_add = Self::groups(payload, GROUPS_TO_ADD)?;
        Self::check_groups_exist(identity.context_id, GROUPS_TO_ADD, &to_add, ctx, messages, errors).await?;

        if Self::subject(invitation, ctx.principals).await?.is_some() {
            return Ok(());
        }

        // No account yet: the invitee registers with this response
        for field in ["username", "password", "givenName"] {
            let present = payload
                .get(field)?
                .and_then(|v| v.as_str())
                .is_some_and(|s| !s.trim().is_empty());
            if !present {
                errors.add(
                    field,
                    messages
                        .text(field, "required")
                        .unwrap_or_else(|| format!("The {} field is required to create an account.", field)),
                );
            }
        }

        if let Some(username) = payload.get_as::<String>("username")? {
            if ctx.principals.username_taken(&username).await? {
                errors.add(
                    "username",
                    messages
                        .text("username", "unique")
                        .unwrap_or_else(|| "This username is already in use.".to_string()),
                );
            }
        }
        Ok(())
    }

    async fn register(invitation: &Invitation, principals: &dyn BasePrincipalStore) -> InvitationResult<Principal> {
        let payload = invitation.payload();
        let email = invitation.identity().email.clone().ok_or_else(|| {
            InvitationError::Internal(anyhow::anyhow!("Cannot register an invitee without an email"))
        })?;
        let required = |field: &str| -> InvitationResult<String> {
            payload
                .get_as::<String>(field)?
                .ok_or_else(|| InvitationError::Internal(anyhow::anyhow!("Missing {} for registration", field)))
        };

        let principal = principals
            .create(NewPrincipal {
                username: required("username")?,
                email,
                password_hash: required(PASSWORD_HASH)?,
                given_name: required("givenName")?,
                family_name: payload.get_as("familyName")?,
                affiliation: payload.get_as("affiliation")?,
            })
            .await?;
        // Following the link proves the address
        principals.mark_email_validated(principal.id).await?;

        info!(user_id = principal.id, invitation_id = %invitation.id(), "Registered invitee");
        Ok(principal)
    }
}

#[async_trait]
impl InvitationKind for UserRoleAssignment {
    fn invitation_type(&self) -> InvitationType {
        InvitationType::UserRoleAssignment
    }

    fn payload_schema(&self) -> PayloadSchema {
        PayloadSchema::new(FIELDS)
    }

    fn rules(&self, phase: ValidationPhase) -> Vec<Rule> {
        match phase {
            ValidationPhase::Default => vec![
                Rule::new(GROUPS_TO_ADD, Constraint::IdList),
                Rule::new(GROUPS_TO_REMOVE, Constraint::IdList),
                Rule::new(GROUPS_TO_ADD, Constraint::DisjointFrom(GROUPS_TO_REMOVE)),
                Rule::new("message", Constraint::MaxLength(2000)),
            ],
            ValidationPhase::Invite => vec![Rule::new(GROUPS_TO_ADD, Constraint::RequiredWithout(GROUPS_TO_REMOVE))],
            ValidationPhase::Finalize => vec![
                Rule::new("username", Constraint::AlphaDash),
                Rule::new("username", Constraint::MinLength(3)),
                Rule::new("username", Constraint::MaxLength(32)),
                Rule::new(PASSWORD, Constraint::MinLength(8)),
                Rule::new("givenName", Constraint::MaxLength(255)),
                Rule::new("familyName", Constraint::MaxLength(255)),
                Rule::new("affiliation", Constraint::MaxLength(255)),
            ],
            ValidationPhase::Decline => Vec::new(),
        }
    }

    fn messages(&self, phase: ValidationPhase) -> Vec<RuleMessage> {
        match phase {
            ValidationPhase::Invite => vec![RuleMessage::new(
                GROUPS_TO_ADD,
                "required_without",
                "Choose at least one user group to add or remove.",
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
            ValidationPhase::Default | ValidationPhase::Decline => Ok(()),
            ValidationPhase::Invite => Self::check_invite(invitation, ctx, messages, errors).await,
            ValidationPhase::Finalize => Self::check_finalize(invitation, ctx, messages, errors).await,
        }
    }

    fn mail_content(&self, invitation: &Invitation) -> InvitationResult<MailContent> {
        let payload = invitation.payload();
        let added = Self::groups(payload, GROUPS_TO_ADD)?;
        let removed = Self::groups(payload, GROUPS_TO_REMOVE)?;

        let mut body = String::from("You have been invited to change your roles.\n");
        if !added.is_empty() {
            body.push_str(&format!("\nUser groups to join: {}\n", join_ids(&added)));
        }
        if !removed.is_empty() {
            body.push_str(&format!("\nUser groups to leave: {}\n", join_ids(&removed)));
        }
        if let Some(message) = payload.get_as::<String>("message")? {
            body.push_str(&format!("\n{}\n", message));
        }
        body.push_str("\nUse the links below to accept or decline.");

        Ok(MailContent {
            subject: "Invitation to join".to_string(),
            body,
        })
    }

    fn update_payload(&self, phase: ValidationPhase, payload: &mut Payload, tokens: &TokenService) -> InvitationResult<()> {
        if phase != ValidationPhase::Finalize {
            return Ok(());
        }
        // The submitted password never outlives this call; only its hash is kept
        if let Some(password) = payload.remove(PASSWORD)? {
            let password = password.as_str().ok_or_else(|| PayloadAccessError::InvalidValue {
                field: PASSWORD.to_string(),
                reason: "expected a string".to_string(),
            })?;
            payload.set(PASSWORD_HASH, tokens.hash_secret(password)?)?;
        }
        Ok(())
    }

    async fn on_accepted(&self, invitation: &Invitation, collaborators: &Collaborators<'_>) -> InvitationResult<()> {
        let principals = collaborators.principals;
        let context_id = invitation.identity().context_id;

        let subject = match Self::subject(invitation, principals).await? {
            Some(principal) => principal,
            None => Self::register(invitation, principals).await?,
        };

        let to_add = Self::groups(invitation.payload(), GROUPS_TO_ADD)?;
        let to_remove = Self::groups(invitation.payload(), GROUPS_TO_REMOVE)?;
        if !to_add.is_empty() {
            principals.assign_groups(subject.id, context_id, &to_add).await?;
        }
        if !to_remove.is_empty() {
            principals.remove_groups(subject.id, context_id, &to_remove).await?;
        }

        info!(
            user_id = subject.id,
            context_id,
            added = to_add.len(),
            removed = to_remove.len(),
            "Applied user group changes"
        );
        Ok(())
    }
}

fn join_ids(ids: &[UserGroupId]) -> String {
    ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ")
}
