//! Invitation domain: issuing, securing, validating and resolving
//! time-bounded invitations.

pub mod actions;
pub mod error;
pub mod kinds;
pub mod mailable;
pub mod models;
pub mod payload;
pub mod repository;
pub mod token;
pub mod validation;

pub use error::{InvitationError, InvitationResult};
pub use kinds::{Collaborators, InvitationKind, InvitationType, PreDispatchAction};
pub use mailable::{MailContent, MailSettings, Mailable};
pub use models::{FamilyKey, IdentityKey, Invitation, InvitationRecord, InvitationStatus};
pub use payload::{FieldAccess, FieldSpec, Payload, PayloadAccessError, PayloadSchema, PayloadStage};
pub use repository::{CreatedInvitation, InvitationRepository};
pub use token::{IssuedToken, TokenHashParams, TokenService};
pub use validation::{
    validate, Constraint, Rule, RuleMessage, ValidationContext, ValidationErrors, ValidationMessages,
    ValidationPhase,
};
