//! Invitation dependencies (using traits for testability)
//!
//! This module provides the dependency container used by all invitation actions.
//! All external services use trait abstractions to enable testing.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use crate::common::UserId;
use crate::domains::invitations::{
    Collaborators, InvitationRepository, MailSettings, Mailable, TokenService, ValidationContext,
};
use crate::kernel::{BaseInvitationStore, BaseMailer, BasePrincipalStore, BaseReviewAssignments};

// =============================================================================
// LogMailer (implements BaseMailer without a transport)
// =============================================================================

/// Records deliveries in the log. For deployments where a mail transport is
/// wired up outside this crate, and for the operator CLI.
pub struct LogMailer;

#[async_trait]
impl BaseMailer for LogMailer {
    async fn send(&self, mailable: &Mailable) -> Result<()> {
        info!(
            to = ?mailable.to,
            subject = %mailable.subject,
            accept_path = %mailable.accept_url.path(),
            "Invitation mail handed off"
        );
        Ok(())
    }
}

// =============================================================================
// InvitationDeps
// =============================================================================

/// Dependencies accessible to invitation actions
#[derive(Clone)]
pub struct InvitationDeps {
    pub store: Arc<dyn BaseInvitationStore>,
    pub mailer: Arc<dyn BaseMailer>,
    pub principals: Arc<dyn BasePrincipalStore>,
    pub reviews: Arc<dyn BaseReviewAssignments>,
    pub tokens: TokenService,
    pub mail: MailSettings,
    /// Lifetime of a newly dispatched invitation
    pub default_ttl: chrono::Duration,
}

impl InvitationDeps {
    pub fn new(
        store: Arc<dyn BaseInvitationStore>,
        mailer: Arc<dyn BaseMailer>,
        principals: Arc<dyn BasePrincipalStore>,
        reviews: Arc<dyn BaseReviewAssignments>,
        tokens: TokenService,
        mail: MailSettings,
        default_ttl: chrono::Duration,
    ) -> Self {
        Self {
            store,
            mailer,
            principals,
            reviews,
            tokens,
            mail,
            default_ttl,
        }
    }

    pub fn repository(&self) -> InvitationRepository<'_> {
        InvitationRepository::new(self.store.as_ref(), &self.tokens)
    }

    /// Validation context for a request made by `actor`, evaluated now
    pub fn validation_context(&self, actor: Option<UserId>) -> ValidationContext<'_> {
        ValidationContext {
            principals: self.principals.as_ref(),
            reviews: self.reviews.as_ref(),
            actor,
            now: Utc::now(),
        }
    }

    pub fn collaborators(&self) -> Collaborators<'_> {
        Collaborators {
            principals: self.principals.as_ref(),
            reviews: self.reviews.as_ref(),
        }
    }
}
