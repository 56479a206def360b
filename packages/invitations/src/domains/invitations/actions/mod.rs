//! Invitation actions - business logic functions
//!
//! Actions are async functions called by the delivery layer (HTTP handlers,
//! CLI). They orchestrate validation, persistence and hand-offs, and return
//! typed results.

mod cancel;
mod dispatch;
mod respond;

pub use cancel::{cancel_invitation, cancel_invitation_family};
pub use dispatch::{dispatch_invitation, DispatchedInvitation};
pub use respond::{accept_invitation, decline_invitation};
