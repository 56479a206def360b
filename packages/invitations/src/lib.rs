// Invitation Engine - Core
//
// Issues, secures, validates and resolves time-bounded invitations
// (role grants, review requests, email confirmation).
//
// Business logic lives in domains/invitations; infrastructure traits and
// their implementations live in kernel/.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;

pub use config::*;
