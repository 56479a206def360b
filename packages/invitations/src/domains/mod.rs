// Business domains
pub mod invitations;
