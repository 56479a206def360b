//! Kernel module - infrastructure traits and dependencies.

pub mod deps;
pub mod invitation_store;
pub mod test_dependencies;
pub mod traits;

pub use deps::{InvitationDeps, LogMailer};
pub use invitation_store::PostgresInvitationStore;
pub use test_dependencies::{
    InMemoryInvitationStore, MockMailer, MockPrincipalStore, MockReviewAssignments, TestDependencies,
};
pub use traits::*;
