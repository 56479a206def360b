mod invitation;
mod record;

pub use invitation::{IdentityKey, Invitation};
pub use record::{FamilyKey, InvitationRecord, InvitationStatus};
