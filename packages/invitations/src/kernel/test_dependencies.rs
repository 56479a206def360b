// TestDependencies - in-memory and mock implementations for testing
//
// Provides stand-ins for every collaborator that can be bundled into InvitationDeps.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use super::{
    BaseInvitationStore, BaseMailer, BasePrincipalStore, BaseReviewAssignments, InvitationDeps,
    NewPrincipal, Principal, ReviewAssignment, ReviewAssignmentStatus,
};
use crate::common::{AssocId, ContextId, InvitationId, UserGroupId, UserId};
use crate::domains::invitations::{
    FamilyKey, InvitationRecord, InvitationStatus, MailSettings, Mailable, TokenHashParams,
    TokenService,
};

// =============================================================================
// In-memory Invitation Store
// =============================================================================

/// Invitation store over a single async mutex. Every operation holds the
/// lock for its whole duration, which gives supersession the same atomicity
/// as the Postgres transaction.
#[derive(Default)]
pub struct InMemoryInvitationStore {
    records: tokio::sync::Mutex<Vec<InvitationRecord>>,
}

impl InMemoryInvitationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored record, in insertion order
    pub async fn records(&self) -> Vec<InvitationRecord> {
        self.records.lock().await.clone()
    }

    /// Move a record's expiry into the past
    pub async fn expire(&self, id: InvitationId) {
        let mut records = self.records.lock().await;
        if let Some(record) = records.iter_mut().find(|r| r.id == id) {
            record.expires_at = Utc::now() - Duration::seconds(1);
        }
    }
}

#[async_trait]
impl BaseInvitationStore for InMemoryInvitationStore {
    async fn insert(&self, record: &InvitationRecord, supersede: bool) -> Result<u64> {
        let family = record.family()?;
        let mut records = self.records.lock().await;

        if records.iter().any(|r| r.id == record.id || r.key_selector == record.key_selector) {
            bail!("Duplicate invitation id or key selector");
        }

        let pending = records
            .iter_mut()
            .filter(|r| r.status == InvitationStatus::Pending && family.contains(r));
        let mut cancelled = 0;
        for existing in pending {
            if !supersede {
                bail!("Family already has a pending invitation");
            }
            existing.status = InvitationStatus::Cancelled;
            existing.updated_at = Utc::now();
            cancelled += 1;
        }

        records.push(record.clone());
        Ok(cancelled)
    }

    async fn find_by_id(&self, id: InvitationId) -> Result<Option<InvitationRecord>> {
        let records = self.records.lock().await;
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    async fn find_by_selector(&self, selector: &str) -> Result<Option<InvitationRecord>> {
        let records = self.records.lock().await;
        Ok(records.iter().find(|r| r.key_selector == selector).cloned())
    }

    async fn transition(
        &self,
        id: InvitationId,
        to: InvitationStatus,
        payload: &serde_json::Value,
    ) -> Result<Option<InvitationRecord>> {
        let now = Utc::now();
        let mut records = self.records.lock().await;
        let Some(record) = records
            .iter_mut()
            .find(|r| r.id == id && r.status == InvitationStatus::Pending && !r.is_expired(now))
        else {
            return Ok(None);
        };

        record.status = to;
        record.payload = payload.clone();
        record.updated_at = now;
        Ok(Some(record.clone()))
    }

    async fn cancel_family(&self, family: &FamilyKey) -> Result<u64> {
        let mut records = self.records.lock().await;
        let mut cancelled = 0;
        for record in records
            .iter_mut()
            .filter(|r| r.status == InvitationStatus::Pending && family.contains(r))
        {
            record.status = InvitationStatus::Cancelled;
            record.updated_at = Utc::now();
            cancelled += 1;
        }
        Ok(cancelled)
    }

    async fn list_family(&self, family: &FamilyKey) -> Result<Vec<InvitationRecord>> {
        let records = self.records.lock().await;
        let mut members: Vec<InvitationRecord> = records
            .iter()
            .filter(|r| family.contains(r))
            .cloned()
            .collect();
        members.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(members)
    }
}

// =============================================================================
// Mock Mailer
// =============================================================================

pub struct MockMailer {
    sent: Arc<Mutex<Vec<Mailable>>>,
    fail: bool,
}

impl MockMailer {
    pub fn new() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            fail: false,
        }
    }

    /// Mailer whose transport is down
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    /// Get all mail that was sent
    pub fn sent(&self) -> Vec<Mailable> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Plaintext key of the most recent mail
    pub fn last_key(&self) -> Option<String> {
        self.sent.lock().unwrap().last().and_then(Mailable::key)
    }

    /// Check if anything was sent to an address
    pub fn was_sent_to(&self, address: &str) -> bool {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .any(|m| m.to.iter().any(|to| to == address))
    }
}

impl Default for MockMailer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseMailer for MockMailer {
    async fn send(&self, mailable: &Mailable) -> Result<()> {
        if self.fail {
            bail!("Mock mail transport unavailable");
        }
        self.sent.lock().unwrap().push(mailable.clone());
        Ok(())
    }
}

// =============================================================================
// Mock Principal Store
// =============================================================================

#[derive(Default)]
struct PrincipalState {
    principals: Vec<Principal>,
    groups: HashSet<(ContextId, UserGroupId)>,
    memberships: HashMap<(UserId, ContextId), BTreeSet<UserGroupId>>,
    created: Vec<NewPrincipal>,
    next_id: UserId,
}

pub struct MockPrincipalStore {
    state: Arc<Mutex<PrincipalState>>,
}

impl MockPrincipalStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(PrincipalState {
                next_id: 1000,
                ..PrincipalState::default()
            })),
        }
    }

    /// Add an existing account
    pub fn with_principal(self, id: UserId, username: &str, email: &str, email_validated: bool) -> Self {
        self.state.lock().unwrap().principals.push(Principal {
            id,
            username: username.to_string(),
            email: email.to_string(),
            email_validated,
        });
        self
    }

    /// Add user groups that exist in a context
    pub fn with_groups(self, context_id: ContextId, groups: &[UserGroupId]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            for group in groups {
                state.groups.insert((context_id, *group));
            }
        }
        self
    }

    /// Give an account groups in a context
    pub fn with_membership(self, user_id: UserId, context_id: ContextId, groups: &[UserGroupId]) -> Self {
        self.state
            .lock()
            .unwrap()
            .memberships
            .entry((user_id, context_id))
            .or_default()
            .extend(groups.iter().copied());
        self
    }

    pub fn principal(&self, id: UserId) -> Option<Principal> {
        self.state
            .lock()
            .unwrap()
            .principals
            .iter()
            .find(|p| p.id == id)
            .cloned()
    }

    pub fn principal_by_email(&self, email: &str) -> Option<Principal> {
        self.state
            .lock()
            .unwrap()
            .principals
            .iter()
            .find(|p| p.email.eq_ignore_ascii_case(email))
            .cloned()
    }

    pub fn groups(&self, user_id: UserId, context_id: ContextId) -> Vec<UserGroupId> {
        self.state
            .lock()
            .unwrap()
            .memberships
            .get(&(user_id, context_id))
            .map(|groups| groups.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Get all accounts created through `create`
    pub fn created(&self) -> Vec<NewPrincipal> {
        self.state.lock().unwrap().created.clone()
    }
}

impl Default for MockPrincipalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BasePrincipalStore for MockPrincipalStore {
    async fn find_by_id(&self, id: UserId) -> Result<Option<Principal>> {
        Ok(self.principal(id))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>> {
        Ok(self.principal_by_email(email))
    }

    async fn username_taken(&self, username: &str) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(state
            .principals
            .iter()
            .any(|p| p.username.eq_ignore_ascii_case(username)))
    }

    async fn create(&self, principal: NewPrincipal) -> Result<Principal> {
        let mut state = self.state.lock().unwrap();
        if state
            .principals
            .iter()
            .any(|p| p.email.eq_ignore_ascii_case(&principal.email))
        {
            bail!("An account already uses this email");
        }

        state.next_id += 1;
        let created = Principal {
            id: state.next_id,
            username: principal.username.clone(),
            email: principal.email.clone(),
            email_validated: false,
        };
        state.principals.push(created.clone());
        state.created.push(principal);
        Ok(created)
    }

    async fn group_exists(&self, context_id: ContextId, group_id: UserGroupId) -> Result<bool> {
        Ok(self.state.lock().unwrap().groups.contains(&(context_id, group_id)))
    }

    async fn groups_of(&self, user_id: UserId, context_id: ContextId) -> Result<Vec<UserGroupId>> {
        Ok(self.groups(user_id, context_id))
    }

    async fn assign_groups(&self, user_id: UserId, context_id: ContextId, groups: &[UserGroupId]) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .memberships
            .entry((user_id, context_id))
            .or_default()
            .extend(groups.iter().copied());
        Ok(())
    }

    async fn remove_groups(&self, user_id: UserId, context_id: ContextId, groups: &[UserGroupId]) -> Result<()> {
        if let Some(held) = self
            .state
            .lock()
            .unwrap()
            .memberships
            .get_mut(&(user_id, context_id))
        {
            for group in groups {
                held.remove(group);
            }
        }
        Ok(())
    }

    async fn mark_email_validated(&self, user_id: UserId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match state.principals.iter_mut().find(|p| p.id == user_id) {
            Some(principal) => {
                principal.email_validated = true;
                Ok(())
            }
            None => bail!("Unknown principal {}", user_id),
        }
    }
}

// =============================================================================
// Mock Review Assignments
// =============================================================================

pub struct MockReviewAssignments {
    assignments: Arc<Mutex<HashMap<AssocId, ReviewAssignment>>>,
    responses: Arc<Mutex<Vec<(AssocId, bool, Option<String>)>>>,
}

impl MockReviewAssignments {
    pub fn new() -> Self {
        Self {
            assignments: Arc::new(Mutex::new(HashMap::new())),
            responses: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_assignment(self, assignment: ReviewAssignment) -> Self {
        self.assignments
            .lock()
            .unwrap()
            .insert(assignment.id, assignment);
        self
    }

    pub fn assignment(&self, id: AssocId) -> Option<ReviewAssignment> {
        self.assignments.lock().unwrap().get(&id).cloned()
    }

    /// Get all (assignment, accepted, reason) responses recorded
    pub fn responses(&self) -> Vec<(AssocId, bool, Option<String>)> {
        self.responses.lock().unwrap().clone()
    }
}

impl Default for MockReviewAssignments {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseReviewAssignments for MockReviewAssignments {
    async fn find(&self, id: AssocId) -> Result<Option<ReviewAssignment>> {
        Ok(self.assignment(id))
    }

    async fn respond(&self, id: AssocId, accepted: bool, reason: Option<&str>) -> Result<()> {
        let mut assignments = self.assignments.lock().unwrap();
        let Some(assignment) = assignments.get_mut(&id) else {
            bail!("Unknown review assignment {}", id);
        };
        assignment.status = if accepted {
            ReviewAssignmentStatus::Accepted
        } else {
            ReviewAssignmentStatus::Declined
        };
        self.responses
            .lock()
            .unwrap()
            .push((id, accepted, reason.map(str::to_string)));
        Ok(())
    }
}

// =============================================================================
// TestDependencies - Builder for test dependencies
// =============================================================================

/// Cheap Argon2 parameters for tests
pub const TEST_TOKEN_HASH_PARAMS: TokenHashParams = TokenHashParams {
    memory_kib: 64,
    iterations: 1,
    parallelism: 1,
};

pub const TEST_BASE_URL: &str = "https://app.example.org";

#[derive(Clone)]
pub struct TestDependencies {
    pub store: Arc<InMemoryInvitationStore>,
    pub mailer: Arc<MockMailer>,
    pub principals: Arc<MockPrincipalStore>,
    pub reviews: Arc<MockReviewAssignments>,
    pub ttl: Duration,
}

impl TestDependencies {
    pub fn new() -> Self {
        Self {
            store: Arc::new(InMemoryInvitationStore::new()),
            mailer: Arc::new(MockMailer::new()),
            principals: Arc::new(MockPrincipalStore::new()),
            reviews: Arc::new(MockReviewAssignments::new()),
            ttl: Duration::days(3),
        }
    }

    /// Set a mock mailer
    pub fn mock_mailer(mut self, mailer: MockMailer) -> Self {
        self.mailer = Arc::new(mailer);
        self
    }

    /// Set a mock principal store
    pub fn mock_principals(mut self, principals: MockPrincipalStore) -> Self {
        self.principals = Arc::new(principals);
        self
    }

    /// Set mock review assignments
    pub fn mock_reviews(mut self, reviews: MockReviewAssignments) -> Self {
        self.reviews = Arc::new(reviews);
        self
    }

    /// Set the lifetime of dispatched invitations
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Convert into InvitationDeps for testing
    pub fn into_deps(self) -> InvitationDeps {
        let tokens = TokenService::new(TEST_TOKEN_HASH_PARAMS).expect("test hash params are valid");
        InvitationDeps::new(
            self.store,
            self.mailer,
            self.principals,
            self.reviews,
            tokens,
            MailSettings {
                from: "no-reply@example.org".to_string(),
                base_url: TEST_BASE_URL.to_string(),
            },
            self.ttl,
        )
    }
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}
