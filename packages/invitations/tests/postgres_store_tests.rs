//! Integration tests for the Postgres invitation store.
//!
//! Runs against a shared testcontainers Postgres. Every test works in its own
//! context id so tests can share the database.

mod common;

use chrono::{Duration, Utc};
use common::{principals_with_groups, role_invitation, submission, unique_context, TestHarness};
use invitations_core::domains::invitations::actions::{accept_invitation, cancel_invitation, dispatch_invitation};
use invitations_core::domains::invitations::{
    FamilyKey, IdentityKey, Invitation, InvitationError, InvitationRecord, InvitationStatus, InvitationType,
};
use invitations_core::kernel::{BaseInvitationStore, TestDependencies};
use serde_json::json;
use test_context::test_context;

fn record_for(invitation: &Invitation, selector: &str) -> InvitationRecord {
    InvitationRecord::builder()
        .id(invitation.id())
        .invitation_type(invitation.invitation_type().as_str())
        .email(invitation.identity().email.clone())
        .user_id(invitation.identity().user_id)
        .context_id(invitation.identity().context_id)
        .assoc_id(invitation.identity().assoc_id)
        .key_selector(selector)
        .key_hash("$argon2id$placeholder")
        .expires_at(Utc::now() + Duration::days(1))
        .payload(invitation.payload().to_stored())
        .build()
}

fn selector() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[test_context(TestHarness)]
#[tokio::test]
async fn insert_supersedes_pending_family_member(ctx: &TestHarness) {
    let store = ctx.store();
    let context_id = unique_context();
    let first = role_invitation("a@example.org", context_id, &[5], &[]);
    let second = role_invitation("a@example.org", context_id, &[5], &[]);

    assert_eq!(store.insert(&record_for(&first, &selector()), true).await.unwrap(), 0);
    assert_eq!(store.insert(&record_for(&second, &selector()), true).await.unwrap(), 1);

    let family = store.list_family(&second.family()).await.unwrap();
    assert_eq!(family.len(), 2);
    assert_eq!(family[0].id, second.id());
    assert_eq!(family[0].status, InvitationStatus::Pending);
    assert_eq!(family[1].status, InvitationStatus::Cancelled);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn unique_index_rejects_second_pending_without_supersede(ctx: &TestHarness) {
    let store = ctx.store();
    let context_id = unique_context();
    let first = role_invitation("a@example.org", context_id, &[5], &[]);
    let second = role_invitation("a@example.org", context_id, &[5], &[]);

    store.insert(&record_for(&first, &selector()), true).await.unwrap();
    assert!(store.insert(&record_for(&second, &selector()), false).await.is_err());

    let family = store.list_family(&first.family()).await.unwrap();
    assert_eq!(family.len(), 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn user_keyed_families_do_not_collide(ctx: &TestHarness) {
    let store = ctx.store();
    let context_id = unique_context();
    let for_seven = Invitation::draft(IdentityKey::for_user(InvitationType::ReviewerAccess, 7, context_id).with_assoc(3));
    let for_eight = Invitation::draft(IdentityKey::for_user(InvitationType::ReviewerAccess, 8, context_id).with_assoc(3));

    assert_eq!(store.insert(&record_for(&for_seven, &selector()), true).await.unwrap(), 0);
    assert_eq!(store.insert(&record_for(&for_eight, &selector()), true).await.unwrap(), 0);

    let family = FamilyKey::new(InvitationType::ReviewerAccess, None, Some(7), context_id, Some(3));
    let members = store.list_family(&family).await.unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].user_id, Some(7));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn concurrent_inserts_leave_one_pending(ctx: &TestHarness) {
    let store = ctx.store();
    let context_id = unique_context();
    let invitations: Vec<Invitation> = (0..6)
        .map(|_| role_invitation("race@example.org", context_id, &[5], &[]))
        .collect();
    let records: Vec<InvitationRecord> = invitations.iter().map(|i| record_for(i, &selector())).collect();

    let results = futures::future::join_all(records.iter().map(|r| store.insert(r, true))).await;
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(results.iter().map(|r| *r.as_ref().unwrap()).sum::<u64>(), 5);

    let family = store.list_family(&invitations[0].family()).await.unwrap();
    assert_eq!(family.len(), 6);
    assert_eq!(
        family.iter().filter(|r| r.status == InvitationStatus::Pending).count(),
        1
    );
}

#[test_context(TestHarness)]
#[tokio::test]
async fn transition_only_moves_pending_unexpired_records(ctx: &TestHarness) {
    let store = ctx.store();
    let context_id = unique_context();
    let invitation = role_invitation("a@example.org", context_id, &[5], &[]);
    store.insert(&record_for(&invitation, &selector()), true).await.unwrap();

    let payload = json!({"userGroupsToAdd": [5], "userGroupsToRemove": []});
    let moved = store
        .transition(invitation.id(), InvitationStatus::Accepted, &payload)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(moved.status, InvitationStatus::Accepted);

    let again = store
        .transition(invitation.id(), InvitationStatus::Cancelled, &payload)
        .await
        .unwrap();
    assert!(again.is_none());

    let expired = role_invitation("b@example.org", context_id, &[5], &[]);
    let mut record = record_for(&expired, &selector());
    record.expires_at = Utc::now() - Duration::minutes(1);
    store.insert(&record, true).await.unwrap();

    let result = store
        .transition(expired.id(), InvitationStatus::Accepted, &payload)
        .await
        .unwrap();
    assert!(result.is_none());
    let stored = store.find_by_id(expired.id()).await.unwrap().unwrap();
    assert_eq!(stored.status, InvitationStatus::Pending);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn find_by_selector_and_cancel_family(ctx: &TestHarness) {
    let store = ctx.store();
    let context_id = unique_context();
    let invitation = role_invitation("a@example.org", context_id, &[5], &[]);
    let selector = selector();
    store.insert(&record_for(&invitation, &selector), true).await.unwrap();

    let found = store.find_by_selector(&selector).await.unwrap().unwrap();
    assert_eq!(found.id, invitation.id());
    assert!(store.find_by_selector("missing").await.unwrap().is_none());

    assert_eq!(store.cancel_family(&invitation.family()).await.unwrap(), 1);
    assert_eq!(store.cancel_family(&invitation.family()).await.unwrap(), 0);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn full_flow_against_postgres(ctx: &TestHarness) {
    let context_id = unique_context();
    let test = TestDependencies::new().mock_principals(principals_with_groups(context_id, &[5]));
    let deps = ctx.deps(test.clone());

    let first = dispatch_invitation(role_invitation("pg@example.org", context_id, &[5], &[]), Some(1), &deps)
        .await
        .unwrap();
    let second = dispatch_invitation(role_invitation("pg@example.org", context_id, &[5], &[]), Some(1), &deps)
        .await
        .unwrap();
    assert_eq!(second.superseded, 1);

    let first_key = test.mailer.sent()[0].key().unwrap();
    let err = deps
        .repository()
        .get_by_id_and_key(first.invitation.id(), &first_key)
        .await
        .unwrap_err();
    assert!(matches!(err, InvitationError::AlreadyHandled));

    let key = test.mailer.last_key().unwrap();
    let accepted = accept_invitation(
        second.invitation.id(),
        &key,
        submission(json!({"username": "pguser", "password": "long enough", "givenName": "Pat"})),
        &deps,
    )
    .await
    .unwrap();
    assert_eq!(accepted.status(), InvitationStatus::Accepted);

    let stored = ctx.store().find_by_id(second.invitation.id()).await.unwrap().unwrap();
    assert_eq!(stored.status, InvitationStatus::Accepted);
    assert!(stored.payload.get("password").is_none());
    assert!(stored.payload["passwordHash"].as_str().unwrap().starts_with("$argon2id$"));

    let err = cancel_invitation(second.invitation.id(), &deps).await.unwrap_err();
    assert!(matches!(err, InvitationError::TransitionConflict));
}
