use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{FromRow, PgExecutor};
use typed_builder::TypedBuilder;

use crate::common::{AssocId, ContextId, InvitationId, UserId};
use crate::domains::invitations::kinds::InvitationType;

// ============================================================================
// Status
// ============================================================================

/// Stored status. Expiry is derived from `expires_at` and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "invitation_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    #[default]
    Pending,
    Accepted,
    Declined,
    Cancelled,
}

impl InvitationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InvitationStatus::Pending)
    }
}

impl std::fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvitationStatus::Pending => write!(f, "pending"),
            InvitationStatus::Accepted => write!(f, "accepted"),
            InvitationStatus::Declined => write!(f, "declined"),
            InvitationStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ============================================================================
// Family
// ============================================================================

/// The set of invitations sharing (type, email, context, assoc). At most one
/// member may be pending.
///
/// When an invitation is addressed by principal id only (no email), the
/// principal id stands in for the address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FamilyKey {
    pub invitation_type: InvitationType,
    pub email: Option<String>,
    pub user_id: Option<UserId>,
    pub context_id: ContextId,
    pub assoc_id: Option<AssocId>,
}

impl FamilyKey {
    pub fn new(
        invitation_type: InvitationType,
        email: Option<String>,
        user_id: Option<UserId>,
        context_id: ContextId,
        assoc_id: Option<AssocId>,
    ) -> Self {
        let email = email.map(|e| e.trim().to_lowercase());
        // user_id only discriminates address-less families
        let user_id = if email.is_some() { None } else { user_id };
        Self {
            invitation_type,
            email,
            user_id,
            context_id,
            assoc_id,
        }
    }

    pub fn contains(&self, record: &InvitationRecord) -> bool {
        record.invitation_type == self.invitation_type.as_str()
            && record.context_id == self.context_id
            && record.email.as_deref() == self.email.as_deref()
            && record.assoc_id == self.assoc_id
            && (self.email.is_some() || record.user_id == self.user_id)
    }

    /// Advisory lock key serializing writers of this family.
    pub fn lock_key(&self) -> i64 {
        let canonical = format!(
            "{}|{}|{}|{}|{}",
            self.invitation_type.as_str(),
            self.email.as_deref().unwrap_or(""),
            self.user_id.map(|id| id.to_string()).unwrap_or_default(),
            self.context_id,
            self.assoc_id.map(|id| id.to_string()).unwrap_or_default(),
        );
        let digest = Sha256::digest(canonical.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        i64::from_be_bytes(bytes)
    }
}

// ============================================================================
// Record
// ============================================================================

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct InvitationRecord {
    #[builder(default = InvitationId::new())]
    pub id: InvitationId,

    // Identity
    #[sqlx(rename = "type")]
    pub invitation_type: String,
    #[builder(default)]
    pub email: Option<String>,
    #[builder(default)]
    pub user_id: Option<UserId>,
    pub context_id: ContextId,
    #[builder(default)]
    pub assoc_id: Option<AssocId>,

    #[builder(default)]
    pub status: InvitationStatus,

    // Key
    pub key_selector: String,
    #[serde(skip_serializing, default)]
    pub key_hash: String,
    pub expires_at: DateTime<Utc>,

    #[builder(default = serde_json::json!({}))]
    pub payload: serde_json::Value,
    #[builder(default)]
    pub inviter_id: Option<UserId>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// SQL Queries - ALL queries must be in models/
// =============================================================================

const FAMILY_PREDICATE: &str = r#"
    type = $1
    AND context_id = $2
    AND email IS NOT DISTINCT FROM $3
    AND assoc_id IS NOT DISTINCT FROM $4
    AND ($3 IS NOT NULL OR user_id = $5)
"#;

impl InvitationRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub async fn find_by_id(id: InvitationId, db: impl PgExecutor<'_>) -> Result<Option<Self>> {
        let record = sqlx::query_as::<_, InvitationRecord>("SELECT * FROM invitations WHERE id = $1")
            .bind(id)
            .fetch_optional(db)
            .await?;
        Ok(record)
    }

    pub async fn find_by_selector(selector: &str, db: impl PgExecutor<'_>) -> Result<Option<Self>> {
        let record =
            sqlx::query_as::<_, InvitationRecord>("SELECT * FROM invitations WHERE key_selector = $1")
                .bind(selector)
                .fetch_optional(db)
                .await?;
        Ok(record)
    }

    /// All members of a family, newest first
    pub async fn find_family(family: &FamilyKey, db: impl PgExecutor<'_>) -> Result<Vec<Self>> {
        let sql = format!(
            "SELECT * FROM invitations WHERE {} ORDER BY created_at DESC, id DESC",
            FAMILY_PREDICATE
        );
        let records = sqlx::query_as::<_, InvitationRecord>(&sql)
            .bind(family.invitation_type.as_str())
            .bind(family.context_id)
            .bind(family.email.as_deref())
            .bind(family.assoc_id)
            .bind(family.user_id)
            .fetch_all(db)
            .await?;
        Ok(records)
    }

    pub async fn insert(&self, db: impl PgExecutor<'_>) -> Result<Self> {
        let record = sqlx::query_as::<_, InvitationRecord>(
            r#"
            INSERT INTO invitations (
                id, type, email, user_id, context_id, assoc_id, status,
                key_selector, key_hash, expires_at, payload, inviter_id,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING *
            "#,
        )
        .bind(self.id)
        .bind(&self.invitation_type)
        .bind(&self.email)
        .bind(self.user_id)
        .bind(self.context_id)
        .bind(self.assoc_id)
        .bind(self.status)
        .bind(&self.key_selector)
        .bind(&self.key_hash)
        .bind(self.expires_at)
        .bind(&self.payload)
        .bind(self.inviter_id)
        .bind(self.created_at)
        .bind(self.updated_at)
        .fetch_one(db)
        .await?;
        Ok(record)
    }

    /// Serialize writers of one family until the surrounding transaction ends.
    pub async fn lock_family(family: &FamilyKey, db: impl PgExecutor<'_>) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(family.lock_key())
            .execute(db)
            .await?;
        Ok(())
    }

    /// Cancel every pending member of a family. Returns how many changed.
    pub async fn cancel_pending_in_family(family: &FamilyKey, db: impl PgExecutor<'_>) -> Result<u64> {
        let sql = format!(
            r#"
            UPDATE invitations
            SET status = 'cancelled',
                updated_at = NOW()
            WHERE {} AND status = 'pending'
            "#,
            FAMILY_PREDICATE
        );
        let result = sqlx::query(&sql)
            .bind(family.invitation_type.as_str())
            .bind(family.context_id)
            .bind(family.email.as_deref())
            .bind(family.assoc_id)
            .bind(family.user_id)
            .execute(db)
            .await?;
        Ok(result.rows_affected())
    }

    /// Check-and-set transition out of `pending`.
    ///
    /// Returns `None` when the record is no longer pending or has expired;
    /// a concurrent resolver got there first.
    pub async fn transition(
        id: InvitationId,
        to: InvitationStatus,
        payload: &serde_json::Value,
        db: impl PgExecutor<'_>,
    ) -> Result<Option<Self>> {
        let record = sqlx::query_as::<_, InvitationRecord>(
            r#"
            UPDATE invitations
            SET status = $2,
                payload = $3,
                updated_at = NOW()
            WHERE id = $1
              AND status = 'pending'
              AND expires_at > NOW()
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(to)
        .bind(payload)
        .fetch_optional(db)
        .await?;
        Ok(record)
    }

    pub fn family(&self) -> Result<FamilyKey> {
        let invitation_type: InvitationType = self.invitation_type.parse()?;
        Ok(FamilyKey::new(
            invitation_type,
            self.email.clone(),
            self.user_id,
            self.context_id,
            self.assoc_id,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(email: Option<&str>, user_id: Option<UserId>, assoc_id: Option<AssocId>) -> InvitationRecord {
        InvitationRecord {
            id: InvitationId::new(),
            invitation_type: "userRoleAssignment".to_string(),
            email: email.map(str::to_string),
            user_id,
            context_id: 1,
            assoc_id,
            status: InvitationStatus::Pending,
            key_selector: "selector".to_string(),
            key_hash: "hash".to_string(),
            expires_at: Utc::now(),
            payload: serde_json::json!({}),
            inviter_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_family_normalizes_email() {
        let a = FamilyKey::new(InvitationType::UserRoleAssignment, Some(" A@Example.org ".into()), None, 1, None);
        let b = FamilyKey::new(InvitationType::UserRoleAssignment, Some("a@example.org".into()), None, 1, None);
        assert_eq!(a, b);
        assert_eq!(a.lock_key(), b.lock_key());
    }

    #[test]
    fn test_family_ignores_user_id_when_email_present() {
        let a = FamilyKey::new(InvitationType::UserRoleAssignment, Some("a@example.org".into()), Some(7), 1, None);
        assert_eq!(a.user_id, None);
        assert!(a.contains(&record(Some("a@example.org"), Some(9), None)));
    }

    #[test]
    fn test_family_membership() {
        let family = FamilyKey::new(InvitationType::UserRoleAssignment, Some("a@example.org".into()), None, 1, None);

        assert!(family.contains(&record(Some("a@example.org"), None, None)));
        assert!(!family.contains(&record(Some("b@example.org"), None, None)));
        assert!(!family.contains(&record(Some("a@example.org"), None, Some(3))));
    }

    #[test]
    fn test_address_less_family_keyed_by_user() {
        let family = FamilyKey::new(InvitationType::UserRoleAssignment, None, Some(7), 1, Some(3));

        assert!(family.contains(&record(None, Some(7), Some(3))));
        assert!(!family.contains(&record(None, Some(8), Some(3))));
    }

    #[test]
    fn test_lock_keys_differ_across_families() {
        let a = FamilyKey::new(InvitationType::UserRoleAssignment, Some("a@example.org".into()), None, 1, None);
        let b = FamilyKey::new(InvitationType::UserRoleAssignment, Some("a@example.org".into()), None, 2, None);
        let c = FamilyKey::new(InvitationType::ReviewerAccess, Some("a@example.org".into()), None, 1, None);
        assert_ne!(a.lock_key(), b.lock_key());
        assert_ne!(a.lock_key(), c.lock_key());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!InvitationStatus::Pending.is_terminal());
        assert!(InvitationStatus::Accepted.is_terminal());
        assert!(InvitationStatus::Declined.is_terminal());
        assert!(InvitationStatus::Cancelled.is_terminal());
    }
}
