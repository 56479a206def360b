//! Invitation payloads with phase-dependent field visibility.
//!
//! Each kind declares a [`PayloadSchema`]: the fields it carries and, per
//! field, a [`FieldAccess`] rule. The rules are evaluated against the
//! payload's [`PayloadStage`] on every read and write, so an inviter can
//! never see invitee-supplied values before the invitation goes out, and can
//! never rewrite what was offered once it has.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Visibility rule for a single payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldAccess {
    /// Readable and writable in every stage.
    Open,
    /// Supplied by the invitee. Neither readable nor writable until dispatched.
    HiddenBeforeDispatch,
    /// Composed by the inviter. Read-only once dispatched.
    FrozenAfterDispatch,
    /// Written by the kind while resolving, never taken from a submission.
    /// Unreadable until dispatched.
    Derived,
}

impl FieldAccess {
    fn hidden_in_draft(self) -> bool {
        matches!(self, FieldAccess::HiddenBeforeDispatch | FieldAccess::Derived)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub access: FieldAccess,
}

impl FieldSpec {
    pub const fn open(name: &'static str) -> Self {
        Self {
            name,
            access: FieldAccess::Open,
        }
    }

    pub const fn hidden_before_dispatch(name: &'static str) -> Self {
        Self {
            name,
            access: FieldAccess::HiddenBeforeDispatch,
        }
    }

    pub const fn frozen_after_dispatch(name: &'static str) -> Self {
        Self {
            name,
            access: FieldAccess::FrozenAfterDispatch,
        }
    }

    pub const fn derived(name: &'static str) -> Self {
        Self {
            name,
            access: FieldAccess::Derived,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadSchema {
    pub fields: &'static [FieldSpec],
}

impl PayloadSchema {
    pub const fn new(fields: &'static [FieldSpec]) -> Self {
        Self { fields }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Where the invitation is in its lifecycle, as far as field access goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadStage {
    Draft,
    Dispatched,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadAccessError {
    #[error("field `{0}` is not part of this invitation's payload")]
    UnknownField(String),

    #[error("field `{0}` cannot be read before the invitation is dispatched")]
    HiddenBeforeDispatch(String),

    #[error("field `{0}` cannot be changed after the invitation is dispatched")]
    FrozenAfterDispatch(String),

    #[error("field `{0}` cannot be submitted")]
    NotSubmittable(String),

    #[error("field `{field}` has an unexpected shape: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    schema: PayloadSchema,
    stage: PayloadStage,
    values: Map<String, Value>,
}

impl Payload {
    /// Empty draft payload for a new invitation.
    pub fn new(schema: PayloadSchema) -> Self {
        Self {
            schema,
            stage: PayloadStage::Draft,
            values: Map::new(),
        }
    }

    /// Rebuild a persisted payload. Stored payloads are always dispatched.
    ///
    /// Keys outside the schema are dropped rather than rejected so that a
    /// field retired from a kind does not make old records unreadable.
    pub fn from_stored(schema: PayloadSchema, stored: Value) -> Self {
        let values = match stored {
            Value::Object(map) => map
                .into_iter()
                .filter(|(key, _)| schema.field(key).is_some())
                .collect(),
            _ => Map::new(),
        };

        Self {
            schema,
            stage: PayloadStage::Dispatched,
            values,
        }
    }

    /// Serialized form for storage. Includes every field regardless of stage.
    pub fn to_stored(&self) -> Value {
        Value::Object(self.values.clone())
    }

    pub fn schema(&self) -> PayloadSchema {
        self.schema
    }

    pub fn stage(&self) -> PayloadStage {
        self.stage
    }

    pub fn mark_dispatched(&mut self) {
        self.stage = PayloadStage::Dispatched;
    }

    /// Raw value of a field, `None` if unset.
    pub fn get(&self, field: &str) -> Result<Option<&Value>, PayloadAccessError> {
        let spec = self.spec(field)?;
        if spec.access.hidden_in_draft() && self.stage == PayloadStage::Draft {
            return Err(PayloadAccessError::HiddenBeforeDispatch(field.to_string()));
        }
        Ok(self.values.get(field).filter(|v| !v.is_null()))
    }

    /// Typed value of a field, `None` if unset.
    pub fn get_as<T: DeserializeOwned>(&self, field: &str) -> Result<Option<T>, PayloadAccessError> {
        match self.get(field)? {
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| PayloadAccessError::InvalidValue {
                    field: field.to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    pub fn set(&mut self, field: &str, value: impl Serialize) -> Result<(), PayloadAccessError> {
        self.check_writable(field)?;
        let value = serde_json::to_value(value).map_err(|e| PayloadAccessError::InvalidValue {
            field: field.to_string(),
            reason: e.to_string(),
        })?;
        self.values.insert(field.to_string(), value);
        Ok(())
    }

    /// Clear a field, returning what it held.
    pub fn remove(&mut self, field: &str) -> Result<Option<Value>, PayloadAccessError> {
        self.check_writable(field)?;
        Ok(self.values.remove(field).filter(|v| !v.is_null()))
    }

    /// Write a batch of fields, e.g. what an invitee submitted with their
    /// response. Stops at the first field that may not be written.
    pub fn apply_submission(&mut self, submission: Map<String, Value>) -> Result<(), PayloadAccessError> {
        for (field, value) in submission {
            if self.spec(&field)?.access == FieldAccess::Derived {
                return Err(PayloadAccessError::NotSubmittable(field));
            }
            self.set(&field, value)?;
        }
        Ok(())
    }

    fn check_writable(&self, field: &str) -> Result<(), PayloadAccessError> {
        let access = self.spec(field)?.access;
        match self.stage {
            PayloadStage::Draft if access.hidden_in_draft() => {
                Err(PayloadAccessError::HiddenBeforeDispatch(field.to_string()))
            }
            PayloadStage::Dispatched if access == FieldAccess::FrozenAfterDispatch => {
                Err(PayloadAccessError::FrozenAfterDispatch(field.to_string()))
            }
            _ => Ok(()),
        }
    }

    fn spec(&self, field: &str) -> Result<&FieldSpec, PayloadAccessError> {
        self.schema
            .field(field)
            .ok_or_else(|| PayloadAccessError::UnknownField(field.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const FIELDS: &[FieldSpec] = &[
        FieldSpec::frozen_after_dispatch("groups"),
        FieldSpec::hidden_before_dispatch("password"),
        FieldSpec::open("note"),
        FieldSpec::derived("passwordHash"),
    ];
    const SCHEMA: PayloadSchema = PayloadSchema::new(FIELDS);

    #[test]
    fn test_hidden_field_neither_readable_nor_writable_in_draft() {
        let mut payload = Payload::new(SCHEMA);

        assert_eq!(
            payload.set("password", "s3cret"),
            Err(PayloadAccessError::HiddenBeforeDispatch("password".into()))
        );
        assert_eq!(
            payload.get("password"),
            Err(PayloadAccessError::HiddenBeforeDispatch("password".into()))
        );
        assert!(payload.to_stored().as_object().unwrap().is_empty());
    }

    #[test]
    fn test_draft_submission_cannot_seed_hidden_fields() {
        let mut payload = Payload::new(SCHEMA);
        let Value::Object(map) = json!({"password": "preset"}) else { unreachable!() };

        assert_eq!(
            payload.apply_submission(map),
            Err(PayloadAccessError::HiddenBeforeDispatch("password".into()))
        );
    }

    #[test]
    fn test_derived_field_written_by_code_but_never_submitted() {
        let mut payload = Payload::new(SCHEMA);
        assert!(payload.set("passwordHash", "x").is_err());

        payload.mark_dispatched();
        payload.set("passwordHash", "$argon2id$v=19$...").unwrap();
        assert!(payload.get_as::<String>("passwordHash").unwrap().is_some());

        let Value::Object(map) = json!({"passwordHash": "forged"}) else { unreachable!() };
        assert_eq!(
            payload.apply_submission(map),
            Err(PayloadAccessError::NotSubmittable("passwordHash".into()))
        );
        assert_eq!(
            payload.get_as::<String>("passwordHash").unwrap().as_deref(),
            Some("$argon2id$v=19$...")
        );
    }

    #[test]
    fn test_remove_clears_field() {
        let mut payload = Payload::new(SCHEMA);
        payload.mark_dispatched();
        payload.set("password", "pw").unwrap();

        assert_eq!(payload.remove("password").unwrap(), Some(json!("pw")));
        assert_eq!(payload.get("password").unwrap(), None);
        assert_eq!(payload.remove("password").unwrap(), None);
    }

    #[test]
    fn test_hidden_field_readable_once_dispatched() {
        let mut payload = Payload::new(SCHEMA);
        payload.mark_dispatched();
        payload.set("password", "s3cret").unwrap();

        assert_eq!(
            payload.get_as::<String>("password").unwrap(),
            Some("s3cret".to_string())
        );
    }

    #[test]
    fn test_frozen_field_writable_in_draft_only() {
        let mut payload = Payload::new(SCHEMA);
        payload.set("groups", vec![5]).unwrap();
        payload.mark_dispatched();

        assert_eq!(
            payload.set("groups", vec![6]),
            Err(PayloadAccessError::FrozenAfterDispatch("groups".into()))
        );
        assert_eq!(payload.get_as::<Vec<i64>>("groups").unwrap(), Some(vec![5]));
    }

    #[test]
    fn test_open_field_free_in_both_stages() {
        let mut payload = Payload::new(SCHEMA);
        payload.set("note", "draft").unwrap();
        assert_eq!(payload.get_as::<String>("note").unwrap().as_deref(), Some("draft"));

        payload.mark_dispatched();
        payload.set("note", "sent").unwrap();
        assert_eq!(payload.get_as::<String>("note").unwrap().as_deref(), Some("sent"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let mut payload = Payload::new(SCHEMA);
        assert_eq!(
            payload.set("isAdmin", true),
            Err(PayloadAccessError::UnknownField("isAdmin".into()))
        );
        assert!(matches!(
            payload.get("isAdmin"),
            Err(PayloadAccessError::UnknownField(_))
        ));
    }

    #[test]
    fn test_stored_payload_is_dispatched_and_drops_unknown_keys() {
        let stored = json!({"groups": [1, 2], "password": "hash", "legacy": "x"});
        let payload = Payload::from_stored(SCHEMA, stored);

        assert_eq!(payload.stage(), PayloadStage::Dispatched);
        assert_eq!(payload.get_as::<String>("password").unwrap().as_deref(), Some("hash"));
        assert_eq!(payload.to_stored(), json!({"groups": [1, 2], "password": "hash"}));
    }

    #[test]
    fn test_submission_cannot_touch_frozen_fields() {
        let mut payload = Payload::new(SCHEMA);
        payload.set("groups", vec![5]).unwrap();
        payload.mark_dispatched();

        let submission = json!({"password": "pw", "groups": [1]});
        let Value::Object(map) = submission else { unreachable!() };

        assert_eq!(
            payload.apply_submission(map),
            Err(PayloadAccessError::FrozenAfterDispatch("groups".into()))
        );
        assert_eq!(payload.get_as::<Vec<i64>>("groups").unwrap(), Some(vec![5]));
    }

    #[test]
    fn test_wrong_shape_reported_as_invalid_value() {
        let mut payload = Payload::new(SCHEMA);
        payload.set("groups", "five").unwrap();

        assert!(matches!(
            payload.get_as::<Vec<i64>>("groups"),
            Err(PayloadAccessError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_null_reads_as_unset() {
        let mut payload = Payload::new(SCHEMA);
        payload.set("note", Value::Null).unwrap();
        assert_eq!(payload.get("note").unwrap(), None);
    }
}
