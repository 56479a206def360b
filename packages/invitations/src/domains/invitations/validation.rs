//! Phase-scoped, accumulating validation.
//!
//! Rules are declarative ([`Rule`] = field + [`Constraint`]) and come from
//! three places: the generic identity key, the invitation kind, and the
//! kind's asynchronous checks against collaborators. Every rule for the
//! phase runs; failures collect per field instead of stopping at the first.

use chrono::{DateTime, NaiveDate, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use super::error::{InvitationError, InvitationResult};
use super::models::Invitation;
use crate::common::UserId;
use crate::kernel::{BasePrincipalStore, BaseReviewAssignments};

lazy_static! {
    // RFC 5322 simplified, anchored
    static ref EMAIL_REGEX: Regex =
        Regex::new(r"(?i)^[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}$").unwrap();

    static ref ALPHA_DASH_REGEX: Regex = Regex::new(r"^[A-Za-z0-9_.-]+$").unwrap();
}

/// Which rule set applies. `Default` rules run in every phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPhase {
    /// Shape checks that hold at any time
    Default,
    /// Identity and legality checks before the invitation goes out
    Invite,
    /// Consistency checks when the invitee completes the invitation
    Finalize,
    /// Checks on what the invitee sends along with a decline
    Decline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    Required,
    /// Required unless the named field has a value
    RequiredWithout(&'static str),
    Email,
    MinLength(usize),
    MaxLength(usize),
    /// Letters, digits, `_`, `.` and `-`
    AlphaDash,
    PositiveInteger,
    /// Array of distinct positive integers
    IdList,
    /// No element shared with the named list field
    DisjointFrom(&'static str),
    /// `YYYY-MM-DD`
    Date,
}

impl Constraint {
    pub fn name(&self) -> &'static str {
        match self {
            Constraint::Required => "required",
            Constraint::RequiredWithout(_) => "required_without",
            Constraint::Email => "email",
            Constraint::MinLength(_) => "min",
            Constraint::MaxLength(_) => "max",
            Constraint::AlphaDash => "alpha_dash",
            Constraint::PositiveInteger => "positive_integer",
            Constraint::IdList => "id_list",
            Constraint::DisjointFrom(_) => "disjoint",
            Constraint::Date => "date",
        }
    }

    fn default_message(&self, field: &str) -> String {
        match self {
            Constraint::Required => format!("The {} field is required.", field),
            Constraint::RequiredWithout(other) => {
                format!("The {} field is required when {} is not present.", field, other)
            }
            Constraint::Email => format!("The {} field must be a valid email address.", field),
            Constraint::MinLength(n) => format!("The {} field must be at least {} characters.", field, n),
            Constraint::MaxLength(n) => format!("The {} field may not be greater than {} characters.", field, n),
            Constraint::AlphaDash => format!(
                "The {} field may only contain letters, numbers, dashes, dots and underscores.",
                field
            ),
            Constraint::PositiveInteger => format!("The {} field must be a positive integer.", field),
            Constraint::IdList => format!("The {} field must be a list of distinct positive ids.", field),
            Constraint::DisjointFrom(other) => {
                format!("The {} field may not share entries with {}.", field, other)
            }
            Constraint::Date => format!("The {} field must be a date (YYYY-MM-DD).", field),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub field: &'static str,
    pub constraint: Constraint,
}

impl Rule {
    pub const fn new(field: &'static str, constraint: Constraint) -> Self {
        Self { field, constraint }
    }
}

/// Message override for one (field, constraint) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleMessage {
    pub field: &'static str,
    pub rule: &'static str,
    pub text: &'static str,
}

impl RuleMessage {
    pub const fn new(field: &'static str, rule: &'static str, text: &'static str) -> Self {
        Self { field, rule, text }
    }
}

/// Resolved messages for a phase: overrides first, generic defaults otherwise.
#[derive(Debug, Clone, Default)]
pub struct ValidationMessages {
    overrides: Vec<RuleMessage>,
}

impl ValidationMessages {
    pub fn new(overrides: Vec<RuleMessage>) -> Self {
        Self { overrides }
    }

    pub fn for_rule(&self, rule: &Rule) -> String {
        self.text(rule.field, rule.constraint.name())
            .unwrap_or_else(|| rule.constraint.default_message(rule.field))
    }

    /// Override text for a (field, rule name) pair, used by asynchronous
    /// checks that are not expressed as a [`Constraint`].
    pub fn text(&self, field: &str, rule: &str) -> Option<String> {
        self.overrides
            .iter()
            .find(|m| m.field == field && m.rule == rule)
            .map(|m| m.text.to_string())
    }
}

/// Field-keyed, multi-reason validation failures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn get(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn into_result(self) -> InvitationResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(InvitationError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            if !first {
                write!(f, "; ")?;
            }
            first = false;
            write!(f, "{}: {}", field, messages.join(" "))?;
        }
        Ok(())
    }
}

/// Collaborators and request facts the rules may consult. Passed in
/// explicitly so rules never reach for ambient session state.
#[derive(Clone, Copy)]
pub struct ValidationContext<'a> {
    pub principals: &'a dyn BasePrincipalStore,
    pub reviews: &'a dyn BaseReviewAssignments,
    /// Principal issuing or resolving the invitation, when known
    pub actor: Option<UserId>,
    pub now: DateTime<Utc>,
}

/// Generic identity-key rules.
pub fn identity_rules(phase: ValidationPhase) -> Vec<Rule> {
    match phase {
        ValidationPhase::Default => vec![
            Rule::new("email", Constraint::Email),
            Rule::new("email", Constraint::MaxLength(255)),
            Rule::new("userId", Constraint::PositiveInteger),
            Rule::new("contextId", Constraint::PositiveInteger),
            Rule::new("assocId", Constraint::PositiveInteger),
        ],
        ValidationPhase::Invite => vec![
            Rule::new("email", Constraint::RequiredWithout("userId")),
            Rule::new("contextId", Constraint::Required),
        ],
        ValidationPhase::Finalize | ValidationPhase::Decline => Vec::new(),
    }
}

/// Run every rule for `phase` (plus `Default`) against the invitation.
///
/// A rule that reads a field the phase may not see is a flow error, not a
/// validation failure, and aborts with [`InvitationError::PayloadAccess`].
pub async fn validate(
    invitation: &Invitation,
    phase: ValidationPhase,
    ctx: &ValidationContext<'_>,
) -> InvitationResult<()> {
    let mut errors = ValidationErrors::new();
    let messages = invitation.validation_messages(phase);

    for rule in invitation.validation_rules(phase) {
        if !check_rule(&rule, invitation)? {
            errors.add(rule.field, messages.for_rule(&rule));
        }
    }

    let kind = invitation.kind();
    if phase != ValidationPhase::Default {
        kind.check(ValidationPhase::Default, invitation, ctx, &messages, &mut errors)
            .await?;
    }
    kind.check(phase, invitation, ctx, &messages, &mut errors).await?;

    if !errors.is_empty() {
        tracing::debug!(
            invitation_type = %invitation.identity().invitation_type,
            ?phase,
            fields = ?errors.fields().collect::<Vec<_>>(),
            "Invitation failed validation"
        );
    }
    errors.into_result()
}

/// Evaluate one rule. `Ok(true)` when satisfied.
fn check_rule(rule: &Rule, invitation: &Invitation) -> InvitationResult<bool> {
    let value = invitation.field_value(rule.field)?;

    let satisfied = match (&rule.constraint, &value) {
        (Constraint::Required, v) => is_present(v.as_ref()),
        (Constraint::RequiredWithout(other), v) => {
            is_present(v.as_ref()) || is_present(invitation.field_value(other)?.as_ref())
        }
        // Remaining constraints only judge values that are present
        (_, None) => true,
        (Constraint::Email, Some(v)) => v.as_str().is_some_and(|s| EMAIL_REGEX.is_match(s)),
        (Constraint::MinLength(n), Some(v)) => v.as_str().is_some_and(|s| s.chars().count() >= *n),
        (Constraint::MaxLength(n), Some(v)) => v.as_str().is_some_and(|s| s.chars().count() <= *n),
        (Constraint::AlphaDash, Some(v)) => v.as_str().is_some_and(|s| ALPHA_DASH_REGEX.is_match(s)),
        (Constraint::PositiveInteger, Some(v)) => v.as_i64().is_some_and(|n| n > 0),
        (Constraint::IdList, Some(v)) => id_list(v).is_some(),
        (Constraint::DisjointFrom(other), Some(v)) => {
            let other = invitation.field_value(other)?;
            match (id_list(v), other.as_ref().and_then(id_list)) {
                (Some(ours), Some(theirs)) => ours.is_disjoint(&theirs),
                // Shape problems are reported by `IdList`
                _ => true,
            }
        }
        (Constraint::Date, Some(v)) => v
            .as_str()
            .is_some_and(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()),
    };

    Ok(satisfied)
}

fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(_) => true,
    }
}

fn id_list(value: &Value) -> Option<HashSet<i64>> {
    let items = value.as_array()?;
    let mut ids = HashSet::with_capacity(items.len());
    for item in items {
        let id = item.as_i64().filter(|id| *id > 0)?;
        if !ids.insert(id) {
            return None;
        }
    }
    Some(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_errors_accumulate_per_field() {
        let mut errors = ValidationErrors::new();
        errors.add("email", "first");
        errors.add("email", "second");
        errors.add("userGroupsToAdd", "third");

        assert_eq!(errors.get("email"), ["first", "second"]);
        assert_eq!(errors.fields().collect::<Vec<_>>(), ["email", "userGroupsToAdd"]);
        assert!(errors.has("userGroupsToAdd"));
        assert!(errors.get("missing").is_empty());
    }

    #[test]
    fn test_empty_errors_are_ok() {
        assert!(ValidationErrors::new().into_result().is_ok());
    }

    #[test]
    fn test_non_empty_errors_become_validation_error() {
        let mut errors = ValidationErrors::new();
        errors.add("email", "bad");

        let err = errors.into_result().unwrap_err();
        assert_eq!(err.validation_errors().unwrap().get("email"), ["bad"]);
    }

    #[test]
    fn test_errors_serialize_as_field_map() {
        let mut errors = ValidationErrors::new();
        errors.add("email", "bad");
        assert_eq!(serde_json::to_value(&errors).unwrap(), json!({"email": ["bad"]}));
    }

    #[test]
    fn test_override_message_wins() {
        let messages = ValidationMessages::new(vec![RuleMessage::new(
            "email",
            "email",
            "Use a real address.",
        )]);

        assert_eq!(
            messages.for_rule(&Rule::new("email", Constraint::Email)),
            "Use a real address."
        );
        assert_eq!(
            messages.for_rule(&Rule::new("email", Constraint::Required)),
            "The email field is required."
        );
    }

    #[test]
    fn test_id_list_shape() {
        assert!(id_list(&json!([1, 2, 3])).is_some());
        assert!(id_list(&json!([])).is_some());
        assert!(id_list(&json!([1, 1])).is_none());
        assert!(id_list(&json!([0])).is_none());
        assert!(id_list(&json!(["1"])).is_none());
        assert!(id_list(&json!(5)).is_none());
    }

    #[test]
    fn test_presence() {
        assert!(!is_present(None));
        assert!(!is_present(Some(&json!(null))));
        assert!(!is_present(Some(&json!("  "))));
        assert!(!is_present(Some(&json!([]))));
        assert!(is_present(Some(&json!(0))));
        assert!(is_present(Some(&json!("x"))));
    }

    #[test]
    fn test_email_pattern() {
        assert!(EMAIL_REGEX.is_match("a@example.org"));
        assert!(EMAIL_REGEX.is_match("First.Last+tag@sub.example.co"));
        assert!(!EMAIL_REGEX.is_match("a@example"));
        assert!(!EMAIL_REGEX.is_match("a example@x.org"));
    }
}
