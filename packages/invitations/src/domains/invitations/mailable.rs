use anyhow::Context;
use serde::Serialize;
use url::Url;

use super::error::InvitationResult;
use crate::common::InvitationId;

/// Sender address and the public base URL resolution links point at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailSettings {
    pub from: String,
    pub base_url: String,
}

/// Kind-rendered text of an invitation message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailContent {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionAction {
    Accept,
    Decline,
}

impl ResolutionAction {
    fn path_segment(&self) -> &'static str {
        match self {
            ResolutionAction::Accept => "accept",
            ResolutionAction::Decline => "decline",
        }
    }
}

/// A rendered invitation message, ready for a mail transport.
///
/// The URLs embed the plaintext key, so `Debug` prints them without their
/// query string.
#[derive(Clone, Serialize)]
pub struct Mailable {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub accept_url: Url,
    pub decline_url: Url,
}

impl Mailable {
    /// Plaintext key carried by the accept link.
    pub fn key(&self) -> Option<String> {
        self.accept_url
            .query_pairs()
            .find(|(name, _)| name == "key")
            .map(|(_, value)| value.into_owned())
    }
}

impl std::fmt::Debug for Mailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailable")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("subject", &self.subject)
            .field("accept_url", &self.accept_url.path())
            .field("decline_url", &self.decline_url.path())
            .finish()
    }
}

/// `{base}/invitations/{id}/{accept|decline}?key={key}`
pub fn resolution_url(
    base_url: &str,
    id: InvitationId,
    action: ResolutionAction,
    key: &str,
) -> InvitationResult<Url> {
    let id = id.to_string();
    let mut url = Url::parse(base_url).with_context(|| format!("Invalid invitation base URL: {}", base_url))?;

    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("Invitation base URL cannot carry a path: {}", base_url))?
        .pop_if_empty()
        .extend(["invitations", id.as_str(), action.path_segment()]);
    url.query_pairs_mut().clear().append_pair("key", key);

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_url_shape() {
        let id = InvitationId::new();
        let url = resolution_url("https://app.example.org", id, ResolutionAction::Accept, "abc.def").unwrap();

        assert_eq!(
            url.as_str(),
            format!("https://app.example.org/invitations/{}/accept?key=abc.def", id)
        );
    }

    #[test]
    fn test_base_path_preserved_and_trailing_slash_ignored() {
        let id = InvitationId::new();
        let url = resolution_url("https://example.org/press/", id, ResolutionAction::Decline, "k").unwrap();

        assert_eq!(url.path(), format!("/press/invitations/{}/decline", id));
    }

    #[test]
    fn test_key_is_query_encoded() {
        let id = InvitationId::new();
        let url = resolution_url("http://localhost:8080", id, ResolutionAction::Accept, "a+b/c").unwrap();

        assert!(url.as_str().ends_with("key=a%2Bb%2Fc"));
    }

    #[test]
    fn test_invalid_base_rejected() {
        let id = InvitationId::new();
        assert!(resolution_url("not a url", id, ResolutionAction::Accept, "k").is_err());
        assert!(resolution_url("mailto:x@example.org", id, ResolutionAction::Accept, "k").is_err());
    }

    #[test]
    fn test_mailable_key_and_debug() {
        let id = InvitationId::new();
        let mailable = Mailable {
            from: "no-reply@localhost".into(),
            to: vec!["a@example.org".into()],
            subject: "s".into(),
            body: "b".into(),
            accept_url: resolution_url("http://localhost", id, ResolutionAction::Accept, "sel.secret").unwrap(),
            decline_url: resolution_url("http://localhost", id, ResolutionAction::Decline, "sel.secret").unwrap(),
        };

        assert_eq!(mailable.key().as_deref(), Some("sel.secret"));
        assert!(!format!("{:?}", mailable).contains("sel.secret"));
    }
}
