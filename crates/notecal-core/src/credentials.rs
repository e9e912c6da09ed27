//! OAuth credential values.
//!
//! A [`CredentialSet`] is what a successful authorization produces and what
//! the settings store persists. A [`CredentialUpdate`] is the partial value
//! delivered when an access token is silently refreshed.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// The durable credentials for one linked calendar account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSet {
    /// Short-lived bearer token for API requests.
    pub access_token: String,

    /// Long-lived token used to mint new access tokens.
    pub refresh_token: Option<String>,

    /// Absolute time after which the access token must not be used.
    pub expiry: Option<DateTime<Utc>>,
}

impl CredentialSet {
    /// Creates a new credential set.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expiry: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expiry,
        }
    }

    /// Returns true if the access token expires within `skew` of now.
    ///
    /// A set without a known expiry is treated as valid.
    pub fn is_expired_within(&self, skew: Duration) -> bool {
        self.is_expired_at(Utc::now() + skew)
    }

    /// Returns true if the access token is expired at `instant`.
    pub fn is_expired_at(&self, instant: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|expiry| instant >= expiry)
    }

    /// Applies a refresh update.
    ///
    /// The access token and expiry are always replaced. The refresh token is
    /// only replaced when the update carries a new one.
    pub fn merge(&mut self, update: &CredentialUpdate) {
        self.access_token = update.access_token.clone();
        self.expiry = update.expiry;
        if let Some(ref refresh_token) = update.refresh_token {
            self.refresh_token = Some(refresh_token.clone());
        }
    }
}

/// Partial credentials produced by a silent token refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialUpdate {
    /// The newly minted access token.
    pub access_token: String,

    /// Expiry of the new access token.
    pub expiry: Option<DateTime<Utc>>,

    /// Present only when the provider reissued the refresh token.
    pub refresh_token: Option<String>,
}

impl CredentialUpdate {
    /// Creates an update carrying only an access token and its expiry.
    pub fn new(access_token: impl Into<String>, expiry: Option<DateTime<Utc>>) -> Self {
        Self {
            access_token: access_token.into(),
            expiry,
            refresh_token: None,
        }
    }

    /// Attaches a reissued refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn merge_keeps_refresh_token_when_absent() {
        let mut creds = CredentialSet::new("a1", Some("r1".to_string()), Some(at(1_000)));
        creds.merge(&CredentialUpdate::new("a2", Some(at(2_000))));

        assert_eq!(creds.access_token, "a2");
        assert_eq!(creds.refresh_token.as_deref(), Some("r1"));
        assert_eq!(creds.expiry, Some(at(2_000)));
    }

    #[test]
    fn merge_replaces_reissued_refresh_token() {
        let mut creds = CredentialSet::new("a1", Some("r1".to_string()), None);
        creds.merge(&CredentialUpdate::new("a2", None).with_refresh_token("r2"));

        assert_eq!(creds.refresh_token.as_deref(), Some("r2"));
        assert!(creds.expiry.is_none());
    }

    #[test]
    fn expiry_checks() {
        let creds = CredentialSet::new("a", None, Some(at(1_000)));
        assert!(!creds.is_expired_at(at(999)));
        assert!(creds.is_expired_at(at(1_000)));

        let no_expiry = CredentialSet::new("a", None, None);
        assert!(!no_expiry.is_expired_within(Duration::days(365)));
    }

    #[test]
    fn expires_within_skew() {
        let soon = CredentialSet::new("a", None, Some(Utc::now() + Duration::seconds(30)));
        assert!(soon.is_expired_within(Duration::seconds(60)));
        assert!(!soon.is_expired_within(Duration::zero()));
    }

    #[test]
    fn serde_shape() {
        let creds = CredentialSet::new("a1", Some("r1".to_string()), Some(at(0)));
        let json = serde_json::to_value(&creds).unwrap();
        assert_eq!(json["access_token"], "a1");
        assert_eq!(json["refresh_token"], "r1");

        let back: CredentialSet = serde_json::from_value(json).unwrap();
        assert_eq!(back, creds);
    }
}
