//! Keys, tokens, and mention items shared across the coordination layer.

use chrono::{DateTime, Datelike, Days, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Point in time used by every watermark and tick.
pub type Timestamp = DateTime<Utc>;

macro_rules! string_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier.
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// Borrow the identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_key!(
    /// Identity of one mention-fetch client, derived from a GitHub username.
    ClientKey
);

string_key!(
    /// Identity of one login session.
    SessionId
);

string_key!(
    /// Per-user scope in which active sessions are verified.
    UserScope
);

string_key!(
    /// Bounded storage scope owned by one janitor.
    JanitorScope
);

impl ClientKey {
    /// Derive the client key for a GitHub username.
    ///
    /// GitHub logins are case-insensitive, so `Octocat` and `octocat` map to
    /// the same client.
    pub fn from_username(username: &str) -> Self {
        Self(username.trim().to_ascii_lowercase())
    }
}

impl UserScope {
    /// Verification scope for a GitHub username.
    pub fn for_username(username: &str) -> Self {
        Self(username.trim().to_ascii_lowercase())
    }
}

/// Credential material that must never reach the logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wrap a raw credential.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The raw credential, for handing to a collaborator.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// A freshly issued (or refreshed) access credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedToken {
    /// Bearer token used for GitHub requests.
    pub access_token: Secret,
    /// Token exchanged for a new access token once this one expires.
    pub refresh_token: Secret,
    /// When `access_token` stops being accepted.
    pub expires_at: Timestamp,
}

/// One mention observed by a fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    /// Stable identifier of the mentioning item (issue, PR, comment).
    pub id: String,
    /// Web URL of the item.
    pub url: String,
    /// Title shown to the user.
    pub title: String,
    /// When the item was last updated upstream.
    pub updated_at: Timestamp,
}

/// Start (00:00 UTC) of the most recent weekday strictly before `now`'s date.
///
/// Only Saturday and Sunday are skipped; public holidays are not known here.
/// Returns `now` unchanged when no earlier date is representable.
pub fn previous_working_day_start(now: Timestamp) -> Timestamp {
    let one_day = Days::new(1);
    let Some(mut day) = now.date_naive().checked_sub_days(one_day) else {
        return now;
    };
    while matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
        match day.checked_sub_days(one_day) {
            Some(earlier) => day = earlier,
            None => return now,
        }
    }
    Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN))
}
