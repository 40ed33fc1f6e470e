// Credential record types

use serde::{Deserialize, Serialize};
use std::fmt;

/// OAuth token as persisted by Claude Code
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,

    /// Absolute expiry in epoch milliseconds
    pub expires_at: i64,

    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub subscription_type: Option<String>,
    #[serde(default)]
    pub rate_limit_tier: Option<String>,
}

// Secrets never reach logs, only their lengths
impl fmt::Debug for OAuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthToken")
            .field("access_token_len", &self.access_token.len())
            .field("refresh_token_len", &self.refresh_token.len())
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .field("subscription_type", &self.subscription_type)
            .field("rate_limit_tier", &self.rate_limit_tier)
            .finish()
    }
}

/// Top-level credential record (keychain entry or `.credentials.json`)
///
/// Other keys written by Claude Code are ignored. A record without
/// `claudeAiOauth` means the user is not logged in, which is not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    #[serde(
        rename = "claudeAiOauth",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub oauth: Option<OAuthToken>,
}

impl CredentialRecord {
    pub fn into_token(self) -> Option<OAuthToken> {
        self.oauth
    }
}
