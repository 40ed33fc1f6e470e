use std::sync::Arc;

use super::credentials::CredentialStore;
use super::expiry::check_expired;
use super::refresh::{RefreshChannel, RefreshOrchestrator, RefreshOutcome};
use super::types::OAuthToken;

/// What the broker found out about the OAuth token
#[derive(Debug, Clone, PartialEq)]
pub enum OAuthResolution {
    /// Stored token is still valid
    Valid(OAuthToken),

    /// Stored token was expired and a refresh produced a valid one
    Refreshed(OAuthToken),

    /// No token in the store (not logged in, unreadable, unsupported platform)
    Missing,

    /// Stored token was expired and the refresh attempt failed
    RefreshFailed(RefreshOutcome),
}

impl OAuthResolution {
    pub fn token(&self) -> Option<&OAuthToken> {
        match self {
            OAuthResolution::Valid(token) | OAuthResolution::Refreshed(token) => Some(token),
            _ => None,
        }
    }

    pub fn into_token(self) -> Option<OAuthToken> {
        match self {
            OAuthResolution::Valid(token) | OAuthResolution::Refreshed(token) => Some(token),
            _ => None,
        }
    }
}

/// Credential broker
/// Reads the stored OAuth token and refreshes it once if it has expired
pub struct CredentialBroker {
    store: Arc<dyn CredentialStore>,
    orchestrator: RefreshOrchestrator,
    program: String,
    debug: bool,
    force_refresh: bool,
}

impl CredentialBroker {
    pub fn new(store: Arc<dyn CredentialStore>, orchestrator: RefreshOrchestrator) -> Self {
        Self {
            store,
            orchestrator,
            program: "claude".to_string(),
            debug: false,
            force_refresh: false,
        }
    }

    /// Program named in the re-authentication hint
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self.orchestrator = self.orchestrator.with_debug(debug);
        self
    }

    /// Treat any stored token as expired
    pub fn with_force_refresh(mut self, force_refresh: bool) -> Self {
        self.force_refresh = force_refresh;
        self
    }

    /// Resolve the OAuth token, refreshing through `channel` when needed.
    /// `channel` is only triggered if the stored token is expired.
    pub async fn resolve<C: RefreshChannel>(&self, channel: &mut C) -> OAuthResolution {
        let Some(token) = self.store.read(self.debug).and_then(|r| r.into_token()) else {
            return OAuthResolution::Missing;
        };

        if self.force_refresh {
            tracing::debug!("Forcing token refresh");
        } else if !check_expired(&token, self.debug) {
            return OAuthResolution::Valid(token);
        }

        println!("\x1b[1;33m🔄 OAuth token expired. Refreshing...\x1b[0m\n");

        match self.orchestrator.refresh(channel).await {
            RefreshOutcome::Success(token) => {
                println!("\x1b[1;32m✓ OAuth token refreshed successfully!\x1b[0m\n");
                OAuthResolution::Refreshed(token)
            }
            failure => {
                eprintln!("{}.", failure.describe());
                eprintln!("{}", reauth_hint(&self.program));
                OAuthResolution::RefreshFailed(failure)
            }
        }
    }
}

fn reauth_hint(program: &str) -> String {
    format!("Please run '{}' directly to re-authenticate.", program)
}
