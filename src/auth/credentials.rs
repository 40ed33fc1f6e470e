// Credential loading from the platform store
//
// macOS keeps the Claude Code record in the login keychain; Linux and Windows
// keep it in `~/.claude/.credentials.json`. Every failure here is soft: the
// caller sees `None` and carries on without OAuth.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

use super::expiry::{format_millis, now_millis};
use super::types::{CredentialRecord, OAuthToken};

/// Keychain service name used by Claude Code
pub const DEFAULT_KEYCHAIN_SERVICE: &str = "Claude Code-credentials";

/// Credentials file relative to the home directory
pub const DEFAULT_CREDENTIALS_FILE: &str = ".claude/.credentials.json";

/// Substring `security` prints when the item does not exist
const KEYCHAIN_NOT_FOUND: &str = "could not be found";

/// Reasons a credential read came back empty
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("OAuth token extraction is not supported on {0}")]
    Unsupported(String),

    #[error("No Claude Code credentials found in {0}")]
    NotFound(String),

    #[error("Failed to retrieve credentials from keychain: {0}")]
    Lookup(String),

    #[error("Failed to read credentials file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed credential record: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Read access to a credential record
pub trait CredentialStore: Send + Sync {
    /// Fetch and parse the record, reporting why it is unavailable
    fn fetch(&self, debug: bool) -> Result<CredentialRecord, StoreError>;

    /// Soft read: any failure is logged and becomes `None`
    fn read(&self, debug: bool) -> Option<CredentialRecord> {
        match self.fetch(debug) {
            Ok(record) => {
                if debug {
                    if let Some(ref token) = record.oauth {
                        log_token_details(token);
                    }
                }
                Some(record)
            }
            Err(e @ StoreError::NotFound(_)) => {
                tracing::info!("{}", e);
                None
            }
            Err(e) => {
                tracing::warn!("{}", e);
                None
            }
        }
    }
}

/// macOS keychain lookup via the `security` tool
#[derive(Debug, Clone)]
pub struct KeychainStore {
    program: String,
    service: String,
    account: String,
}

impl KeychainStore {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            program: "security".to_string(),
            service: service.into(),
            account: account.into(),
        }
    }

    fn lookup_args(&self) -> Vec<&str> {
        let mut args = vec!["find-generic-password", "-s", self.service.as_str()];
        if !self.account.is_empty() {
            args.extend(["-a", self.account.as_str()]);
        }
        args.push("-w");
        args
    }
}

impl CredentialStore for KeychainStore {
    fn fetch(&self, debug: bool) -> Result<CredentialRecord, StoreError> {
        if debug {
            tracing::debug!(
                service = %self.service,
                account = %self.account,
                "Reading keychain"
            );
        }

        let output = Command::new(&self.program)
            .args(self.lookup_args())
            .output()
            .map_err(|e| StoreError::Lookup(format!("failed to run {}: {}", self.program, e)))?;

        parse_lookup_output(
            output.status.success(),
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        )
    }
}

/// Interpret the result of a `security find-generic-password -w` call
pub fn parse_lookup_output(
    success: bool,
    stdout: &str,
    stderr: &str,
) -> Result<CredentialRecord, StoreError> {
    if !success {
        if stderr.contains(KEYCHAIN_NOT_FOUND) {
            return Err(StoreError::NotFound("keychain".to_string()));
        }
        return Err(StoreError::Lookup(stderr.trim().to_string()));
    }

    Ok(serde_json::from_str(stdout.trim())?)
}

/// JSON credentials file
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileStore {
    fn fetch(&self, debug: bool) -> Result<CredentialRecord, StoreError> {
        if debug {
            tracing::debug!("Looking for credentials at: {}", self.path.display());
        }

        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(self.path.display().to_string()));
            }
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        Ok(serde_json::from_str(&content)?)
    }
}

/// Platform with neither a keychain nor a known credentials file
#[derive(Debug, Clone)]
pub struct UnsupportedStore {
    platform: String,
}

impl UnsupportedStore {
    pub fn new(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
        }
    }
}

impl CredentialStore for UnsupportedStore {
    fn fetch(&self, _debug: bool) -> Result<CredentialRecord, StoreError> {
        Err(StoreError::Unsupported(self.platform.clone()))
    }
}

/// Where the platform stores look for credentials
#[derive(Debug, Clone)]
pub struct StoreLocation {
    pub keychain_service: String,
    pub keychain_account: String,
    pub credentials_file: PathBuf,
}

/// Pick the credential store for an OS name as reported by `std::env::consts::OS`
pub fn platform_store(os: &str, location: &StoreLocation) -> Box<dyn CredentialStore> {
    match os {
        "macos" => Box::new(KeychainStore::new(
            location.keychain_service.clone(),
            location.keychain_account.clone(),
        )),
        "linux" | "windows" => Box::new(FileStore::new(location.credentials_file.clone())),
        other => Box::new(UnsupportedStore::new(other)),
    }
}

/// Current OS user, used as the keychain account
pub fn current_username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default()
}

fn log_token_details(token: &OAuthToken) {
    let now = now_millis();
    let expires_in_ms = token.expires_at.saturating_sub(now);
    let expires_in_mins = (expires_in_ms as f64 / 1000.0 / 60.0).round() as i64;

    tracing::debug!(
        expires_at = %format_millis(token.expires_at),
        now = %format_millis(now),
        expires_in_mins,
        expires_in_ms,
        subscription_type = token.subscription_type.as_deref().unwrap_or("-"),
        rate_limit_tier = token.rate_limit_tier.as_deref().unwrap_or("-"),
        scopes = %token.scopes.join(", "),
        access_token_len = token.access_token.len(),
        refresh_token_len = token.refresh_token.len(),
        "Token retrieved"
    );
}
