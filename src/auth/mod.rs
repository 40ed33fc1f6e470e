// Authentication module
// Reads the Claude Code OAuth token and refreshes it before launch

mod broker;
mod credentials;
mod expiry;
mod refresh;
mod types;

pub use broker::{CredentialBroker, OAuthResolution};
pub use credentials::{
    current_username, parse_lookup_output, platform_store, CredentialStore, FileStore,
    KeychainStore, StoreError, StoreLocation, UnsupportedStore, DEFAULT_CREDENTIALS_FILE,
    DEFAULT_KEYCHAIN_SERVICE,
};
pub use expiry::{check_expired, is_expired, now_millis};
pub use refresh::{
    poll_until, ProcessRefreshChannel, RefreshChannel, RefreshOrchestrator, RefreshOutcome,
    DEFAULT_POLL_INTERVAL, DEFAULT_REFRESH_TIMEOUT, DEFAULT_SHUTDOWN_GRACE,
};
pub use types::{CredentialRecord, OAuthToken};
