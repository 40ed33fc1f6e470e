// Integration tests for the launcher
//
// These drive `SessionLauncher::prepare` end to end with redirected store
// paths, a scripted refresh channel and a scripted key prompt.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tempfile::TempDir;

use claude_code_infinite::{
    auth::{
        now_millis, CredentialRecord, CredentialStore, FileStore, OAuthToken, RefreshChannel,
        UnsupportedStore,
    },
    config::{Config, Mode},
    error::LaunchError,
    launcher::{SessionLauncher, LOCAL_BASE_URL, PRODUCTION_BASE_URL},
    prompt::KeyPrompt,
    secrets::ApiKeyStore,
};

// ==================================================================================================
// Test Helpers
// ==================================================================================================

fn test_config(dir: &Path, mode: Mode) -> Config {
    Config {
        mode,
        debug: false,
        log_level: "warn".to_string(),
        require_oauth: false,
        force_refresh: false,
        claude_bin: "claude".to_string(),
        claude_args: vec!["--model".to_string(), "opus".to_string()],
        refresh_poll_interval: Duration::from_millis(100),
        refresh_timeout: Duration::from_millis(10_000),
        credentials_file: dir.join(".claude").join(".credentials.json"),
        config_dir: dir.join(".claude-code-infinite"),
        keychain_service: "Claude Code-credentials".to_string(),
        keychain_account: "tester".to_string(),
    }
}

fn token(access: &str, expires_at: i64) -> OAuthToken {
    OAuthToken {
        access_token: access.to_string(),
        refresh_token: "refresh".to_string(),
        expires_at,
        scopes: vec!["user:inference".to_string()],
        subscription_type: Some("max".to_string()),
        rate_limit_tier: Some("default_claude_max_20x".to_string()),
    }
}

fn write_credentials(config: &Config, token: &OAuthToken) {
    let path = &config.credentials_file;
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let record = CredentialRecord {
        oauth: Some(token.clone()),
    };
    std::fs::write(path, serde_json::to_string_pretty(&record).unwrap()).unwrap();
}

fn launcher(
    config: Config,
    store: Arc<dyn CredentialStore>,
    prompt: ScriptedPrompt,
) -> SessionLauncher {
    let keys = ApiKeyStore::new(config.config_dir.clone());
    SessionLauncher::with_parts(config, store, keys, Box::new(prompt))
}

fn launcher_for(config: Config) -> SessionLauncher {
    let store = file_store(&config);
    launcher(config, store, ScriptedPrompt::answering("unused"))
}

fn file_store(config: &Config) -> Arc<dyn CredentialStore> {
    Arc::new(FileStore::new(config.credentials_file.clone()))
}

/// Prompt answering with a fixed key and counting calls
#[derive(Clone)]
struct ScriptedPrompt {
    answer: String,
    calls: Arc<AtomicUsize>,
}

impl ScriptedPrompt {
    fn answering(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl KeyPrompt for ScriptedPrompt {
    fn prompt_api_key(&self, _mode: Mode) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer.clone())
    }
}

/// Refresh channel replaying observations; the last one repeats
struct ScriptedChannel {
    observations: VecDeque<Option<OAuthToken>>,
    last: Option<OAuthToken>,
    observes: usize,
    triggers: usize,
    shutdowns: usize,
}

impl ScriptedChannel {
    fn new(observations: Vec<Option<OAuthToken>>) -> Self {
        Self {
            observations: observations.into(),
            last: None,
            observes: 0,
            triggers: 0,
            shutdowns: 0,
        }
    }

    fn untouched() -> Self {
        Self::new(vec![])
    }
}

impl RefreshChannel for ScriptedChannel {
    fn trigger(&mut self) -> Result<()> {
        self.triggers += 1;
        Ok(())
    }

    fn observe(&mut self) -> Option<OAuthToken> {
        self.observes += 1;
        if let Some(next) = self.observations.pop_front() {
            self.last = next;
        }
        self.last.clone()
    }

    async fn shutdown(&mut self) {
        self.shutdowns += 1;
    }
}

// ==================================================================================================
// Credential resolution
// ==================================================================================================

#[tokio::test(start_paused = true)]
async fn test_valid_token_and_stored_key() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), Mode::Production);
    write_credentials(&config, &token("sk-ant-oat01", now_millis() + 3_600_000));
    ApiKeyStore::new(config.config_dir.clone())
        .set(Mode::Production, "pk-prod")
        .unwrap();

    let prompt = ScriptedPrompt::answering("unused");
    let launcher = launcher(config.clone(), file_store(&config), prompt.clone());
    let mut channel = ScriptedChannel::untouched();

    let plan = launcher.prepare(&mut channel).await.unwrap();

    assert_eq!(plan.program, "claude");
    assert_eq!(plan.args, vec!["--model", "opus"]);
    assert_eq!(plan.base_url, PRODUCTION_BASE_URL);
    assert_eq!(plan.auth_token, "sk-ant-oat01,pk-prod");
    assert_eq!(prompt.calls(), 0);
    assert_eq!(channel.triggers, 0);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_timeout_continues_without_oauth() {
    // Stored token expired a second ago and never changes
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), Mode::Production);
    let stale = token("stale", now_millis() - 1_000);
    write_credentials(&config, &stale);
    ApiKeyStore::new(config.config_dir.clone())
        .set(Mode::Production, "pk-prod")
        .unwrap();

    let launcher = launcher(
        config.clone(),
        file_store(&config),
        ScriptedPrompt::answering("unused"),
    );
    let mut channel = ScriptedChannel::new(vec![Some(stale)]);

    let plan = launcher.prepare(&mut channel).await.unwrap();

    assert_eq!(plan.auth_token, "pk-prod");
    assert_eq!(channel.triggers, 1);
    assert_eq!(channel.shutdowns, 1);
    // Baseline plus one read every 100ms for 10s
    assert_eq!(channel.observes, 101);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_success_uses_new_token() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), Mode::Production);
    let e0 = now_millis() - 1_000;
    let e1 = e0 + 3_600_000;
    write_credentials(&config, &token("old", e0));
    ApiKeyStore::new(config.config_dir.clone())
        .set(Mode::Production, "pk-prod")
        .unwrap();

    let launcher = launcher(
        config.clone(),
        file_store(&config),
        ScriptedPrompt::answering("unused"),
    );
    let mut channel = ScriptedChannel::new(vec![
        Some(token("old", e0)),
        Some(token("old", e0)),
        Some(token("old", e0)),
        Some(token("new", e1)),
    ]);

    let plan = launcher.prepare(&mut channel).await.unwrap();

    assert_eq!(plan.auth_token, "new,pk-prod");
    assert_eq!(channel.observes, 4);
    assert_eq!(channel.shutdowns, 1);
}

#[tokio::test(start_paused = true)]
async fn test_strict_mode_fails_on_refresh_timeout() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path(), Mode::Production);
    config.require_oauth = true;
    let stale = token("stale", now_millis() - 1_000);
    write_credentials(&config, &stale);

    let prompt = ScriptedPrompt::answering("pk-prod");
    let launcher = launcher(config.clone(), file_store(&config), prompt.clone());
    let mut channel = ScriptedChannel::new(vec![Some(stale)]);

    let err = launcher.prepare(&mut channel).await.unwrap_err();

    assert!(matches!(err, LaunchError::OAuthRequired(_)));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(channel.shutdowns, 1);
    // The launch stops before the key is even looked up
    assert_eq!(prompt.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_strict_mode_fails_without_credentials() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path(), Mode::Production);
    config.require_oauth = true;

    let launcher = launcher(
        config.clone(),
        file_store(&config),
        ScriptedPrompt::answering("pk-prod"),
    );
    let mut channel = ScriptedChannel::untouched();

    let err = launcher.prepare(&mut channel).await.unwrap_err();
    assert!(matches!(err, LaunchError::OAuthRequired(_)));
    assert_eq!(channel.triggers, 0);
}

#[tokio::test(start_paused = true)]
async fn test_strict_mode_does_not_continue_with_stored_key() {
    // Key already saved: permissive mode would launch with it alone
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path(), Mode::Production);
    config.require_oauth = true;
    config.claude_bin = "/opt/claude-nightly".to_string();
    let e0 = now_millis() - 60_000;
    write_credentials(&config, &token("stale", e0));
    ApiKeyStore::new(config.config_dir.clone())
        .set(Mode::Production, "pk-prod")
        .unwrap();

    let launcher = launcher(
        config.clone(),
        file_store(&config),
        ScriptedPrompt::answering("unused"),
    );
    // Expiry changes but the new token is already expired too
    let mut channel = ScriptedChannel::new(vec![
        Some(token("stale", e0)),
        Some(token("still-stale", e0 + 1_000)),
    ]);

    let err = launcher.prepare(&mut channel).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Claude Code OAuth credentials are required: OAuth token is still expired after refresh attempt"
    );
    assert_eq!(channel.triggers, 1);
    assert_eq!(channel.shutdowns, 1);

    // Same setup without the strict flag launches with the key alone
    config.require_oauth = false;
    let launcher = launcher_for(config.clone());
    let mut channel = ScriptedChannel::new(vec![
        Some(token("stale", e0)),
        Some(token("still-stale", e0 + 1_000)),
    ]);
    let plan = launcher.prepare(&mut channel).await.unwrap();
    assert_eq!(plan.auth_token, "pk-prod");
    assert_eq!(plan.program, "/opt/claude-nightly");
}

#[tokio::test(start_paused = true)]
async fn test_malformed_credentials_degrade_to_key_only() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), Mode::Production);
    std::fs::create_dir_all(config.credentials_file.parent().unwrap()).unwrap();
    std::fs::write(&config.credentials_file, "{\"claudeAiOauth\": 42}").unwrap();
    ApiKeyStore::new(config.config_dir.clone())
        .set(Mode::Production, "pk-prod")
        .unwrap();

    let launcher = launcher(
        config.clone(),
        file_store(&config),
        ScriptedPrompt::answering("unused"),
    );
    let mut channel = ScriptedChannel::untouched();

    let plan = launcher.prepare(&mut channel).await.unwrap();
    assert_eq!(plan.auth_token, "pk-prod");
    assert_eq!(channel.triggers, 0);
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_platform_uses_key_only() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), Mode::Production);
    ApiKeyStore::new(config.config_dir.clone())
        .set(Mode::Production, "pk-prod")
        .unwrap();

    let launcher = launcher(
        config,
        Arc::new(UnsupportedStore::new("haiku-os")),
        ScriptedPrompt::answering("unused"),
    );
    let mut channel = ScriptedChannel::untouched();

    let plan = launcher.prepare(&mut channel).await.unwrap();
    assert_eq!(plan.auth_token, "pk-prod");
    assert_eq!(plan.base_url, PRODUCTION_BASE_URL);
}

// ==================================================================================================
// API key resolution
// ==================================================================================================

#[tokio::test(start_paused = true)]
async fn test_first_run_local_mode_prompts_and_persists() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), Mode::Local);
    let prompt = ScriptedPrompt::answering("pk-local");

    let first = launcher(config.clone(), file_store(&config), prompt.clone());
    let plan = first
        .prepare(&mut ScriptedChannel::untouched())
        .await
        .unwrap();

    assert_eq!(plan.base_url, LOCAL_BASE_URL);
    assert_eq!(plan.auth_token, "pk-local");
    assert_eq!(prompt.calls(), 1);

    let saved: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(config.config_dir.join("config.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(saved["localPolychatApiKey"], "pk-local");
    assert!(saved.get("polychatApiKey").is_none());

    // Second run reads the stored key without prompting
    let second = launcher(config.clone(), file_store(&config), prompt.clone());
    let plan = second
        .prepare(&mut ScriptedChannel::untouched())
        .await
        .unwrap();
    assert_eq!(plan.auth_token, "pk-local");
    assert_eq!(prompt.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_local_key_does_not_satisfy_production() {
    let dir = TempDir::new().unwrap();
    let local = test_config(dir.path(), Mode::Local);
    ApiKeyStore::new(local.config_dir.clone())
        .set(Mode::Local, "pk-local")
        .unwrap();

    let config = test_config(dir.path(), Mode::Production);
    let prompt = ScriptedPrompt::answering("pk-prod");
    let launcher = launcher(config.clone(), file_store(&config), prompt.clone());

    let plan = launcher
        .prepare(&mut ScriptedChannel::untouched())
        .await
        .unwrap();
    assert_eq!(plan.auth_token, "pk-prod");
    assert_eq!(prompt.calls(), 1);
    assert_eq!(
        ApiKeyStore::new(config.config_dir).get(Mode::Local).as_deref(),
        Some("pk-local")
    );
}

#[tokio::test(start_paused = true)]
async fn test_empty_key_aborts() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), Mode::Production);
    write_credentials(&config, &token("sk-ant-oat01", now_millis() + 3_600_000));

    let launcher = launcher(
        config.clone(),
        file_store(&config),
        ScriptedPrompt::answering(""),
    );

    let err = launcher
        .prepare(&mut ScriptedChannel::untouched())
        .await
        .unwrap_err();
    assert!(matches!(err, LaunchError::MissingApiKey));
    assert_eq!(err.exit_code(), 1);
    assert!(!config.config_dir.join("config.json").exists());
}
