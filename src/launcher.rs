// Session launcher
// Resolves both secrets and starts Claude Code against the Polychat proxy

use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use tokio::process::Command;

use crate::auth::{
    platform_store, CredentialBroker, CredentialStore, OAuthResolution, OAuthToken,
    ProcessRefreshChannel, RefreshChannel,
};
use crate::config::{Config, Mode};
use crate::error::{LaunchError, Result};
use crate::prompt::{BrowserPrompt, KeyPrompt};
use crate::secrets::ApiKeyStore;

/// Polychat proxy endpoint
pub const PRODUCTION_BASE_URL: &str = "https://polychat.co/cc";

/// Proxy endpoint for local development
pub const LOCAL_BASE_URL: &str = "http://localhost:8080/cc";

/// Endpoint variable read by Claude Code
pub const BASE_URL_VAR: &str = "ANTHROPIC_BASE_URL";

/// Bearer token variable read by Claude Code
pub const AUTH_TOKEN_VAR: &str = "ANTHROPIC_AUTH_TOKEN";

pub fn base_url(mode: Mode) -> &'static str {
    match mode {
        Mode::Production => PRODUCTION_BASE_URL,
        Mode::Local => LOCAL_BASE_URL,
    }
}

/// Bearer value: `<oauth access token>,<api key>`, or the key alone
pub fn composite_token(oauth: Option<&OAuthToken>, api_key: &str) -> String {
    match oauth {
        Some(token) => format!("{},{}", token.access_token, api_key),
        None => api_key.to_string(),
    }
}

/// Turn the broker's findings into the token to use, honoring `require_oauth`
///
/// Only the permissive path prints the "continuing without OAuth" notice.
pub fn apply_oauth_policy(
    resolution: OAuthResolution,
    require_oauth: bool,
    program: &str,
) -> Result<Option<OAuthToken>> {
    let notice = degrade_notice(&resolution);
    let reason = match resolution {
        OAuthResolution::Valid(token) | OAuthResolution::Refreshed(token) => {
            return Ok(Some(token));
        }
        OAuthResolution::Missing => "no Claude Code OAuth credentials found".to_string(),
        OAuthResolution::RefreshFailed(outcome) => outcome.describe(),
    };

    if require_oauth {
        eprintln!("{}", login_hint(program));
        return Err(LaunchError::OAuthRequired(reason));
    }

    tracing::info!("Continuing without OAuth: {}", reason);
    if let Some(notice) = notice {
        println!("{}", notice);
    }
    Ok(None)
}

fn login_hint(program: &str) -> String {
    format!(
        "Run '{}' and use '/login' to sign in with your Anthropic subscription.",
        program
    )
}

/// Stored API key for `mode`, prompting for and saving one if absent
pub fn resolve_api_key(store: &ApiKeyStore, prompt: &dyn KeyPrompt, mode: Mode) -> Result<String> {
    if let Some(key) = store.get(mode) {
        return Ok(key);
    }

    let key = prompt
        .prompt_api_key(mode)
        .map_err(LaunchError::KeyPrompt)?;
    if key.is_empty() {
        return Err(LaunchError::MissingApiKey);
    }

    store.set(mode, &key).map_err(LaunchError::KeyStore)?;
    println!("API key saved.\n");

    Ok(key)
}

/// Everything needed to start the target program
#[derive(Clone, PartialEq)]
pub struct LaunchPlan {
    pub program: String,
    pub args: Vec<String>,
    pub base_url: String,
    pub auth_token: String,
}

impl fmt::Debug for LaunchPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchPlan")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("base_url", &self.base_url)
            .field("auth_token_len", &self.auth_token.len())
            .finish()
    }
}

impl LaunchPlan {
    /// Variables added to the inherited environment
    pub fn env(&self) -> [(&'static str, &str); 2] {
        [
            (BASE_URL_VAR, self.base_url.as_str()),
            (AUTH_TOKEN_VAR, self.auth_token.as_str()),
        ]
    }

    /// Run the target with inherited stdio and return its exit code
    pub async fn spawn(&self) -> Result<i32> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.env())
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        tracing::debug!(pid = ?child.id(), "Started {}", self.program);

        let status = child.wait().await.map_err(|source| LaunchError::Launch {
            program: self.program.clone(),
            source,
        })?;

        tracing::debug!(%status, "{} exited", self.program);
        Ok(exit_code(status))
    }

    fn spawn_error(&self, e: std::io::Error) -> LaunchError {
        if e.kind() == std::io::ErrorKind::NotFound {
            LaunchError::TargetNotFound(self.program.clone())
        } else {
            LaunchError::Launch {
                program: self.program.clone(),
                source: e,
            }
        }
    }
}

/// Exit code of the target; signal deaths map to 128 + signal
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}

/// Resolves credentials and launches Claude Code
pub struct SessionLauncher {
    config: Config,
    store: Arc<dyn CredentialStore>,
    keys: ApiKeyStore,
    prompt: Box<dyn KeyPrompt>,
}

impl SessionLauncher {
    /// Launcher using the platform credential store and the terminal prompt
    pub fn new(config: Config) -> Self {
        let store: Arc<dyn CredentialStore> =
            Arc::from(platform_store(std::env::consts::OS, &config.store_location()));
        let keys = ApiKeyStore::new(config.config_dir.clone());
        Self::with_parts(config, store, keys, Box::new(BrowserPrompt))
    }

    pub fn with_parts(
        config: Config,
        store: Arc<dyn CredentialStore>,
        keys: ApiKeyStore,
        prompt: Box<dyn KeyPrompt>,
    ) -> Self {
        Self {
            config,
            store,
            keys,
            prompt,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Resolve credentials and build the launch plan
    ///
    /// The OAuth token is resolved first (refreshing through `channel` if
    /// expired), then the API key. Nothing is launched.
    pub async fn prepare<C: RefreshChannel>(&self, channel: &mut C) -> Result<LaunchPlan> {
        let broker = CredentialBroker::new(self.store.clone(), self.config.orchestrator())
            .with_program(self.config.claude_bin.clone())
            .with_debug(self.config.debug)
            .with_force_refresh(self.config.force_refresh);

        let resolution = broker.resolve(channel).await;
        let oauth = apply_oauth_policy(
            resolution,
            self.config.require_oauth,
            &self.config.claude_bin,
        )?;
        let api_key = resolve_api_key(&self.keys, self.prompt.as_ref(), self.config.mode)?;

        Ok(LaunchPlan {
            program: self.config.claude_bin.clone(),
            args: self.config.claude_args.clone(),
            base_url: base_url(self.config.mode).to_string(),
            auth_token: composite_token(oauth.as_ref(), &api_key),
        })
    }

    /// Resolve credentials, launch Claude Code, and return its exit code
    pub async fn run(&self) -> Result<i32> {
        let mut channel = ProcessRefreshChannel::new(self.store.clone(), self.config.claude_bin.clone());
        let plan = self.prepare(&mut channel).await?;

        tracing::debug!(?plan, "Launching");
        forward_interrupts();
        plan.spawn().await
    }
}

/// Warning shown when the launch goes ahead with the API key alone
fn degrade_notice(resolution: &OAuthResolution) -> Option<String> {
    let headline = match resolution {
        OAuthResolution::Missing => "No Claude Code OAuth credentials found.",
        OAuthResolution::RefreshFailed(_) => "Could not refresh OAuth token. Continuing without it.",
        OAuthResolution::Valid(_) | OAuthResolution::Refreshed(_) => return None,
    };

    let mut notice = format!("\x1b[1;33m⚠️  {}\x1b[0m\n", headline);
    notice.push_str("\x1b[33m   Claude Code is much cheaper with an Anthropic subscription.\x1b[0m\n");
    notice.push_str(
        "\x1b[33m   MemTree.dev makes it even cheaper by reducing messages sent to Anthropic.\x1b[0m\n",
    );
    if matches!(resolution, OAuthResolution::Missing) {
        notice.push_str("\x1b[33m   Run '/login' to log in and get discounted rates.\x1b[0m\n");
    }
    Some(notice)
}

/// Leave Ctrl+C to the child: the launcher keeps waiting instead of dying
fn forward_interrupts() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::interrupt()) {
            Ok(mut interrupts) => {
                tokio::spawn(async move { while interrupts.recv().await.is_some() {} });
            }
            Err(e) => tracing::debug!("Failed to install interrupt handler: {}", e),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async {
            while tokio::signal::ctrl_c().await.is_ok() {}
        });
    }
}
