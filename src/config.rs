use anyhow::{Context, Result};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::{
    current_username, RefreshOrchestrator, StoreLocation, DEFAULT_CREDENTIALS_FILE,
    DEFAULT_KEYCHAIN_SERVICE,
};

/// Static key directory relative to the home directory
pub const DEFAULT_CONFIG_DIR: &str = ".claude-code-infinite";

/// Positional argument selecting local mode
const LOCAL_MODE_ARG: &str = "local";

/// Flag enabling diagnostics; never forwarded to the target
const DEBUG_FLAG: &str = "--debug";

/// Environment-backed settings
///
/// Command-line arguments belong to the launched program, so these are only
/// ever read from the environment (or a `.env` file).
#[derive(Parser, Debug)]
#[command(about = "Launch Claude Code through Polychat", long_about = None)]
pub struct Settings {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    /// Abort when no valid OAuth token can be obtained
    #[arg(long, env = "CCI_REQUIRE_OAUTH", action = ArgAction::SetTrue, value_parser = BoolishValueParser::new())]
    pub require_oauth: bool,

    /// Refresh the OAuth token even if it has not expired
    #[arg(long, env = "DEBUG_FORCE_EXPIRED", action = ArgAction::SetTrue, value_parser = BoolishValueParser::new())]
    pub force_refresh: bool,

    /// Program to launch (also used to refresh the OAuth token)
    #[arg(long, env = "CCI_CLAUDE_BIN", default_value = "claude")]
    pub claude_bin: String,

    /// Delay between credential store reads during refresh (ms)
    #[arg(long, env = "CCI_REFRESH_POLL_MS", default_value = "100")]
    pub refresh_poll_ms: u64,

    /// Maximum time to wait for a refreshed token (ms)
    #[arg(long, env = "CCI_REFRESH_TIMEOUT_MS", default_value = "10000")]
    pub refresh_timeout_ms: u64,

    /// Claude Code credentials file (non-macOS)
    #[arg(long, env = "CCI_CREDENTIALS_FILE")]
    pub credentials_file: Option<String>,

    /// Directory holding config.json with the Polychat API keys
    #[arg(long, env = "CCI_CONFIG_DIR")]
    pub config_dir: Option<String>,

    /// Keychain service holding Claude Code credentials (macOS)
    #[arg(long, env = "CCI_KEYCHAIN_SERVICE", default_value = DEFAULT_KEYCHAIN_SERVICE)]
    pub keychain_service: String,
}

/// Deployment mode
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Production,
    Local,
}

/// Launcher arguments after splitting out our own
#[derive(Clone, Debug, PartialEq)]
pub struct CliArgs {
    pub debug: bool,
    pub mode: Mode,
    pub passthrough: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub mode: Mode,
    pub debug: bool,
    pub log_level: String,

    // OAuth policy
    pub require_oauth: bool,
    pub force_refresh: bool,

    // Target program
    pub claude_bin: String,
    pub claude_args: Vec<String>,

    // Refresh timing
    pub refresh_poll_interval: Duration,
    pub refresh_timeout: Duration,

    // Store locations
    pub credentials_file: PathBuf,
    pub config_dir: PathBuf,
    pub keychain_service: String,
    pub keychain_account: String,
}

impl Config {
    /// Load configuration from the process arguments and environment
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let cli = split_args(std::env::args().skip(1));
        let settings = Settings::try_parse_from([env!("CARGO_PKG_NAME")])
            .context("Invalid environment configuration")?;

        Self::from_parts(cli, settings)
    }

    /// Combine split arguments with settings, resolving default paths
    pub fn from_parts(cli: CliArgs, settings: Settings) -> Result<Self> {
        let credentials_file = match settings.credentials_file {
            Some(path) => expand_tilde(&path),
            None => home_dir()?.join(DEFAULT_CREDENTIALS_FILE),
        };

        let config_dir = match settings.config_dir {
            Some(path) => expand_tilde(&path),
            None => home_dir()?.join(DEFAULT_CONFIG_DIR),
        };

        // --debug wins over LOG_LEVEL
        let log_level = if cli.debug {
            "debug".to_string()
        } else {
            settings.log_level
        };

        Ok(Config {
            mode: cli.mode,
            debug: cli.debug,
            log_level,
            require_oauth: settings.require_oauth,
            force_refresh: settings.force_refresh,
            claude_bin: settings.claude_bin,
            claude_args: cli.passthrough,
            refresh_poll_interval: Duration::from_millis(settings.refresh_poll_ms),
            refresh_timeout: Duration::from_millis(settings.refresh_timeout_ms),
            credentials_file,
            config_dir,
            keychain_service: settings.keychain_service,
            keychain_account: current_username(),
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.refresh_poll_interval.is_zero() {
            anyhow::bail!("CCI_REFRESH_POLL_MS must be greater than zero");
        }

        if self.refresh_timeout < self.refresh_poll_interval {
            anyhow::bail!(
                "CCI_REFRESH_TIMEOUT_MS ({}) must be at least CCI_REFRESH_POLL_MS ({})",
                self.refresh_timeout.as_millis(),
                self.refresh_poll_interval.as_millis()
            );
        }

        if self.claude_bin.trim().is_empty() {
            anyhow::bail!("CCI_CLAUDE_BIN cannot be empty");
        }

        Ok(())
    }

    pub fn store_location(&self) -> StoreLocation {
        StoreLocation {
            keychain_service: self.keychain_service.clone(),
            keychain_account: self.keychain_account.clone(),
            credentials_file: self.credentials_file.clone(),
        }
    }

    pub fn orchestrator(&self) -> RefreshOrchestrator {
        RefreshOrchestrator::new(self.refresh_poll_interval, self.refresh_timeout)
            .with_debug(self.debug)
    }
}

/// Split launcher arguments from the ones forwarded to the target.
///
/// `--debug` is removed wherever it appears; a leading `local` selects local
/// mode. Everything else is forwarded in order.
pub fn split_args<I>(args: I) -> CliArgs
where
    I: IntoIterator<Item = String>,
{
    let mut debug = false;
    let mut rest = Vec::new();

    for arg in args {
        if arg == DEBUG_FLAG {
            debug = true;
        } else {
            rest.push(arg);
        }
    }

    let mode = if rest.first().map(String::as_str) == Some(LOCAL_MODE_ARG) {
        rest.remove(0);
        Mode::Local
    } else {
        Mode::Production
    };

    CliArgs {
        debug,
        mode,
        passthrough: rest,
    }
}

fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("Could not determine home directory")
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
