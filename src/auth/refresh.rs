// Token refresh orchestration
//
// There is no refresh endpoint we can call directly. Instead the
// authenticating program is started, which refreshes its own token and
// writes it back to the credential store, and we watch the store for the
// new token.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::{Child, Command};

use super::credentials::CredentialStore;
use super::expiry::check_expired;
use super::types::OAuthToken;

/// Delay between credential store reads
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Ceiling on the whole polling phase
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_millis(10_000);

/// How long the refresh process gets to exit after SIGTERM
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Out-of-process refresh trigger plus a way to observe its effect
#[allow(async_fn_in_trait)]
pub trait RefreshChannel {
    /// Start the refresh. Must not wait for it to finish.
    fn trigger(&mut self) -> Result<()>;

    /// Current token as seen in the store
    fn observe(&mut self) -> Option<OAuthToken>;

    /// Stop whatever `trigger` started and wait for it to be gone
    async fn shutdown(&mut self);
}

/// Call `check` every `interval` until it yields a value or `ceiling` elapses.
///
/// Sleeps before each check. Returns the value and the elapsed time at which
/// it was produced.
pub async fn poll_until<T, F>(interval: Duration, ceiling: Duration, mut check: F) -> Option<(T, Duration)>
where
    F: FnMut() -> Option<T>,
{
    let mut elapsed = Duration::ZERO;

    while elapsed < ceiling {
        tokio::time::sleep(interval).await;
        elapsed += interval;

        if let Some(value) = check() {
            return Some((value, elapsed));
        }
    }

    None
}

/// Result of a single refresh attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// A new, valid token appeared
    Success(OAuthToken),

    /// A new token appeared but is already expired
    StillExpired(OAuthToken),

    /// The store never changed before the ceiling
    TimedOut,

    /// The authenticating program could not be started
    TriggerFailed(String),
}

impl RefreshOutcome {
    pub fn into_token(self) -> Option<OAuthToken> {
        match self {
            RefreshOutcome::Success(token) => Some(token),
            _ => None,
        }
    }

    /// Short reason for log and error messages
    pub fn describe(&self) -> String {
        match self {
            RefreshOutcome::Success(_) => "OAuth token refreshed".to_string(),
            RefreshOutcome::StillExpired(_) => {
                "OAuth token is still expired after refresh attempt".to_string()
            }
            RefreshOutcome::TimedOut => "OAuth token refresh timed out".to_string(),
            RefreshOutcome::TriggerFailed(reason) => {
                format!("OAuth token refresh could not start: {}", reason)
            }
        }
    }
}

/// Runs one bounded spawn-and-poll refresh cycle
#[derive(Debug, Clone)]
pub struct RefreshOrchestrator {
    poll_interval: Duration,
    timeout: Duration,
    debug: bool,
}

impl Default for RefreshOrchestrator {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_REFRESH_TIMEOUT)
    }
}

impl RefreshOrchestrator {
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval,
            timeout,
            debug: false,
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Refresh through `channel`. Exactly one trigger per call.
    ///
    /// A refresh is recognised by `expires_at` differing from the value seen
    /// before the trigger. A refresh that produces an identical expiry is
    /// indistinguishable from no refresh and ends in `TimedOut`.
    pub async fn refresh<C: RefreshChannel>(&self, channel: &mut C) -> RefreshOutcome {
        // Snapshot before the trigger so a fast refresh is not missed
        let baseline = channel.observe().map(|t| t.expires_at).unwrap_or(0);
        tracing::debug!(baseline, "Spawning refresh process");

        if let Err(e) = channel.trigger() {
            tracing::error!("Failed to start token refresh: {:#}", e);
            channel.shutdown().await;
            return RefreshOutcome::TriggerFailed(format!("{:#}", e));
        }

        let found = poll_until(self.poll_interval, self.timeout, || {
            channel
                .observe()
                .filter(|token| token.expires_at != baseline)
        })
        .await;

        tracing::debug!("Stopping refresh process");
        channel.shutdown().await;
        tracing::debug!("Refresh process terminated");

        let Some((token, elapsed)) = found else {
            tracing::warn!(
                timeout_ms = self.timeout.as_millis() as u64,
                "OAuth token refresh timed out"
            );
            return RefreshOutcome::TimedOut;
        };

        tracing::debug!(elapsed_ms = elapsed.as_millis() as u64, "Token changed");

        if check_expired(&token, self.debug) {
            tracing::warn!(
                expires_at = token.expires_at,
                "OAuth token is still expired after refresh attempt"
            );
            return RefreshOutcome::StillExpired(token);
        }

        RefreshOutcome::Success(token)
    }
}

/// Refresh channel that spawns the authenticating program and reads the
/// credential store
pub struct ProcessRefreshChannel {
    store: Arc<dyn CredentialStore>,
    program: String,
    args: Vec<String>,
    grace: Duration,
    child: Option<Child>,
}

impl ProcessRefreshChannel {
    pub fn new(store: Arc<dyn CredentialStore>, program: impl Into<String>) -> Self {
        Self {
            store,
            program: program.into(),
            args: Vec::new(),
            grace: DEFAULT_SHUTDOWN_GRACE,
            child: None,
        }
    }

    /// Extra arguments for the spawned program (none by default)
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Whether a spawned process is still being supervised
    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }
}

impl RefreshChannel for ProcessRefreshChannel {
    fn trigger(&mut self) -> Result<()> {
        // Inherit the terminal so any re-login UI is visible
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn '{}'", self.program))?;

        tracing::debug!(pid = ?child.id(), program = %self.program, "Refresh process started");
        self.child = Some(child);
        Ok(())
    }

    fn observe(&mut self) -> Option<OAuthToken> {
        // Polled every interval, so failures stay at debug
        match self.store.fetch(false) {
            Ok(record) => record.into_token(),
            Err(e) => {
                tracing::debug!("Credential poll: {}", e);
                None
            }
        }
    }

    async fn shutdown(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        send_terminate(&mut child);

        match tokio::time::timeout(self.grace, child.wait()).await {
            Ok(Ok(status)) => tracing::debug!(%status, "Refresh process exited"),
            Ok(Err(e)) => tracing::debug!("Waiting for refresh process failed: {}", e),
            Err(_) => {
                tracing::warn!(
                    "Refresh process did not exit within {:?}, killing",
                    self.grace
                );
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        }
    }
}

/// SIGTERM the child. Already-exited children are fine.
#[cfg(unix)]
fn send_terminate(child: &mut Child) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) else {
        return;
    };

    if let Err(e) = signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
        tracing::debug!("SIGTERM to {} failed: {}", pid, e);
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        tracing::debug!("Terminating refresh process failed: {}", e);
    }
}
