// Error handling module
// Hard failures that stop the launch, and their exit codes

use thiserror::Error;

/// Errors that abort the launch before or while starting the target program
#[derive(Error, Debug)]
pub enum LaunchError {
    /// No API key stored and none entered
    #[error("POLYCHAT_API_KEY is required.")]
    MissingApiKey,

    /// The key prompt could not be shown or read
    #[error("Could not read API key: {0:#}")]
    KeyPrompt(#[source] anyhow::Error),

    /// The entered key could not be persisted
    #[error("Could not save API key: {0:#}")]
    KeyStore(#[source] anyhow::Error),

    /// OAuth is mandatory and no valid token is available
    #[error("Claude Code OAuth credentials are required: {0}")]
    OAuthRequired(String),

    /// Target executable does not exist
    #[error("Could not find '{0}' command. Make sure Claude Code is installed.")]
    TargetNotFound(String),

    /// Target exists but could not be started or awaited
    #[error("Failed to start {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl LaunchError {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// Result type alias for launch operations
pub type Result<T> = std::result::Result<T, LaunchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            LaunchError::MissingApiKey.to_string(),
            "POLYCHAT_API_KEY is required."
        );

        let err = LaunchError::TargetNotFound("claude".to_string());
        assert_eq!(
            err.to_string(),
            "Could not find 'claude' command. Make sure Claude Code is installed."
        );

        let err = LaunchError::OAuthRequired("OAuth token refresh timed out".to_string());
        assert_eq!(
            err.to_string(),
            "Claude Code OAuth credentials are required: OAuth token refresh timed out"
        );
    }

    #[test]
    fn test_launch_error_message_is_distinct_from_not_found() {
        let err = LaunchError::Launch {
            program: "claude".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "Permission denied"),
        };
        assert_eq!(err.to_string(), "Failed to start claude: Permission denied");
        assert!(!err.to_string().contains("Could not find"));
    }

    #[test]
    fn test_key_errors_include_context() {
        let err = LaunchError::KeyStore(
            anyhow::anyhow!("disk full").context("Failed to write /home/u/config.json"),
        );
        assert_eq!(
            err.to_string(),
            "Could not save API key: Failed to write /home/u/config.json: disk full"
        );

        let err = LaunchError::KeyPrompt(anyhow::anyhow!("not a terminal"));
        assert_eq!(err.to_string(), "Could not read API key: not a terminal");
    }

    #[test]
    fn test_all_failures_exit_with_one() {
        let errors = [
            LaunchError::MissingApiKey,
            LaunchError::KeyPrompt(anyhow::anyhow!("x")),
            LaunchError::KeyStore(anyhow::anyhow!("x")),
            LaunchError::OAuthRequired("x".to_string()),
            LaunchError::TargetNotFound("claude".to_string()),
        ];
        for err in errors {
            assert_eq!(err.exit_code(), 1, "{err}");
        }
    }
}
