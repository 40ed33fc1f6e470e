use anyhow::Result;

use claude_code_infinite::config::{self, Mode};
use claude_code_infinite::launcher::SessionLauncher;

// One launcher per invocation, no worker threads needed
#[tokio::main(flavor = "current_thread")]
async fn main() {
    let code = match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{:#}", e);
            1
        }
    };

    std::process::exit(code);
}

async fn run() -> Result<i32> {
    let config = config::Config::load()?;
    config.validate()?;

    // Initialize logging with the configured level
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    print_startup_banner(&config);

    tracing::debug!(
        mode = ?config.mode,
        require_oauth = config.require_oauth,
        force_refresh = config.force_refresh,
        credentials_file = %config.credentials_file.display(),
        config_dir = %config.config_dir.display(),
        "Configuration loaded"
    );

    let launcher = SessionLauncher::new(config);
    match launcher.run().await {
        Ok(code) => Ok(code),
        Err(e) => {
            eprintln!("{}", e);
            Ok(e.exit_code())
        }
    }
}

/// Print startup banner
fn print_startup_banner(config: &config::Config) {
    println!(
        "\n\x1b[1;38;5;209mClaude Code Infinite:\x1b[0m \x1b[38;5;48mMaximizing Claude's intelligence with context-management from \x1b]8;;https://MemTree.dev\x1b\\MemTree.dev\x1b]8;;\x1b\\\x1b[0m\n"
    );

    if config.debug {
        println!("\x1b[1;36m🔍 DEBUG MODE\x1b[0m\n");
    }

    if config.mode == Mode::Local {
        println!("\x1b[1;33m🏠 LOCAL MODE\x1b[0m\n");
    }
}
