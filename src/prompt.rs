// Interactive API key prompt

use anyhow::{Context, Result};
use dialoguer::{Input, Password};
use std::process::{Command, Stdio};

use crate::config::Mode;

/// Page where production users obtain their key
pub const PRODUCTION_KEY_URL: &str = "https://polychat.co/auth?memtree=true";

/// Page where local development users obtain their key
pub const LOCAL_KEY_URL: &str = "http://local.polychat.co:5173/memtree-api";

/// Source of a fresh API key when none is stored
pub trait KeyPrompt {
    /// Ask the user for a key. An empty string means none was given.
    fn prompt_api_key(&self, mode: Mode) -> Result<String>;
}

pub fn key_url(mode: Mode) -> &'static str {
    match mode {
        Mode::Production => PRODUCTION_KEY_URL,
        Mode::Local => LOCAL_KEY_URL,
    }
}

/// Opens the key page in a browser and reads the pasted key from the terminal
#[derive(Debug, Default, Clone, Copy)]
pub struct BrowserPrompt;

impl KeyPrompt for BrowserPrompt {
    fn prompt_api_key(&self, mode: Mode) -> Result<String> {
        println!();
        let _: String = Input::<String>::new()
            .with_prompt("Press Enter to open your browser to obtain your Memtree API key...")
            .allow_empty(true)
            .interact_text()
            .context("Failed to read confirmation")?;

        let url = key_url(mode);
        if let Err(e) = open_url(url) {
            tracing::warn!("Could not open browser: {:#}", e);
            println!("Open this page to get your key: {}", url);
        }

        let key = Password::new()
            .with_prompt("Copy your API key and paste it here")
            .allow_empty_password(true)
            .interact()
            .context("Failed to read API key")?;

        Ok(key.trim().to_string())
    }
}

/// Command that opens a URL with the desktop's default handler
fn opener_command(os: &str, url: &str) -> Command {
    let mut cmd = match os {
        "macos" => Command::new("open"),
        "windows" => Command::new("explorer"),
        _ => Command::new("xdg-open"),
    };
    cmd.arg(url);
    cmd
}

fn open_url(url: &str) -> Result<()> {
    let mut cmd = opener_command(std::env::consts::OS, url);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("Failed to open {}", url))?;
    Ok(())
}
