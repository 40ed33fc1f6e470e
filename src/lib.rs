// Claude Code Infinite - Library root for testing

pub mod auth;
pub mod config;
pub mod error;
pub mod launcher;
pub mod prompt;
pub mod secrets;
