//! API key lookup for the Anthropic client

use kiln_core::{KilnError, Result};
use std::env;

const STANDARD_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Read the API key from `key_env`, falling back to `ANTHROPIC_API_KEY`
pub fn get_auth_token(key_env: &str) -> Result<String> {
    for name in [key_env, STANDARD_KEY_ENV] {
        match env::var(name) {
            Ok(key) if !key.trim().is_empty() => {
                tracing::debug!("Using API key from {}", name);
                return Ok(key);
            }
            _ => {}
        }
    }

    Err(KilnError::Auth(format!(
        "No API key found. Set {} (or {}), or run with --offline",
        key_env, STANDARD_KEY_ENV
    )))
}
