use std::{env, fmt::Display, fs::read_to_string, str::FromStr};

use anyhow::{Context, Result};
use tracing::{info, warn};

pub const DEFAULT_USER_ID: &str = "67c3cf1766f888d598955e90";

pub struct Config {
    pub port: u16,
    pub redis_url: String,
    pub gemini_url: String,
    pub gemini_model: String,
    pub gemini_key: Option<String>,
    pub demo_user_id: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        Ok(Self {
            port: try_load("RUST_PORT", "8000")?,
            redis_url: try_load("REDIS_URL", "redis://127.0.0.1:6379")?,
            gemini_url: try_load(
                "GEMINI_URL",
                "https://generativelanguage.googleapis.com/v1beta",
            )?,
            gemini_model: try_load("GEMINI_MODEL", "gemini-1.5-pro")?,
            gemini_key: read_secret("GEMINI_API_KEY"),
            demo_user_id: try_load("DEMO_USER_ID", DEFAULT_USER_ID)?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            gemini_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            gemini_model: "gemini-1.5-pro".to_string(),
            gemini_key: None,
            demo_user_id: DEFAULT_USER_ID.to_string(),
        }
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    let raw = var(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.parse()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("Invalid {key} value: {raw}"))
}

/// Docker secret first, then the plain environment variable.
fn read_secret(secret_name: &str) -> Option<String> {
    let path = format!("/run/secrets/{secret_name}");

    match read_to_string(&path) {
        Ok(secret) => Some(secret.trim().to_string()),
        Err(e) => {
            let fallback = var(secret_name).filter(|value| !value.trim().is_empty());

            if fallback.is_none() {
                warn!("Failed to read {secret_name} from file or environment: {e}");
            }

            fallback
        }
    }
}
