//! Client transport settings.
//!
//! Defaults, then `client.toml` (flat string map), then `APP__*` env
//! overrides, highest priority last.

use std::{collections::HashMap, env, fs};

use anyhow::{anyhow, Result};

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_url: String,
    pub ws_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8080".into(),
            ws_url: None,
        }
    }
}

impl Settings {
    /// The push channel URL: the configured `ws_url`, or the api URL with
    /// its scheme rewritten to ws(s) and `/ws` appended.
    pub fn push_url(&self) -> Result<String> {
        if let Some(ws_url) = &self.ws_url {
            return Ok(ws_url.clone());
        }
        websocket_url(&self.api_url)
    }
}

/// Derives a websocket URL from an http(s) base URL.
pub fn websocket_url(api_url: &str) -> Result<String> {
    let base = if api_url.starts_with("https://") {
        api_url.replacen("https://", "wss://", 1)
    } else if api_url.starts_with("http://") {
        api_url.replacen("http://", "ws://", 1)
    } else {
        return Err(anyhow!("api url must start with http:// or https://"));
    };
    Ok(format!("{}/ws", base.trim_end_matches('/')))
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("client.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("api_url") {
                settings.api_url = v.clone();
            }
            if let Some(v) = file_cfg.get("ws_url") {
                settings.ws_url = Some(v.clone());
            }
        }
    }

    if let Ok(v) = env::var("APP__API_URL") {
        settings.api_url = v;
    }
    if let Ok(v) = env::var("APP__WS_URL") {
        settings.ws_url = Some(v);
    }

    settings
}
