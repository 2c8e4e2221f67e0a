use anyhow::Result;
use std::env;
use std::str::FromStr;

use crate::services::Provider;

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub static_dir: String,
    pub default_provider: Provider,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub openai_model: String,
    pub anthropic_model: String,
    pub openai_base_url: String,
    pub anthropic_base_url: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub request_timeout_secs: u64,
    pub max_images: usize,
    pub max_image_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            static_dir: "static".to_string(),
            default_provider: Provider::OpenAi,
            openai_api_key: None,
            anthropic_api_key: None,
            openai_model: DEFAULT_OPENAI_MODEL.to_string(),
            anthropic_model: DEFAULT_ANTHROPIC_MODEL.to_string(),
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            anthropic_base_url: DEFAULT_ANTHROPIC_BASE_URL.to_string(),
            max_tokens: 2048,
            temperature: None,
            request_timeout_secs: 120,
            max_images: 5,
            max_image_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Load configuration from the process environment (after `.env` has been applied).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary lookup, so tests don't touch the real environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        // Empty values count as unset
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let default_provider = match get("VISION_PROVIDER") {
            Some(p) => parse_value::<Provider>("VISION_PROVIDER", &p)?,
            None => defaults.default_provider,
        };

        let temperature = match get("VISION_TEMPERATURE") {
            Some(t) => Some(parse_value::<f32>("VISION_TEMPERATURE", &t)?),
            None => None,
        };

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
            static_dir: get("STATIC_DIR").unwrap_or(defaults.static_dir),
            default_provider,
            openai_api_key: get("OPENAI_API_KEY"),
            anthropic_api_key: get("ANTHROPIC_API_KEY"),
            openai_model: get("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            anthropic_model: get("ANTHROPIC_MODEL").unwrap_or(defaults.anthropic_model),
            openai_base_url: get("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            anthropic_base_url: get("ANTHROPIC_BASE_URL").unwrap_or(defaults.anthropic_base_url),
            max_tokens: get_parsed(&get, "VISION_MAX_TOKENS", defaults.max_tokens)?,
            temperature,
            request_timeout_secs: get_parsed(&get, "REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs)?,
            max_images: get_parsed(&get, "MAX_IMAGES", defaults.max_images)?,
            max_image_bytes: get_parsed(&get, "MAX_IMAGE_BYTES", defaults.max_image_bytes)?,
        })
    }

    /// Server-side API key for a provider, if one was configured.
    pub fn api_key_for(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::OpenAi => self.openai_api_key.as_deref(),
            Provider::Claude => self.anthropic_api_key.as_deref(),
        }
    }

    pub fn model_for(&self, provider: Provider) -> &str {
        match provider {
            Provider::OpenAi => &self.openai_model,
            Provider::Claude => &self.anthropic_model,
        }
    }

    pub fn base_url_for(&self, provider: Provider) -> &str {
        match provider {
            Provider::OpenAi => &self.openai_base_url,
            Provider::Claude => &self.anthropic_base_url,
        }
    }

    /// Largest request body the upload endpoints accept.
    pub fn body_limit(&self) -> usize {
        self.max_images
            .saturating_mul(self.max_image_bytes)
            .saturating_add(1024 * 1024)
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| anyhow::anyhow!("Invalid value for {}: '{}' ({})", key, raw, e))
}

fn get_parsed<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

/// Mask an API key for log output: keeps the first four characters only.
pub fn mask_key(key: &str) -> String {
    let prefix: String = key.chars().take(4).collect();
    format!("{}…", prefix)
}
