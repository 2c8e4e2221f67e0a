use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{mask_key, Config};
use crate::models::ImageUpload;
use crate::services::{ClaudeService, OpenAIService};

/// Hosted vision model the analysis is delegated to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Claude,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::OpenAi, Provider::Claude];

    pub fn id(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Claude => "claude",
        }
    }

    /// Human-readable label for selectors.
    pub fn label(&self) -> &'static str {
        match self {
            Provider::OpenAi => "GPT-4o (OpenAI) - Recommended",
            Provider::Claude => "Claude (Anthropic)",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" | "gpt" | "gpt-4o" => Ok(Provider::OpenAi),
            "claude" | "anthropic" => Ok(Provider::Claude),
            other => Err(format!("unknown provider '{}' (expected 'openai' or 'claude')", other)),
        }
    }
}

/// How a provider failure should be presented to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    InvalidApiKey,
    InsufficientCredits,
    Other,
}

#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("{provider} API error ({status}): {body}")]
    Api {
        provider: Provider,
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("{0} returned an empty response")]
    EmptyResponse(Provider),
    #[error("API key is missing")]
    MissingApiKey,
}

impl VisionError {
    pub fn kind(&self) -> FailureKind {
        match self {
            VisionError::MissingApiKey => FailureKind::InvalidApiKey,
            VisionError::Api { status, body, .. } => {
                let body = body.to_lowercase();
                if status.as_u16() == 402
                    || body.contains("credit")
                    || body.contains("balance")
                    || body.contains("insufficient_quota")
                {
                    FailureKind::InsufficientCredits
                } else if status.as_u16() == 401
                    || status.as_u16() == 403
                    || body.contains("invalid_api_key")
                    || body.contains("invalid x-api-key")
                {
                    FailureKind::InvalidApiKey
                } else {
                    FailureKind::Other
                }
            }
            VisionError::EmptyResponse(_) => FailureKind::Other,
        }
    }

    /// Failures that would repeat for every image of the batch.
    pub fn is_fatal(&self) -> bool {
        self.kind() != FailureKind::Other
    }
}

/// Classify any error coming out of a provider call.
pub fn failure_kind(err: &anyhow::Error) -> FailureKind {
    match err.downcast_ref::<VisionError>() {
        Some(vision_err) => vision_err.kind(),
        None => FailureKind::Other,
    }
}

pub fn is_fatal(err: &anyhow::Error) -> bool {
    failure_kind(err) != FailureKind::Other
}

/// Trait for vision-capable LLM providers (OpenAI, Claude)
#[async_trait::async_trait]
pub trait VisionService: Send + Sync {
    fn provider(&self) -> Provider;
    fn model(&self) -> &str;

    /// Send one image with a prompt and return the model's raw text reply.
    async fn analyze_image(&self, image: &ImageUpload, prompt: &str) -> Result<String> {
        self.analyze_images(std::slice::from_ref(image), prompt).await
    }

    /// Send several images in one request, in order, and return the raw text reply.
    async fn analyze_images(&self, images: &[ImageUpload], prompt: &str) -> Result<String>;
}

/// Shared generation settings for both providers.
#[derive(Debug, Clone)]
pub struct RequestSettings {
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub timeout: Duration,
}

impl RequestSettings {
    pub fn for_provider(provider: Provider, config: &Config) -> Self {
        Self {
            model: config.model_for(provider).to_string(),
            base_url: config.base_url_for(provider).trim_end_matches('/').to_string(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    pub fn http_client(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder().timeout(self.timeout).build()?)
    }
}

/// Build the client for the selected provider.
pub fn get_vision_service(
    provider: Provider,
    api_key: &str,
    config: &Config,
) -> Result<Arc<dyn VisionService>> {
    let api_key = api_key.trim();
    if api_key.is_empty() {
        return Err(VisionError::MissingApiKey.into());
    }

    let settings = RequestSettings::for_provider(provider, config);
    log::info!(
        "🔌 Using {} with model {} (key {})",
        provider,
        settings.model,
        mask_key(api_key)
    );

    let service: Arc<dyn VisionService> = match provider {
        Provider::OpenAi => Arc::new(OpenAIService::new(api_key.to_string(), settings)?),
        Provider::Claude => Arc::new(ClaudeService::new(api_key.to_string(), settings)?),
    };
    Ok(service)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(status: u16, body: &str) -> VisionError {
        VisionError::Api {
            provider: Provider::OpenAi,
            status: reqwest::StatusCode::from_u16(status).unwrap(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_provider_parsing() {
        assert_eq!("openai".parse::<Provider>().unwrap(), Provider::OpenAi);
        assert_eq!("Claude".parse::<Provider>().unwrap(), Provider::Claude);
        assert_eq!("anthropic".parse::<Provider>().unwrap(), Provider::Claude);
        assert!("gemini".parse::<Provider>().is_err());
    }

    #[test]
    fn test_failure_classification() {
        assert_eq!(api_error(401, "{}").kind(), FailureKind::InvalidApiKey);
        assert_eq!(
            api_error(400, r#"{"error":{"message":"Your credit balance is too low"}}"#).kind(),
            FailureKind::InsufficientCredits
        );
        assert_eq!(
            api_error(429, r#"{"error":{"code":"insufficient_quota"}}"#).kind(),
            FailureKind::InsufficientCredits
        );
        assert_eq!(api_error(500, "overloaded").kind(), FailureKind::Other);
        assert!(!api_error(500, "overloaded").is_fatal());
    }

    #[test]
    fn test_failure_kind_through_anyhow() {
        let err: anyhow::Error = api_error(403, "forbidden").into();
        assert!(is_fatal(&err));
        assert_eq!(failure_kind(&anyhow::anyhow!("timeout")), FailureKind::Other);
    }

    #[test]
    fn test_blank_key_rejected() {
        let err = get_vision_service(Provider::OpenAi, "  ", &Config::default())
            .err()
            .unwrap();
        assert_eq!(failure_kind(&err), FailureKind::InvalidApiKey);
    }

    #[test]
    fn test_factory_picks_provider() {
        let config = Config::default();
        let service = get_vision_service(Provider::Claude, "sk-ant", &config).unwrap();
        assert_eq!(service.provider(), Provider::Claude);
        assert_eq!(service.model(), config.anthropic_model);
    }
}
