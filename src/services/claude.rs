use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::models::ImageUpload;
use crate::services::ai_service::{Provider, RequestSettings, VisionError, VisionService};
use crate::services::images::to_base64;

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    Image { source: ImageSource },
}

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    source_type: String,
    media_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

/// Anthropic Messages API with base64 image blocks
pub struct ClaudeService {
    api_key: String,
    settings: RequestSettings,
    client: reqwest::Client,
}

impl ClaudeService {
    pub fn new(api_key: String, settings: RequestSettings) -> Result<Self> {
        let client = settings.http_client()?;
        Ok(Self {
            api_key,
            settings,
            client,
        })
    }

    fn build_request(&self, images: &[ImageUpload], prompt: &str) -> MessagesRequest {
        let mut content = Vec::with_capacity(images.len() * 2 + 1);
        for (idx, image) in images.iter().enumerate() {
            // Labels keep image_index in the reply aligned with upload order
            if images.len() > 1 {
                content.push(ContentBlock::Text {
                    text: format!("Image {}:", idx + 1),
                });
            }
            content.push(ContentBlock::Image {
                source: ImageSource {
                    source_type: "base64".to_string(),
                    media_type: image.mime.to_string(),
                    data: to_base64(image),
                },
            });
        }
        content.push(ContentBlock::Text {
            text: prompt.to_string(),
        });

        MessagesRequest {
            model: self.settings.model.clone(),
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            messages: vec![Message {
                role: "user".to_string(),
                content,
            }],
        }
    }
}

#[async_trait::async_trait]
impl VisionService for ClaudeService {
    fn provider(&self) -> Provider {
        Provider::Claude
    }

    fn model(&self) -> &str {
        &self.settings.model
    }

    async fn analyze_images(&self, images: &[ImageUpload], prompt: &str) -> Result<String> {
        let request = self.build_request(images, prompt);

        log::info!(
            "🤖 Sending {} image(s) to Claude with model: {}",
            images.len(),
            self.settings.model
        );

        let response = self
            .client
            .post(format!("{}/v1/messages", self.settings.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        log::debug!("📥 Claude response status: {}", status);

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::error!("❌ Claude API error ({}): {}", status, body);
            return Err(VisionError::Api {
                provider: Provider::Claude,
                status,
                body,
            }
            .into());
        }

        let messages_response: MessagesResponse = response.json().await?;
        let text = messages_response
            .content
            .into_iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n");

        if text.trim().is_empty() {
            return Err(VisionError::EmptyResponse(Provider::Claude).into());
        }

        log::debug!("💬 Claude response content: {}", text);
        Ok(text)
    }
}
