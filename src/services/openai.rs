use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::models::ImageUpload;
use crate::services::ai_service::{Provider, RequestSettings, VisionError, VisionService};
use crate::services::images::to_data_url;

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageData },
}

#[derive(Debug, Serialize)]
struct ImageData {
    url: String,
    detail: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    content: Option<String>,
}

/// OpenAI chat completions with image inputs (GPT-4o)
pub struct OpenAIService {
    api_key: String,
    settings: RequestSettings,
    client: reqwest::Client,
}

impl OpenAIService {
    pub fn new(api_key: String, settings: RequestSettings) -> Result<Self> {
        let client = settings.http_client()?;
        Ok(Self {
            api_key,
            settings,
            client,
        })
    }

    fn build_request(&self, images: &[ImageUpload], prompt: &str) -> ChatRequest {
        let mut content = Vec::with_capacity(images.len() + 1);
        content.push(ContentPart::Text {
            text: prompt.to_string(),
        });
        for image in images {
            content.push(ContentPart::ImageUrl {
                image_url: ImageData {
                    url: to_data_url(image),
                    detail: "high".to_string(),
                },
            });
        }

        ChatRequest {
            model: self.settings.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content,
            }],
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        }
    }
}

#[async_trait::async_trait]
impl VisionService for OpenAIService {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    fn model(&self) -> &str {
        &self.settings.model
    }

    async fn analyze_images(&self, images: &[ImageUpload], prompt: &str) -> Result<String> {
        let request = self.build_request(images, prompt);

        log::info!(
            "🤖 Sending {} image(s) to OpenAI with model: {}",
            images.len(),
            self.settings.model
        );
        log::debug!(
            "📤 Request payload size: {} bytes",
            serde_json::to_string(&request)?.len()
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.settings.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        log::debug!("📥 OpenAI response status: {}", status);

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::error!("❌ OpenAI API error ({}): {}", status, body);
            return Err(VisionError::Api {
                provider: Provider::OpenAi,
                status,
                body,
            }
            .into());
        }

        let chat_response: ChatResponse = response.json().await?;
        let content = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(VisionError::EmptyResponse(Provider::OpenAi))?;

        log::debug!("💬 OpenAI response content: {}", content);
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(base_url: &str) -> OpenAIService {
        let config = Config {
            openai_base_url: base_url.to_string(),
            ..Config::default()
        };
        OpenAIService::new(
            "test_key".to_string(),
            RequestSettings::for_provider(Provider::OpenAi, &config),
        )
        .unwrap()
    }

    fn orange() -> ImageUpload {
        ImageUpload {
            filename: "orange.png".to_string(),
            bytes: vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A],
            mime: "image/png",
        }
    }

    #[test]
    fn test_request_shape() {
        let service = service("http://localhost");
        let request = service.build_request(&[orange(), orange()], "rank these");
        let value = serde_json::to_value(&request).unwrap();

        let content = &value["messages"][0]["content"];
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[0]["text"], "rank these");
        assert_eq!(content[1]["type"], "image_url");
        assert!(content[2]["image_url"]["url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
        assert_eq!(value["model"], "gpt-4o");
        assert!(value.get("temperature").is_none());
    }

    #[tokio::test]
    async fn test_analyze_image_returns_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "index": 0,
                    "message": { "role": "assistant", "content": "{\"is_orange\": true}" },
                    "finish_reason": "stop"
                }]
            })))
            .mount(&server)
            .await;

        let reply = service(&server.uri())
            .analyze_image(&orange(), "prompt")
            .await
            .unwrap();
        assert_eq!(reply, "{\"is_orange\": true}");
    }

    #[tokio::test]
    async fn test_unauthorized_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": { "message": "Incorrect API key provided", "code": "invalid_api_key" }
            })))
            .mount(&server)
            .await;

        let err = service(&server.uri())
            .analyze_image(&orange(), "prompt")
            .await
            .unwrap_err();
        let vision_err = err.downcast_ref::<VisionError>().unwrap();
        assert!(vision_err.is_fatal());
    }

    #[tokio::test]
    async fn test_empty_choices_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let err = service(&server.uri())
            .analyze_image(&orange(), "prompt")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<VisionError>(),
            Some(VisionError::EmptyResponse(Provider::OpenAi))
        ));
    }
}
