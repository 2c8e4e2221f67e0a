use crate::config::Config;
use crate::render::html_escape;
use crate::services::Provider;

const PAGE_TEMPLATE: &str = include_str!("../static/index.html");

/// Fill the upload page template.
///
/// `results` is an already-escaped HTML fragment (empty before the first analysis).
pub fn render_page(config: &Config, selected: Provider, results: &str) -> String {
    let options: String = Provider::ALL
        .iter()
        .map(|provider| {
            let selected_attr = if *provider == selected { " selected" } else { "" };
            let server_key = if config.api_key_for(*provider).is_some() {
                " (server key available)"
            } else {
                ""
            };
            format!(
                r#"<option value="{}"{}>{}{}</option>"#,
                provider.id(),
                selected_attr,
                html_escape(provider.label()),
                server_key
            )
        })
        .collect();

    PAGE_TEMPLATE
        .replace("{{PROVIDER_OPTIONS}}", &options)
        .replace("{{MAX_IMAGES}}", &config.max_images.to_string())
        .replace(
            "{{MAX_IMAGE_MB}}",
            &(config.max_image_bytes / (1024 * 1024)).to_string(),
        )
        .replace("{{RESULTS}}", results)
}

pub fn notice(class: &str, message: &str) -> String {
    format!(r#"<div class="notice {}">{}</div>"#, class, html_escape(message))
}

// Axum integration
#[cfg(feature = "web-server")]
pub mod server {
    use super::*;
    use axum::{
        extract::{DefaultBodyLimit, Multipart, State},
        http::StatusCode,
        response::{Html, IntoResponse, Response},
        routing::{get, post},
        Json, Router,
    };
    use serde_json::json;
    use std::sync::Arc;
    use tower::ServiceBuilder;
    use tower_http::{limit::RequestBodyLimitLayer, services::ServeDir};

    use crate::handlers::request::request_error;
    use crate::handlers::{run_analysis, AnalysisRequest, RequestError};
    use crate::render::{describe_failure, render_html};
    use crate::services::ai_service::failure_kind;
    use crate::services::FailureKind;

    pub struct AppState {
        pub config: Config,
    }

    pub fn create_router(config: Config) -> Router {
        let body_limit = config.body_limit();
        let static_dir = config.static_dir.clone();
        let state = Arc::new(AppState { config });

        Router::new()
            .route("/", get(index_handler))
            .route("/analyze", post(analyze_page_handler))
            .route("/api/analyze", post(analyze_api_handler))
            .route("/health", get(health_check))
            .nest_service("/static", ServeDir::new(static_dir))
            .layer(
                ServiceBuilder::new()
                    .layer(DefaultBodyLimit::disable())
                    .layer(RequestBodyLimitLayer::new(body_limit)),
            )
            .with_state(state)
    }

    /// Pull provider, API key and image files out of the upload form.
    async fn read_form(mut multipart: Multipart, config: &Config) -> Result<AnalysisRequest, String> {
        let mut provider = config.default_provider;
        let mut api_key = None;
        let mut files = Vec::new();

        while let Some(field) = multipart.next_field().await.map_err(|e| e.to_string())? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "provider" => {
                    let value = field.text().await.map_err(|e| e.to_string())?;
                    provider = value.parse()?;
                }
                "api_key" => {
                    api_key = Some(field.text().await.map_err(|e| e.to_string())?);
                }
                "images" | "images[]" | "file" => {
                    let filename = field.file_name().unwrap_or("upload").to_string();
                    let bytes = field.bytes().await.map_err(|e| e.to_string())?;
                    files.push((filename, bytes.to_vec()));
                }
                other => {
                    log::debug!("Ignoring form field '{}'", other);
                }
            }
        }

        Ok(AnalysisRequest {
            provider,
            api_key,
            files,
        })
    }

    async fn index_handler(State(state): State<Arc<AppState>>) -> Html<String> {
        Html(render_page(&state.config, state.config.default_provider, ""))
    }

    async fn analyze_page_handler(
        State(state): State<Arc<AppState>>,
        multipart: Multipart,
    ) -> Response {
        let config = &state.config;
        let request = match read_form(multipart, config).await {
            Ok(request) => request,
            Err(e) => {
                log::warn!("⚠️ Bad upload form: {}", e);
                let body = notice("error", &format!("Could not read the upload: {}", e));
                return (
                    StatusCode::BAD_REQUEST,
                    Html(render_page(config, config.default_provider, &body)),
                )
                    .into_response();
            }
        };

        let provider = request.provider;
        let results = match run_analysis(request, config).await {
            Ok(outcome) => render_html(&outcome.report, &outcome.images),
            Err(e) => {
                let mut body = String::new();
                if let Some(RequestError::NoImages { warnings }) = request_error(&e) {
                    for warning in warnings {
                        body.push_str(&notice("warning", warning));
                    }
                }
                match request_error(&e) {
                    Some(_) => body.push_str(&notice("info", &describe_failure(&e))),
                    None => {
                        log::error!("❌ Analysis failed: {}", e);
                        body.push_str(&notice("error", &format!("❌ {}", describe_failure(&e))));
                    }
                }
                body
            }
        };

        Html(render_page(config, provider, &results)).into_response()
    }

    async fn analyze_api_handler(
        State(state): State<Arc<AppState>>,
        multipart: Multipart,
    ) -> Response {
        let request = match read_form(multipart, &state.config).await {
            Ok(request) => request,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
        };

        match run_analysis(request, &state.config).await {
            Ok(outcome) => (StatusCode::OK, Json(outcome.report)).into_response(),
            Err(e) => {
                let status = if request_error(&e).is_some() {
                    StatusCode::BAD_REQUEST
                } else {
                    match failure_kind(&e) {
                        FailureKind::InsufficientCredits => StatusCode::PAYMENT_REQUIRED,
                        FailureKind::InvalidApiKey => StatusCode::UNAUTHORIZED,
                        FailureKind::Other => {
                            log::error!("❌ Analysis failed: {}", e);
                            StatusCode::INTERNAL_SERVER_ERROR
                        }
                    }
                };
                error_response(status, describe_failure(&e))
            }
        }
    }

    fn error_response(status: StatusCode, message: String) -> Response {
        (status, Json(json!({ "error": message }))).into_response()
    }

    async fn health_check() -> &'static str {
        "OK"
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use axum::body::{to_bytes, Body};
        use axum::http::Request;
        use tower::ServiceExt;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        const BOUNDARY: &str = "orange-boundary";

        fn multipart_body(fields: &[(&str, &str)], files: &[(&str, &[u8])]) -> Vec<u8> {
            let mut body = Vec::new();
            for (name, value) in fields {
                body.extend_from_slice(
                    format!(
                        "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                        BOUNDARY, name, value
                    )
                    .as_bytes(),
                );
            }
            for (filename, bytes) in files {
                body.extend_from_slice(
                    format!(
                        "--{}\r\nContent-Disposition: form-data; name=\"images\"; filename=\"{}\"\r\nContent-Type: image/jpeg\r\n\r\n",
                        BOUNDARY, filename
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
                body.extend_from_slice(b"\r\n");
            }
            body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
            body
        }

        fn post(uri: &str, body: Vec<u8>) -> Request<Body> {
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={}", BOUNDARY),
                )
                .body(Body::from(body))
                .unwrap()
        }

        async fn body_string(response: Response) -> String {
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            String::from_utf8(bytes.to_vec()).unwrap()
        }

        const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00];

        #[tokio::test]
        async fn test_health() {
            let app = create_router(Config::default());
            let response = app
                .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_string(response).await, "OK");
        }

        #[tokio::test]
        async fn test_index_lists_providers() {
            let app = create_router(Config::default());
            let response = app
                .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
                .await
                .unwrap();
            let html = body_string(response).await;
            assert!(html.contains(r#"<option value="openai" selected>"#));
            assert!(html.contains("Claude (Anthropic)"));
            assert!(!html.contains("{{"));
        }

        #[tokio::test]
        async fn test_page_asks_for_api_key() {
            let app = create_router(Config::default());
            let body = multipart_body(&[("provider", "claude"), ("api_key", "")], &[("a.jpg", JPEG)]);
            let response = app.oneshot(post("/analyze", body)).await.unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            let html = body_string(response).await;
            assert!(html.contains("Please enter your API key."));
            assert!(html.contains(r#"<option value="claude" selected>"#));
        }

        #[tokio::test]
        async fn test_api_rejects_missing_images() {
            let app = create_router(Config::default());
            let body = multipart_body(&[("api_key", "sk-test")], &[]);
            let response = app.oneshot(post("/api/analyze", body)).await.unwrap();

            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
            assert_eq!(json["error"], "Please upload orange photos.");
        }

        #[tokio::test]
        async fn test_api_rejects_unknown_provider() {
            let app = create_router(Config::default());
            let body = multipart_body(&[("provider", "gemini")], &[("a.jpg", JPEG)]);
            let response = app.oneshot(post("/api/analyze", body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }

        #[tokio::test]
        async fn test_api_analyzes_single_image() {
            let server = MockServer::start().await;
            let reply = r#"{"is_orange": true, "sweetness_grade": "Medium", "sweetness_score": 62, "brix_min": 10, "brix_max": 12, "analysis_reason": "Typical supermarket orange"}"#;
            Mock::given(method("POST"))
                .and(path("/chat/completions"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "choices": [{ "message": { "role": "assistant", "content": reply } }]
                })))
                .mount(&server)
                .await;

            let config = Config {
                openai_api_key: Some("server-key".to_string()),
                openai_base_url: server.uri(),
                ..Config::default()
            };
            let app = create_router(config);
            let body = multipart_body(&[("provider", "openai")], &[("a.jpg", JPEG)]);
            let response = app.oneshot(post("/api/analyze", body)).await.unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
            assert_eq!(json["provider"], "openai");
            assert_eq!(json["results"][0]["filename"], "a.jpg");
            assert_eq!(json["results"][0]["result"]["sweetness_grade"], "Medium");
            assert_eq!(json["results"][0]["result"]["brix_range"], "10~12");
            assert_eq!(json["results"][0]["result"]["rank"], 1);
        }

        #[tokio::test]
        async fn test_api_maps_rejected_key_to_401() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(401).set_body_string("Incorrect API key provided"))
                .mount(&server)
                .await;

            let config = Config {
                openai_base_url: server.uri(),
                ..Config::default()
            };
            let app = create_router(config);
            let body = multipart_body(&[("api_key", "sk-bad")], &[("a.jpg", JPEG), ("b.jpg", JPEG)]);
            let response = app.oneshot(post("/api/analyze", body)).await.unwrap();

            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
            assert_eq!(json["error"], "Invalid API key. Please check and try again.");
        }

        #[tokio::test]
        async fn test_api_maps_low_credit_to_402() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/chat/completions"))
                .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                    "error": { "message": "You exceeded your current quota", "code": "insufficient_quota" }
                })))
                .mount(&server)
                .await;

            let config = Config {
                openai_base_url: server.uri(),
                ..Config::default()
            };
            let app = create_router(config);
            let body = multipart_body(&[("api_key", "sk-broke")], &[("a.jpg", JPEG)]);
            let response = app.oneshot(post("/api/analyze", body)).await.unwrap();

            assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
            let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
            assert_eq!(
                json["error"],
                "Insufficient API credits. Please add credits on your API provider's website."
            );
        }

        #[tokio::test]
        async fn test_oversized_body_is_rejected() {
            let config = Config {
                max_images: 1,
                max_image_bytes: 1024,
                ..Config::default()
            };
            let limit = config.body_limit();
            let app = create_router(config);
            let big = vec![0xFF; limit + 1024];
            let body = multipart_body(&[("api_key", "sk-test")], &[("big.jpg", big.as_slice())]);
            let response = app.oneshot(post("/api/analyze", body)).await.unwrap();

            assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        }
    }
}
