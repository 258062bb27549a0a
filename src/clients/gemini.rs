/// Gemini image generation client.
///
/// Calls `models/{model}:generateContent` with either a reference photo plus
/// prompt or a prompt alone, and classifies failures so the pipeline can
/// decide between retry and abort.
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::util::retry::is_transient_message;
use crate::util::text::truncate_chars;

const ERROR_BODY_MAX_CHARS: usize = 160;

/// Provider failure, substring- and status-classifiable per the retry policy.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider returned status {status}: {body}")]
    Http { status: StatusCode, body: String },
    #[error("no image in provider response")]
    MissingImage,
    #[error("provider returned an empty image")]
    EmptyImage,
    #[error("missing reference image")]
    MissingReference,
    #[error("provider request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("failed to decode provider image payload: {0}")]
    Decode(#[from] base64::DecodeError),
}

impl ProviderError {
    /// Retryable: missing/empty image, 429, any 5xx, and transient network
    /// conditions. Everything else aborts the attempt loop immediately.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::MissingImage | ProviderError::EmptyImage => true,
            ProviderError::Http { status, body } => {
                *status == StatusCode::TOO_MANY_REQUESTS
                    || status.is_server_error()
                    || is_transient_message(body)
            }
            ProviderError::Transport(error) => {
                error.is_timeout() || error.is_connect() || is_transient_message(&error.to_string())
            }
            ProviderError::MissingReference | ProviderError::Decode(_) => false,
        }
    }
}

/// One generated artifact returned by the provider.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub model: String,
    pub mime_type: String,
    pub image_bytes: Vec<u8>,
    pub usage_metadata: Option<Value>,
}

/// Remote image generation API surface used by the pipeline.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    async fn generate_from_reference(
        &self,
        prompt: &str,
        image_bytes: &[u8],
        mime_type: &str,
    ) -> Result<GeneratedImage, ProviderError>;

    async fn generate_from_prompt(&self, prompt: &str) -> Result<GeneratedImage, ProviderError>;
}

/// Gemini client settings; the key is experience-scoped and supplied per job.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct GeminiImageClient {
    client: Client,
    endpoint: Url,
    model: String,
}

impl GeminiImageClient {
    /// # Errors
    /// Returns an error when the base URL does not parse or the HTTP client
    /// cannot be built.
    pub fn new(config: GeminiConfig) -> Result<Self> {
        anyhow::ensure!(!config.api_key.trim().is_empty(), "missing gemini api key");

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build gemini HTTP client")?;

        let base_url = Url::parse(&config.base_url).context("invalid gemini base URL")?;
        let mut endpoint = base_url
            .join(&format!("v1beta/models/{}:generateContent", config.model))
            .context("failed to build gemini endpoint URL")?;
        endpoint
            .query_pairs_mut()
            .append_pair("key", &config.api_key);

        Ok(Self {
            client,
            endpoint,
            model: config.model,
        })
    }

    async fn generate(&self, payload: Value) -> Result<GeneratedImage, ProviderError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status,
                body: truncate_chars(&body, ERROR_BODY_MAX_CHARS),
            });
        }

        let body: GenerateContentResponse = response.json().await?;
        let inline = body
            .candidates
            .iter()
            .flat_map(|candidate| candidate.content.iter())
            .flat_map(|content| content.parts.iter())
            .find_map(|part| {
                part.inline_data
                    .as_ref()
                    .filter(|inline| inline.data.as_deref().is_some_and(|d| !d.is_empty()))
            })
            .ok_or(ProviderError::MissingImage)?;

        let image_bytes = BASE64.decode(inline.data.as_deref().unwrap_or_default())?;
        if image_bytes.is_empty() {
            return Err(ProviderError::EmptyImage);
        }

        Ok(GeneratedImage {
            model: self.model.clone(),
            mime_type: inline
                .mime_type
                .clone()
                .unwrap_or_else(|| "image/png".to_string()),
            image_bytes,
            usage_metadata: body.usage_metadata,
        })
    }
}

#[async_trait]
impl ImageProvider for GeminiImageClient {
    async fn generate_from_reference(
        &self,
        prompt: &str,
        image_bytes: &[u8],
        mime_type: &str,
    ) -> Result<GeneratedImage, ProviderError> {
        if image_bytes.is_empty() {
            return Err(ProviderError::MissingReference);
        }
        let mime_type = if mime_type.is_empty() {
            "image/jpeg"
        } else {
            mime_type
        };
        let payload = json!({
            "contents": [{
                "parts": [
                    { "text": prompt },
                    { "inline_data": { "mime_type": mime_type, "data": BASE64.encode(image_bytes) } },
                ]
            }],
            "generation_config": { "response_modalities": ["IMAGE"] },
        });
        self.generate(payload).await
    }

    async fn generate_from_prompt(&self, prompt: &str) -> Result<GeneratedImage, ProviderError> {
        let payload = json!({
            "contents": [{
                "parts": [ { "text": prompt } ]
            }],
            "generation_config": { "response_modalities": ["IMAGE"] },
        });
        self.generate(payload).await
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default, rename = "usageMetadata", alias = "usage_metadata")]
    usage_metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default, rename = "inlineData", alias = "inline_data")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    #[serde(default)]
    data: Option<String>,
    #[serde(default, rename = "mimeType", alias = "mime_type")]
    mime_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base_url: String) -> GeminiImageClient {
        GeminiImageClient::new(GeminiConfig {
            base_url,
            model: "gemini-2.5-flash-image".to_string(),
            api_key: "exp-key".to_string(),
            timeout: Duration::from_secs(5),
        })
        .expect("client should build")
    }

    fn image_response(data: &str, mime: &str) -> serde_json::Value {
        json!({
            "candidates": [{
                "content": {
                    "parts": [{ "inlineData": { "data": data, "mimeType": mime } }]
                }
            }],
            "usageMetadata": { "totalTokenCount": 42 }
        })
    }

    #[tokio::test]
    async fn generate_from_prompt_decodes_inline_image() {
        let server = MockServer::start().await;
        let encoded = BASE64.encode(b"png-bytes");
        Mock::given(method("POST"))
            .and(path(
                "/v1beta/models/gemini-2.5-flash-image:generateContent",
            ))
            .and(query_param("key", "exp-key"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(image_response(&encoded, "image/png")),
            )
            .mount(&server)
            .await;

        let client = test_client(server.uri());
        let image = client
            .generate_from_prompt("studio portrait")
            .await
            .expect("generation should succeed");

        assert_eq!(image.image_bytes, b"png-bytes");
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.model, "gemini-2.5-flash-image");
        assert!(image.usage_metadata.is_some());
    }

    #[tokio::test]
    async fn snake_case_inline_data_is_accepted() {
        let server = MockServer::start().await;
        let encoded = BASE64.encode(b"webp-bytes");
        let body = json!({
            "candidates": [{
                "content": {
                    "parts": [{ "inline_data": { "data": encoded, "mime_type": "image/webp" } }]
                }
            }]
        });
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let client = test_client(server.uri());
        let image = client
            .generate_from_prompt("studio portrait")
            .await
            .expect("generation should succeed");

        assert_eq!(image.image_bytes, b"webp-bytes");
        assert_eq!(image.mime_type, "image/webp");
    }

    #[tokio::test]
    async fn response_without_image_is_retryable() {
        let server = MockServer::start().await;
        let body = json!({ "candidates": [{ "content": { "parts": [{ "text": "no image" }] } }] });
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let client = test_client(server.uri());
        let error = client
            .generate_from_prompt("studio portrait")
            .await
            .expect_err("missing image should fail");

        assert!(matches!(error, ProviderError::MissingImage));
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn rate_limit_and_server_errors_are_retryable() {
        for status in [429_u16, 500, 503] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;

            let client = test_client(server.uri());
            let error = client
                .generate_from_prompt("studio portrait")
                .await
                .expect_err("error status should fail");

            assert!(error.is_retryable(), "status {status} should be retryable");
        }
    }

    #[tokio::test]
    async fn client_errors_are_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400).set_body_string("API key not valid"),
            )
            .mount(&server)
            .await;

        let client = test_client(server.uri());
        let error = client
            .generate_from_prompt("studio portrait")
            .await
            .expect_err("bad request should fail");

        assert!(matches!(
            error,
            ProviderError::Http {
                status: StatusCode::BAD_REQUEST,
                ..
            }
        ));
        assert!(!error.is_retryable());
    }

    #[tokio::test]
    async fn empty_reference_image_is_rejected_without_a_request() {
        let client = test_client("http://localhost:1".to_string());
        let error = client
            .generate_from_reference("prompt", b"", "image/jpeg")
            .await
            .expect_err("empty reference should fail");

        assert!(matches!(error, ProviderError::MissingReference));
        assert!(!error.is_retryable());
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let result = GeminiImageClient::new(GeminiConfig {
            base_url: "http://localhost:1".to_string(),
            model: "gemini-2.5-flash-image".to_string(),
            api_key: "  ".to_string(),
            timeout: Duration::from_secs(5),
        });
        assert!(result.is_err());
    }
}
