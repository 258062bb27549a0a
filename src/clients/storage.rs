/// Supabase Storage client for output publishing and reference downloads.
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, Url, header};

use crate::util::mime::guess_mime_from_path;
use crate::util::text::truncate_chars;

const ERROR_BODY_MAX_CHARS: usize = 160;

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub base_url: String,
    pub service_key: String,
    pub bucket: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SupabaseStorageClient {
    client: Client,
    base_url: Url,
    bucket: String,
    service_key: String,
}

impl SupabaseStorageClient {
    /// # Errors
    /// Returns an error when the base URL does not parse or the HTTP client
    /// cannot be built.
    pub fn new(config: StorageConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build storage HTTP client")?;
        let base_url = Url::parse(&config.base_url).context("invalid storage base URL")?;

        Ok(Self {
            client,
            base_url,
            bucket: config.bucket,
            service_key: config.service_key,
        })
    }

    fn object_url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(&format!("storage/v1/object/{}/{}", self.bucket, path))
            .context("failed to build storage object URL")
    }

    /// Uploads (upserting) output bytes to the bucket.
    ///
    /// # Errors
    /// Upload failure is fatal for the calling job.
    pub async fn upload(&self, path: &str, content_type: &str, bytes: Vec<u8>) -> Result<()> {
        let url = self.object_url(path)?;
        let content_type = if content_type.is_empty() {
            "image/png"
        } else {
            content_type
        };

        let response = self
            .client
            .post(url)
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .header("x-upsert", "true")
            .header(header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .context("storage upload request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "storage upload failed with status {}: {}",
                status,
                truncate_chars(&body, ERROR_BODY_MAX_CHARS)
            );
        }
        Ok(())
    }

    /// Downloads a stored object, returning its bytes and mime type.
    ///
    /// The mime type comes from the response header when present, else it is
    /// guessed from the path extension.
    pub async fn download(&self, path: &str) -> Result<(Vec<u8>, String)> {
        let url = self.object_url(path)?;

        let response = self
            .client
            .get(url)
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .send()
            .await
            .context("reference download request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "reference download failed with status {}: {}",
                status,
                truncate_chars(&body, ERROR_BODY_MAX_CHARS)
            );
        }

        let mime = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map_or_else(|| guess_mime_from_path(path).to_string(), String::from);

        let bytes = response
            .bytes()
            .await
            .context("failed to read reference download body")?;
        Ok((bytes.to_vec(), mime))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base_url: String) -> SupabaseStorageClient {
        SupabaseStorageClient::new(StorageConfig {
            base_url,
            service_key: "service-key".to_string(),
            bucket: "avatar-media".to_string(),
            timeout: Duration::from_secs(5),
        })
        .expect("client should build")
    }

    #[tokio::test]
    async fn upload_sends_upsert_and_auth_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(
                "/storage/v1/object/avatar-media/quiz/exp/generations/gen.png",
            ))
            .and(header("x-upsert", "true"))
            .and(header("apikey", "service-key"))
            .and(header("content-type", "image/png"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(server.uri());
        client
            .upload(
                "quiz/exp/generations/gen.png",
                "image/png",
                b"png-bytes".to_vec(),
            )
            .await
            .expect("upload should succeed");
    }

    #[tokio::test]
    async fn upload_failure_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("bucket unavailable"))
            .mount(&server)
            .await;

        let client = test_client(server.uri());
        let error = client
            .upload("quiz/exp/generations/gen.png", "image/png", vec![1, 2, 3])
            .await
            .expect_err("upload should fail");

        assert!(error.to_string().contains("500"));
    }

    #[tokio::test]
    async fn download_prefers_header_mime() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/object/avatar-media/photos/ref.bin"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/webp")
                    .set_body_bytes(b"ref-bytes".to_vec()),
            )
            .mount(&server)
            .await;

        let client = test_client(server.uri());
        let (bytes, mime) = client
            .download("photos/ref.bin")
            .await
            .expect("download should succeed");

        assert_eq!(bytes, b"ref-bytes");
        assert_eq!(mime, "image/webp");
    }

    #[tokio::test]
    async fn download_guesses_mime_from_path_when_header_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpg-bytes".to_vec()))
            .mount(&server)
            .await;

        let client = test_client(server.uri());
        let (_, mime) = client
            .download("photos/ref.jpg")
            .await
            .expect("download should succeed");

        assert_eq!(mime, "image/jpeg");
    }

    #[tokio::test]
    async fn download_failure_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Object not found"))
            .mount(&server)
            .await;

        let client = test_client(server.uri());
        let error = client
            .download("photos/missing.jpg")
            .await
            .expect_err("download should fail");

        assert!(error.to_string().contains("404"));
    }
}
