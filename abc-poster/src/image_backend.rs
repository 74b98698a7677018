use crate::types::{ImageBackend, ImageBackendError, ImageRequest, PosterError, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/";
pub const DEFAULT_MODEL: &str = "gpt-image-1";

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout_seconds: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_seconds: 180,
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerationBody<'a> {
    model: &'a str,
    prompt: &'a str,
    size: &'a str,
    quality: &'a str,
    n: u32,
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    data: Vec<GeneratedImage>,
}

#[derive(Debug, Deserialize)]
struct GeneratedImage {
    b64_json: Option<String>,
    url: Option<String>,
}

/// Image backend speaking the OpenAI images API.
pub struct OpenAiImageBackend {
    client: Client,
    endpoint: Url,
    config: OpenAiConfig,
}

impl OpenAiImageBackend {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("abc-poster/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        let mut base = Url::parse(&config.base_url)
            .map_err(|e| PosterError::Config(format!("invalid base URL {}: {}", config.base_url, e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base
            .join("v1/images/generations")
            .map_err(|e| PosterError::Config(format!("invalid base URL {}: {}", config.base_url, e)))?;

        Ok(Self {
            client,
            endpoint,
            config,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn fetch_url(&self, url: &str) -> std::result::Result<Vec<u8>, ImageBackendError> {
        debug!("Downloading generated image from {}", url);
        let response = self.client.get(url).send().await.map_err(transport)?;
        let response = check_status(response).await?;
        let bytes = response.bytes().await.map_err(transport)?;
        Ok(bytes.to_vec())
    }
}

fn transport(e: reqwest::Error) -> ImageBackendError {
    ImageBackendError::Transport(e.to_string())
}

/// Maps an HTTP status onto the backend error taxonomy.
async fn check_status(response: Response) -> std::result::Result<Response, ImageBackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            Err(ImageBackendError::RateLimited { retry_after_secs })
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ImageBackendError::InvalidKey),
        _ => {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            Err(ImageBackendError::Server(format!(
                "HTTP {}: {}",
                status,
                if snippet.is_empty() {
                    status.canonical_reason().unwrap_or("Unknown").to_string()
                } else {
                    snippet
                }
            )))
        }
    }
}

#[async_trait]
impl ImageBackend for OpenAiImageBackend {
    fn backend_name(&self) -> String {
        format!("OpenAI ({})", self.config.model)
    }

    async fn generate(&self, request: &ImageRequest) -> std::result::Result<Vec<u8>, ImageBackendError> {
        let body = GenerationBody {
            model: &self.config.model,
            prompt: &request.prompt,
            size: request.size.as_str(),
            quality: request.quality.as_str(),
            n: 1,
        };

        debug!(
            "Requesting {} {} image from {}",
            request.size.as_str(),
            request.quality.as_str(),
            self.endpoint
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        let response = check_status(response).await?;

        let parsed: GenerationResponse = response
            .json()
            .await
            .map_err(|e| ImageBackendError::Server(format!("unreadable response: {}", e)))?;

        let image = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ImageBackendError::Server("response contained no image".to_string()))?;

        let bytes = match (image.b64_json, image.url) {
            (Some(encoded), _) => STANDARD
                .decode(encoded.trim())
                .map_err(|e| ImageBackendError::Server(format!("invalid base64 image: {}", e)))?,
            (None, Some(url)) => self.fetch_url(&url).await?,
            (None, None) => {
                return Err(ImageBackendError::Server(
                    "response carried neither b64_json nor url".to_string(),
                ))
            }
        };

        info!("Received generated image ({} bytes)", bytes.len());
        Ok(bytes)
    }
}
