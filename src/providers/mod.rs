//! Provider adapters: one uniform generation contract over heterogeneous APIs.
//!
//! ```text
//!  GenerationRequest ──► ProviderAdapter::execute ──► GenerationResponse
//!                               │
//!                 ┌─────────────┼──────────────┐
//!            authenticate   build_request   parse_response     (Provider trait,
//!                 │               │               │              one impl per API)
//!                 └──────── reqwest round trip ───┘
//! ```
//!
//! [`ProviderAdapter`] is the seam the orchestrator calls; it has no side
//! effects beyond the network request. [`HttpProviderAdapter`] implements it
//! by delegating the provider-specific parts to a [`Provider`] chosen by
//! [`ProviderKind`]. Secondary authentication (Baidu's key + secret token
//! exchange) happens inside `authenticate` and never leaks out.

pub mod anthropic;
pub mod baidu;
pub mod google;
pub mod http;
pub mod openai;

pub use http::HttpProviderAdapter;

use crate::config::{self, GenerationKind, ProviderConfig, ProviderKind};
use crate::error::ProviderError;
use crate::prompts;
use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// An image the provider should condition on.
#[derive(Debug, Clone, PartialEq)]
pub enum ReferenceAsset {
    /// Remote or uploaded image, passed by URL.
    Url(String),
    /// Raw image bytes.
    Inline { mime_type: String, data: Vec<u8> },
}

impl ReferenceAsset {
    /// Parse `data:<mime>;base64,<payload>` into an inline asset; anything
    /// else is treated as a URL.
    pub fn from_url_or_data(s: &str) -> Self {
        if let Some((mime_type, data)) = parse_data_url(s) {
            ReferenceAsset::Inline { mime_type, data }
        } else {
            ReferenceAsset::Url(s.to_string())
        }
    }

    pub fn mime_type(&self) -> String {
        match self {
            ReferenceAsset::Inline { mime_type, .. } => mime_type.clone(),
            ReferenceAsset::Url(url) => guess_mime_from_url(url).to_string(),
        }
    }

    pub fn base64_data(&self) -> Option<String> {
        match self {
            ReferenceAsset::Inline { data, .. } => {
                Some(base64::engine::general_purpose::STANDARD.encode(data))
            }
            ReferenceAsset::Url(_) => None,
        }
    }
}

/// Uniform input to every provider.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub kind: GenerationKind,
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub reference_assets: Vec<ReferenceAsset>,
    pub config: ProviderConfig,
}

impl GenerationRequest {
    pub fn new(kind: GenerationKind, prompt: impl Into<String>, config: ProviderConfig) -> Self {
        Self {
            kind,
            prompt: prompt.into(),
            system_prompt: None,
            reference_assets: Vec::new(),
            config,
        }
    }

    pub fn with_system_prompt(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    pub fn with_references(mut self, assets: Vec<ReferenceAsset>) -> Self {
        self.reference_assets = assets;
        self
    }

    pub fn aspect_ratio(&self) -> &str {
        self.config.params.aspect_ratio.as_deref().unwrap_or("16:9")
    }

    pub fn resolution(&self) -> &str {
        self.config.params.resolution.as_deref().unwrap_or("2K")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

/// Uniform output of every provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationResponse {
    /// Generated text (for image calls, any accompanying text).
    pub content: String,
    /// Remote URL or `data:` URL of the generated image.
    pub image_url: Option<String>,
    pub tokens_used: TokenUsage,
}

/// The seam the orchestrator calls.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn execute(&self, request: GenerationRequest) -> Result<GenerationResponse, ProviderError>;
}

/// Credential material produced by [`Provider::authenticate`].
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(pub String);

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

/// Provider-specific translation, driven by [`HttpProviderAdapter`].
#[async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Whether reference images can condition a `kind` request.
    fn supports_references(&self, kind: GenerationKind) -> bool {
        self.kind().supports_references(kind)
    }

    /// Produce the credential used by `build_request`. Most providers just
    /// hand back the API key.
    async fn authenticate(
        &self,
        client: &reqwest::Client,
        config: &ProviderConfig,
    ) -> Result<AuthToken, ProviderError> {
        let _ = client;
        Ok(AuthToken(config.api_key.clone()))
    }

    fn build_request(
        &self,
        client: &reqwest::Client,
        request: &GenerationRequest,
        token: &AuthToken,
    ) -> Result<reqwest::RequestBuilder, ProviderError>;

    fn parse_response(
        &self,
        request: &GenerationRequest,
        body: serde_json::Value,
    ) -> Result<GenerationResponse, ProviderError>;

    /// Called when the provider rejected credentials; drop anything cached.
    fn invalidate(&self, config: &ProviderConfig) {
        let _ = config;
    }

    fn malformed(&self, detail: impl Into<String>) -> ProviderError
    where
        Self: Sized,
    {
        ProviderError::MalformedResponse {
            provider: self.kind().to_string(),
            detail: detail.into(),
        }
    }

    fn unsupported(&self, capability: impl Into<String>) -> ProviderError
    where
        Self: Sized,
    {
        ProviderError::UnsupportedCapability {
            provider: self.kind().to_string(),
            capability: capability.into(),
        }
    }
}

/// Result of [`test_connection`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionTestResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Issue a minimal generation with `config` to check it works.
///
/// Never fails: problems are reported in the result.
pub async fn test_connection(
    adapter: &dyn ProviderAdapter,
    config: &ProviderConfig,
) -> ConnectionTestResult {
    let report = config::validate(config);
    if !report.is_valid {
        return ConnectionTestResult {
            success: false,
            message: Some(report.errors.join("; ")),
        };
    }

    let prompt = match config.kind {
        GenerationKind::Text => prompts::TEST_TEXT_PROMPT,
        GenerationKind::Image => prompts::TEST_IMAGE_PROMPT,
    };
    let request = GenerationRequest::new(config.kind, prompt, config.clone());
    match adapter.execute(request).await {
        Ok(response) => {
            let message = match config.kind {
                GenerationKind::Text => format!(
                    "Connected to {} ({}): {}",
                    config.provider,
                    config.effective_model(),
                    truncate(response.content.trim(), 80)
                ),
                GenerationKind::Image => format!(
                    "Connected to {} ({}): image generated",
                    config.provider,
                    config.effective_model()
                ),
            };
            ConnectionTestResult {
                success: true,
                message: Some(message),
            }
        }
        Err(e) => ConnectionTestResult {
            success: false,
            message: Some(e.to_string()),
        },
    }
}

/// Build a `data:` URL from base64 payload.
pub fn data_url(mime_type: &str, base64_payload: &str) -> String {
    format!("data:{mime_type};base64,{base64_payload}")
}

/// Split a base64 `data:` URL into mime type and decoded bytes.
pub fn parse_data_url(s: &str) -> Option<(String, Vec<u8>)> {
    let rest = s.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    let mime = meta.strip_suffix(";base64")?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .ok()?;
    Some((mime.to_string(), bytes))
}

fn guess_mime_from_url(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    if path.ends_with(".jpg") || path.ends_with(".jpeg") {
        "image/jpeg"
    } else if path.ends_with(".webp") {
        "image/webp"
    } else if path.ends_with(".gif") {
        "image/gif"
    } else {
        "image/png"
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

/// OpenAI-style pixel size for an aspect ratio.
pub(crate) fn pixel_size_for(aspect_ratio: &str) -> (u32, u32) {
    match aspect_ratio.trim() {
        "16:9" => (1792, 1024),
        "9:16" => (1024, 1792),
        _ => (1024, 1024),
    }
}
