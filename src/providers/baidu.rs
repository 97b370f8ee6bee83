//! Baidu Qianfan (ERNIE chat and text2image).
//!
//! Baidu does not accept the API key directly: `authenticate` exchanges the
//! key + secret for an access token at `/oauth/2.0/token` and caches it until
//! shortly before `expires_in` elapses. Token-level errors (codes 110/111)
//! and HTTP 401/403 evict the cached token so the next call re-authenticates.

use super::http::{read_json, transport_error};
use super::{data_url, AuthToken, GenerationRequest, GenerationResponse, Provider, TokenUsage};
use crate::config::{GenerationKind, ProviderConfig, ProviderKind};
use crate::error::ProviderError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Tokens are refreshed this long before they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Chat endpoint for a model; unknown models use `completions_pro`.
pub fn chat_endpoint(model: &str) -> &'static str {
    match model {
        "ernie-4.0-8k" => "completions_pro",
        "ernie-3.5-8k" => "completions",
        "ernie-turbo-8k" => "eb-instant",
        "ernie-speed-8k" => "ernie_speed",
        "ernie-lite-8k" => "ernie-lite-8k",
        _ => "completions_pro",
    }
}

fn image_size_for(aspect_ratio: &str) -> (u32, u32) {
    match aspect_ratio.trim() {
        "16:9" => (1024, 576),
        "9:16" => (576, 1024),
        "4:3" => (1024, 768),
        "3:4" => (768, 1024),
        _ => (1024, 1024),
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
pub struct BaiduProvider {
    tokens: Mutex<HashMap<String, CachedToken>>,
}

impl BaiduProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn cache_key(config: &ProviderConfig) -> String {
        format!("{}|{}", config.effective_base_url(), config.api_key)
    }

    fn auth_error(&self, detail: impl Into<String>) -> ProviderError {
        ProviderError::Auth {
            provider: ProviderKind::Baidu.to_string(),
            detail: detail.into(),
        }
    }

    fn check_error_code(&self, body: &Value) -> Result<(), ProviderError> {
        let Some(code) = body["error_code"].as_i64() else {
            return Ok(());
        };
        let msg = body["error_msg"].as_str().unwrap_or("unknown error");
        let provider = ProviderKind::Baidu.to_string();
        Err(match code {
            110 | 111 => self.auth_error(format!("access token rejected ({code}): {msg}")),
            4 | 17 | 18 => ProviderError::RateLimit {
                provider,
                retry_after_secs: None,
            },
            _ => ProviderError::Network {
                provider,
                detail: format!("error_code {code}: {msg}"),
            },
        })
    }
}

#[async_trait]
impl Provider for BaiduProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Baidu
    }

    async fn authenticate(
        &self,
        client: &reqwest::Client,
        config: &ProviderConfig,
    ) -> Result<AuthToken, ProviderError> {
        let key = Self::cache_key(config);
        let cached = self.tokens.lock().get(&key).cloned();
        if let Some(cached) = cached.filter(|c| c.expires_at > Instant::now()) {
            return Ok(AuthToken(cached.token));
        }

        let secret = config
            .secret_key
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| self.auth_error("secret key is required"))?;
        let name = ProviderKind::Baidu.as_str();
        let response = client
            .post(format!("{}/oauth/2.0/token", config.effective_base_url()))
            .query(&[
                ("grant_type", "client_credentials"),
                ("client_id", config.api_key.as_str()),
                ("client_secret", secret),
            ])
            .send()
            .await
            .map_err(|e| transport_error(name, &e, None))?;
        let body = read_json(name, response, None).await?;

        let Some(token) = body["access_token"].as_str().filter(|t| !t.is_empty()) else {
            let detail = body["error_description"]
                .as_str()
                .or_else(|| body["error"].as_str())
                .unwrap_or("token exchange returned no access_token");
            return Err(self.auth_error(detail.to_string()));
        };
        let lifetime = Duration::from_secs(body["expires_in"].as_u64().unwrap_or(0));
        let expires_at = Instant::now() + lifetime.saturating_sub(EXPIRY_MARGIN);
        debug!("Obtained Baidu access token, valid for {}s", lifetime.as_secs());

        self.tokens.lock().insert(
            key,
            CachedToken {
                token: token.to_string(),
                expires_at,
            },
        );
        Ok(AuthToken(token.to_string()))
    }

    fn build_request(
        &self,
        client: &reqwest::Client,
        request: &GenerationRequest,
        token: &AuthToken,
    ) -> Result<reqwest::RequestBuilder, ProviderError> {
        let config = &request.config;
        let base = config.effective_base_url();
        let model = config.effective_model();

        let (url, body) = match request.kind {
            GenerationKind::Text => {
                let mut body = json!({
                    "messages": [{ "role": "user", "content": request.prompt }],
                });
                if let Some(system) = request.system_prompt.as_deref() {
                    body["system"] = json!(system);
                }
                if let Some(max) = config.params.max_tokens {
                    body["max_output_tokens"] = json!(max);
                }
                if let Some(t) = config.params.temperature {
                    body["temperature"] = json!(t);
                }
                (
                    format!(
                        "{base}/rpc/2.0/ai_custom/v1/wenxinworkshop/chat/{}",
                        chat_endpoint(&model)
                    ),
                    body,
                )
            }
            GenerationKind::Image => {
                let (width, height) = image_size_for(request.aspect_ratio());
                (
                    format!("{base}/rpc/2.0/ai_custom/v1/wenxinworkshop/text2image/{model}"),
                    json!({
                        "prompt": request.prompt,
                        "width": width,
                        "height": height,
                        "image_num": 1,
                    }),
                )
            }
        };

        Ok(client
            .post(url)
            .query(&[("access_token", token.0.as_str())])
            .json(&body))
    }

    fn parse_response(
        &self,
        request: &GenerationRequest,
        body: Value,
    ) -> Result<GenerationResponse, ProviderError> {
        self.check_error_code(&body)?;
        let usage = &body["usage"];
        let input = usage["prompt_tokens"].as_u64().unwrap_or(0);

        match request.kind {
            GenerationKind::Text => {
                let text = body["result"]
                    .as_str()
                    .filter(|t| !t.trim().is_empty())
                    .ok_or_else(|| self.malformed("response has no result text"))?;
                Ok(GenerationResponse {
                    content: text.trim().to_string(),
                    image_url: None,
                    tokens_used: TokenUsage {
                        input,
                        output: usage["completion_tokens"].as_u64().unwrap_or(0),
                    },
                })
            }
            GenerationKind::Image => {
                let first = &body["data"][0];
                let image_url = if let Some(b64) = first["b64_image"].as_str() {
                    data_url("image/png", b64)
                } else if let Some(url) = first["url"].as_str() {
                    url.to_string()
                } else {
                    return Err(self.malformed("response has no data[0].b64_image"));
                };
                let total = usage["total_tokens"].as_u64().unwrap_or(input);
                Ok(GenerationResponse {
                    content: String::new(),
                    image_url: Some(image_url),
                    tokens_used: TokenUsage {
                        input,
                        output: total.saturating_sub(input),
                    },
                })
            }
        }
    }

    fn invalidate(&self, config: &ProviderConfig) {
        if self.tokens.lock().remove(&Self::cache_key(config)).is_some() {
            debug!("Evicted cached Baidu access token");
        }
    }
}
