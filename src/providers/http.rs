//! The reqwest-backed [`ProviderAdapter`].
//!
//! Shared HTTP semantics for every provider:
//!
//! | Outcome                      | Error                                  |
//! |------------------------------|----------------------------------------|
//! | timeout                      | `Network` ("timed out after Ns")       |
//! | connect / transport failure  | `Network`                              |
//! | 401 / 403                    | `Auth` (cached credentials evicted)    |
//! | 429                          | `RateLimit` (with `Retry-After`)       |
//! | other non-2xx                | `Network` with status and body excerpt |
//! | 2xx with unparseable JSON    | `MalformedResponse`                    |
//!
//! Nothing is retried here.

use super::{
    anthropic::AnthropicProvider, baidu::BaiduProvider, google::GoogleProvider,
    openai::OpenAiProvider, GenerationRequest, GenerationResponse, Provider, ProviderAdapter,
};
use crate::config::ProviderKind;
use crate::error::{ProviderError, SlidesError};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const ERROR_BODY_EXCERPT: usize = 300;

pub struct HttpProviderAdapter {
    client: reqwest::Client,
    timeout: Duration,
    providers: HashMap<ProviderKind, Arc<dyn Provider>>,
}

impl std::fmt::Debug for HttpProviderAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProviderAdapter")
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn provider_for(kind: ProviderKind) -> Arc<dyn Provider> {
    match kind {
        ProviderKind::Google => Arc::new(GoogleProvider),
        ProviderKind::OpenAi | ProviderKind::Qwen | ProviderKind::OpenAiCompatible => {
            Arc::new(OpenAiProvider::new(kind))
        }
        ProviderKind::Anthropic => Arc::new(AnthropicProvider),
        ProviderKind::Baidu => Arc::new(BaiduProvider::new()),
    }
}

impl HttpProviderAdapter {
    /// Build an adapter whose every request carries `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, SlidesError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("edgequake-slides/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SlidesError::Internal(format!("failed to build HTTP client: {e}")))?;
        let providers = ProviderKind::ALL
            .iter()
            .map(|&k| (k, provider_for(k)))
            .collect();
        Ok(Self {
            client,
            timeout,
            providers,
        })
    }

    fn provider(&self, kind: ProviderKind) -> Result<&Arc<dyn Provider>, ProviderError> {
        self.providers
            .get(&kind)
            .ok_or_else(|| ProviderError::UnsupportedCapability {
                provider: kind.to_string(),
                capability: "this adapter".into(),
            })
    }

    async fn round_trip(
        &self,
        provider: &dyn Provider,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, ProviderError> {
        let name = request.config.provider.as_str();
        let token = provider.authenticate(&self.client, &request.config).await?;
        let builder = provider.build_request(&self.client, request, &token)?;
        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(name, &e, Some(self.timeout)))?;
        let body = read_json(name, response, Some(self.timeout)).await?;
        provider.parse_response(request, body)
    }
}

#[async_trait]
impl ProviderAdapter for HttpProviderAdapter {
    async fn execute(&self, request: GenerationRequest) -> Result<GenerationResponse, ProviderError> {
        let config = &request.config;
        let name = config.provider.as_str();

        if !config.provider.supports(request.kind) {
            return Err(ProviderError::UnsupportedCapability {
                provider: name.to_string(),
                capability: format!("{} generation", request.kind),
            });
        }
        let provider = self.provider(config.provider)?;
        if !request.reference_assets.is_empty() && !provider.supports_references(request.kind) {
            return Err(ProviderError::UnsupportedCapability {
                provider: name.to_string(),
                capability: format!("reference images for {} generation", request.kind),
            });
        }
        if config.effective_base_url().is_empty() {
            return Err(ProviderError::Network {
                provider: name.to_string(),
                detail: "no base URL configured".into(),
            });
        }

        debug!(
            "Calling {} ({}) for {} generation, {} reference assets",
            name,
            config.effective_model(),
            request.kind,
            request.reference_assets.len()
        );
        let result = self.round_trip(provider.as_ref(), &request).await;
        if let Err(ProviderError::Auth { .. }) = &result {
            provider.invalidate(config);
        }
        if let Err(e) = &result {
            warn!("{} request failed: {}", name, e);
        }
        result
    }
}

/// Map a reqwest send/read failure.
pub(crate) fn transport_error(
    provider: &str,
    e: &reqwest::Error,
    timeout: Option<Duration>,
) -> ProviderError {
    let detail = if e.is_timeout() {
        match timeout {
            Some(t) => format!("request timed out after {}s", t.as_secs()),
            None => "request timed out".to_string(),
        }
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        e.to_string()
    };
    ProviderError::Network {
        provider: provider.to_string(),
        detail,
    }
}

/// Classify the status code and parse a successful body as JSON.
pub(crate) async fn read_json(
    provider: &str,
    response: reqwest::Response,
    timeout: Option<Duration>,
) -> Result<serde_json::Value, ProviderError> {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let text = response
        .text()
        .await
        .map_err(|e| transport_error(provider, &e, timeout))?;

    match status {
        s if s.is_success() => {
            serde_json::from_str(&text).map_err(|e| ProviderError::MalformedResponse {
                provider: provider.to_string(),
                detail: format!("invalid JSON: {e}"),
            })
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ProviderError::Auth {
            provider: provider.to_string(),
            detail: format!("HTTP {}: {}", status.as_u16(), excerpt(&text)),
        }),
        StatusCode::TOO_MANY_REQUESTS => Err(ProviderError::RateLimit {
            provider: provider.to_string(),
            retry_after_secs: retry_after,
        }),
        _ => Err(ProviderError::Network {
            provider: provider.to_string(),
            detail: format!("HTTP {}: {}", status.as_u16(), excerpt(&text)),
        }),
    }
}

fn excerpt(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(ERROR_BODY_EXCERPT) {
        Some((idx, _)) => format!("{}…", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GenerationKind, ProviderConfig};
    use crate::providers::ReferenceAsset;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter() -> HttpProviderAdapter {
        HttpProviderAdapter::new(Duration::from_secs(5)).unwrap()
    }

    fn openai_text(server: &MockServer) -> ProviderConfig {
        ProviderConfig::new("t", GenerationKind::Text, ProviderKind::OpenAi, "sk")
            .with_base_url(format!("{}/v1", server.uri()))
    }

    async fn mount_status(server: &MockServer, template: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(template)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn unauthorized_maps_to_auth() {
        let server = MockServer::start().await;
        mount_status(&server, ResponseTemplate::new(401).set_body_string("bad key")).await;
        let err = adapter()
            .execute(GenerationRequest::new(GenerationKind::Text, "hi", openai_text(&server)))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Auth { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn too_many_requests_reads_retry_after() {
        let server = MockServer::start().await;
        mount_status(
            &server,
            ResponseTemplate::new(429).insert_header("Retry-After", "42"),
        )
        .await;
        let err = adapter()
            .execute(GenerationRequest::new(GenerationKind::Text, "hi", openai_text(&server)))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ProviderError::RateLimit {
                provider: "openai".into(),
                retry_after_secs: Some(42)
            }
        );
    }

    #[tokio::test]
    async fn server_error_maps_to_network_with_status() {
        let server = MockServer::start().await;
        mount_status(&server, ResponseTemplate::new(503).set_body_string("overloaded")).await;
        let err = adapter()
            .execute(GenerationRequest::new(GenerationKind::Text, "hi", openai_text(&server)))
            .await
            .unwrap_err();
        match err {
            ProviderError::Network { detail, .. } => {
                assert!(detail.contains("503"));
                assert!(detail.contains("overloaded"));
            }
            other => panic!("expected Network, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn garbage_body_maps_to_malformed() {
        let server = MockServer::start().await;
        mount_status(&server, ResponseTemplate::new(200).set_body_string("<html>")).await;
        let err = adapter()
            .execute(GenerationRequest::new(GenerationKind::Text, "hi", openai_text(&server)))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn timeout_maps_to_network() {
        let server = MockServer::start().await;
        mount_status(
            &server,
            ResponseTemplate::new(200)
                .set_body_json(json!({}))
                .set_delay(Duration::from_secs(3)),
        )
        .await;
        let adapter = HttpProviderAdapter::new(Duration::from_millis(200)).unwrap();
        let err = adapter
            .execute(GenerationRequest::new(GenerationKind::Text, "hi", openai_text(&server)))
            .await
            .unwrap_err();
        match err {
            ProviderError::Network { detail, .. } => assert!(detail.contains("timed out")),
            other => panic!("expected Network, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unsupported_kind_fails_before_network() {
        let config = ProviderConfig::new(
            "a",
            GenerationKind::Image,
            ProviderKind::Anthropic,
            "key",
        );
        let err = adapter()
            .execute(GenerationRequest::new(GenerationKind::Image, "draw", config))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnsupportedCapability { .. }));
    }

    #[tokio::test]
    async fn unsupported_references_fail_before_network() {
        let config = ProviderConfig::new("b", GenerationKind::Image, ProviderKind::Baidu, "ak")
            .with_secret_key("sk")
            .with_base_url("http://127.0.0.1:9");
        let request = GenerationRequest::new(GenerationKind::Image, "draw", config)
            .with_references(vec![ReferenceAsset::Url("https://x/y.png".into())]);
        let err = adapter().execute(request).await.unwrap_err();
        match err {
            ProviderError::UnsupportedCapability { capability, .. } => {
                assert!(capability.contains("reference images"))
            }
            other => panic!("expected UnsupportedCapability, got {other:?}"),
        }
    }
}
