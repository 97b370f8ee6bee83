//! Anthropic Messages API. Text only.

use super::{AuthToken, GenerationRequest, GenerationResponse, Provider, ReferenceAsset, TokenUsage};
use crate::config::{GenerationKind, ProviderKind};
use crate::error::ProviderError;
use async_trait::async_trait;
use serde_json::{json, Value};

const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Default)]
pub struct AnthropicProvider;

fn image_block(asset: &ReferenceAsset) -> Value {
    match asset {
        ReferenceAsset::Inline { .. } => json!({
            "type": "image",
            "source": {
                "type": "base64",
                "media_type": asset.mime_type(),
                "data": asset.base64_data().unwrap_or_default(),
            }
        }),
        ReferenceAsset::Url(url) => json!({
            "type": "image",
            "source": { "type": "url", "url": url }
        }),
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn build_request(
        &self,
        client: &reqwest::Client,
        request: &GenerationRequest,
        token: &AuthToken,
    ) -> Result<reqwest::RequestBuilder, ProviderError> {
        if request.kind != GenerationKind::Text {
            return Err(self.unsupported("image generation"));
        }
        let config = &request.config;

        let mut content: Vec<Value> = request.reference_assets.iter().map(image_block).collect();
        content.push(json!({ "type": "text", "text": request.prompt }));

        let mut body = json!({
            "model": config.effective_model(),
            "max_tokens": config.params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": [{ "role": "user", "content": content }],
        });
        if let Some(system) = request.system_prompt.as_deref() {
            body["system"] = json!(system);
        }
        if let Some(t) = config.params.temperature {
            body["temperature"] = json!(t);
        }

        Ok(client
            .post(format!("{}/messages", config.effective_base_url()))
            .header("x-api-key", token.0.as_str())
            .header("anthropic-version", API_VERSION)
            .json(&body))
    }

    fn parse_response(
        &self,
        _request: &GenerationRequest,
        body: Value,
    ) -> Result<GenerationResponse, ProviderError> {
        let blocks = body["content"]
            .as_array()
            .ok_or_else(|| self.malformed("response has no content array"))?;
        let text: String = blocks
            .iter()
            .filter(|b| b["type"] == "text")
            .filter_map(|b| b["text"].as_str())
            .collect();
        if text.is_empty() {
            return Err(self.malformed("response contains no text blocks"));
        }
        Ok(GenerationResponse {
            content: text,
            image_url: None,
            tokens_used: TokenUsage {
                input: body["usage"]["input_tokens"].as_u64().unwrap_or(0),
                output: body["usage"]["output_tokens"].as_u64().unwrap_or(0),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::providers::{HttpProviderAdapter, ProviderAdapter};
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn messages_call_sends_version_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "ak"))
            .and(header("anthropic-version", API_VERSION))
            .and(body_partial_json(json!({ "max_tokens": 4096, "system": "sys" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [
                    { "type": "text", "text": "Hello " },
                    { "type": "text", "text": "deck" }
                ],
                "usage": { "input_tokens": 9, "output_tokens": 4 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = ProviderConfig::new("a", GenerationKind::Text, ProviderKind::Anthropic, "ak")
            .with_base_url(format!("{}/v1", server.uri()));
        let adapter = HttpProviderAdapter::new(Duration::from_secs(5)).unwrap();
        let response = adapter
            .execute(
                GenerationRequest::new(GenerationKind::Text, "hi", config).with_system_prompt("sys"),
            )
            .await
            .unwrap();
        assert_eq!(response.content, "Hello deck");
        assert_eq!(response.tokens_used, TokenUsage { input: 9, output: 4 });
    }

    #[test]
    fn reference_images_precede_prompt() {
        let block = image_block(&ReferenceAsset::Url("https://x/a.png".into()));
        assert_eq!(block["source"]["type"], "url");
        let inline = image_block(&ReferenceAsset::Inline {
            mime_type: "image/jpeg".into(),
            data: vec![1, 2, 3],
        });
        assert_eq!(inline["source"]["media_type"], "image/jpeg");
    }

    #[test]
    fn empty_content_is_malformed() {
        let request = GenerationRequest::new(
            GenerationKind::Text,
            "x",
            ProviderConfig::new("a", GenerationKind::Text, ProviderKind::Anthropic, "k"),
        );
        let err = AnthropicProvider
            .parse_response(&request, json!({ "content": [] }))
            .unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse { .. }));
    }
}
