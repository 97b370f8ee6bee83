//! OpenAI wire format, shared by OpenAI, Qwen (DashScope compatible mode)
//! and any OpenAI-compatible endpoint.
//!
//! Text goes to `/chat/completions`, images to `/images/generations`.
//! Reference images are only accepted for text (vision) requests.

use super::{
    data_url, pixel_size_for, AuthToken, GenerationRequest, GenerationResponse, Provider,
    ReferenceAsset, TokenUsage,
};
use crate::config::{GenerationKind, ProviderKind};
use crate::error::ProviderError;
use async_trait::async_trait;
use serde_json::{json, Value};

#[derive(Debug)]
pub struct OpenAiProvider {
    kind: ProviderKind,
}

impl OpenAiProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self { kind }
    }

    fn chat_body(&self, request: &GenerationRequest) -> Value {
        let config = &request.config;
        let mut messages = Vec::new();
        if let Some(system) = request.system_prompt.as_deref() {
            messages.push(json!({ "role": "system", "content": system }));
        }
        let user_content = if request.reference_assets.is_empty() {
            json!(request.prompt)
        } else {
            let mut blocks = vec![json!({ "type": "text", "text": request.prompt })];
            blocks.extend(request.reference_assets.iter().map(image_block));
            Value::Array(blocks)
        };
        messages.push(json!({ "role": "user", "content": user_content }));

        let mut body = json!({
            "model": config.effective_model(),
            "messages": messages,
        });
        if let Some(max) = config.params.max_tokens {
            body["max_tokens"] = json!(max);
        }
        if let Some(t) = config.params.temperature {
            body["temperature"] = json!(t);
        }
        if config.params.enable_thinking == Some(true) {
            body["enable_thinking"] = json!(true);
        }
        body
    }

    fn image_body(&self, request: &GenerationRequest) -> Value {
        let (w, h) = pixel_size_for(request.aspect_ratio());
        let mut body = json!({
            "model": request.config.effective_model(),
            "prompt": request.prompt,
            "n": 1,
            "size": format!("{w}x{h}"),
        });
        if let Some(style) = request.config.params.style.as_deref() {
            body["style"] = json!(style);
        }
        body
    }

    fn parse_chat(&self, body: &Value) -> Result<GenerationResponse, ProviderError> {
        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| self.malformed("response has no choices[0].message.content"))?;
        let usage = &body["usage"];
        Ok(GenerationResponse {
            content: content.to_string(),
            image_url: None,
            tokens_used: TokenUsage {
                input: usage["prompt_tokens"].as_u64().unwrap_or(0),
                output: usage["completion_tokens"].as_u64().unwrap_or(0),
            },
        })
    }

    fn parse_image(&self, body: &Value) -> Result<GenerationResponse, ProviderError> {
        let first = &body["data"][0];
        let image_url = if let Some(url) = first["url"].as_str() {
            url.to_string()
        } else if let Some(b64) = first["b64_json"].as_str() {
            data_url("image/png", b64)
        } else {
            return Err(self.malformed("response has no data[0].url or data[0].b64_json"));
        };
        let usage = &body["usage"];
        Ok(GenerationResponse {
            content: first["revised_prompt"].as_str().unwrap_or_default().to_string(),
            image_url: Some(image_url),
            tokens_used: TokenUsage {
                input: usage["input_tokens"].as_u64().unwrap_or(0),
                output: usage["output_tokens"].as_u64().unwrap_or(0),
            },
        })
    }
}

fn image_block(asset: &ReferenceAsset) -> Value {
    let url = match asset {
        ReferenceAsset::Url(url) => url.clone(),
        ReferenceAsset::Inline { .. } => {
            data_url(&asset.mime_type(), &asset.base64_data().unwrap_or_default())
        }
    };
    json!({ "type": "image_url", "image_url": { "url": url } })
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn build_request(
        &self,
        client: &reqwest::Client,
        request: &GenerationRequest,
        token: &AuthToken,
    ) -> Result<reqwest::RequestBuilder, ProviderError> {
        let base = request.config.effective_base_url();
        let (url, body) = match request.kind {
            GenerationKind::Text => (format!("{base}/chat/completions"), self.chat_body(request)),
            GenerationKind::Image => (format!("{base}/images/generations"), self.image_body(request)),
        };
        Ok(client.post(url).bearer_auth(&token.0).json(&body))
    }

    fn parse_response(
        &self,
        request: &GenerationRequest,
        body: Value,
    ) -> Result<GenerationResponse, ProviderError> {
        match request.kind {
            GenerationKind::Text => self.parse_chat(&body),
            GenerationKind::Image => self.parse_image(&body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderConfig, ProviderParams};
    use crate::providers::{HttpProviderAdapter, ProviderAdapter};
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter() -> HttpProviderAdapter {
        HttpProviderAdapter::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn compatible_chat_forwards_enable_thinking() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer ds-key"))
            .and(body_partial_json(json!({
                "model": "deepseek-chat",
                "enable_thinking": true,
                "messages": [
                    { "role": "system", "content": "sys" },
                    { "role": "user", "content": "hello" }
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "role": "assistant", "content": "hi!" } }],
                "usage": { "prompt_tokens": 5, "completion_tokens": 2 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = ProviderConfig::new(
            "ds",
            GenerationKind::Text,
            ProviderKind::OpenAiCompatible,
            "ds-key",
        )
        .with_base_url(format!("{}/v1", server.uri()))
        .with_model("deepseek-chat")
        .with_params(ProviderParams {
            enable_thinking: Some(true),
            ..Default::default()
        });
        let response = adapter()
            .execute(
                GenerationRequest::new(GenerationKind::Text, "hello", config)
                    .with_system_prompt("sys"),
            )
            .await
            .unwrap();
        assert_eq!(response.content, "hi!");
        assert_eq!(response.tokens_used, TokenUsage { input: 5, output: 2 });
    }

    #[tokio::test]
    async fn image_generation_maps_aspect_ratio_to_size() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/images/generations"))
            .and(body_partial_json(json!({ "model": "dall-e-3", "size": "1024x1792", "n": 1 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "url": "https://img.example/1.png", "revised_prompt": "a slide" }]
            })))
            .mount(&server)
            .await;

        let config = ProviderConfig::new("o", GenerationKind::Image, ProviderKind::OpenAi, "sk")
            .with_base_url(server.uri())
            .with_params(ProviderParams {
                aspect_ratio: Some("9:16".into()),
                ..Default::default()
            });
        let response = adapter()
            .execute(GenerationRequest::new(GenerationKind::Image, "draw", config))
            .await
            .unwrap();
        assert_eq!(response.image_url.as_deref(), Some("https://img.example/1.png"));
        assert_eq!(response.content, "a slide");
    }

    #[tokio::test]
    async fn image_references_are_rejected() {
        let config = ProviderConfig::new("q", GenerationKind::Image, ProviderKind::Qwen, "k");
        let request = GenerationRequest::new(GenerationKind::Image, "draw", config)
            .with_references(vec![ReferenceAsset::Url("https://x/a.png".into())]);
        let err = adapter().execute(request).await.unwrap_err();
        assert!(matches!(err, ProviderError::UnsupportedCapability { .. }));
    }

    #[test]
    fn vision_request_uses_content_blocks() {
        let provider = OpenAiProvider::new(ProviderKind::OpenAi);
        let request = GenerationRequest::new(
            GenerationKind::Text,
            "describe",
            ProviderConfig::new("o", GenerationKind::Text, ProviderKind::OpenAi, "sk"),
        )
        .with_references(vec![ReferenceAsset::Inline {
            mime_type: "image/png".into(),
            data: b"hello".to_vec(),
        }]);
        let body = provider.chat_body(&request);
        let content = &body["messages"][0]["content"];
        assert_eq!(content[0]["type"], "text");
        assert_eq!(
            content[1]["image_url"]["url"],
            "data:image/png;base64,aGVsbG8="
        );
        assert!(body.get("enable_thinking").is_none());
    }

    #[test]
    fn b64_image_becomes_data_url() {
        let provider = OpenAiProvider::new(ProviderKind::OpenAi);
        let response = provider
            .parse_image(&json!({ "data": [{ "b64_json": "AAAA" }] }))
            .unwrap();
        assert_eq!(response.image_url.as_deref(), Some("data:image/png;base64,AAAA"));
    }

    #[test]
    fn null_content_is_malformed() {
        let provider = OpenAiProvider::new(ProviderKind::Qwen);
        let err = provider
            .parse_chat(&json!({ "choices": [{ "message": { "content": null } }] }))
            .unwrap_err();
        assert_eq!(err.provider(), "qwen");
    }
}
