//! Google Gemini (`generateContent`) for both text and image generation.

use super::{
    data_url, AuthToken, GenerationRequest, GenerationResponse, Provider, ReferenceAsset,
    TokenUsage,
};
use crate::config::{GenerationKind, ProviderKind};
use crate::error::ProviderError;
use async_trait::async_trait;
use serde_json::{json, Value};

#[derive(Debug, Default)]
pub struct GoogleProvider;

fn reference_part(asset: &ReferenceAsset) -> Value {
    match asset {
        ReferenceAsset::Inline { .. } => json!({
            "inlineData": {
                "mimeType": asset.mime_type(),
                "data": asset.base64_data().unwrap_or_default(),
            }
        }),
        ReferenceAsset::Url(url) => json!({
            "fileData": {
                "mimeType": asset.mime_type(),
                "fileUri": url,
            }
        }),
    }
}

#[async_trait]
impl Provider for GoogleProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    fn build_request(
        &self,
        client: &reqwest::Client,
        request: &GenerationRequest,
        token: &AuthToken,
    ) -> Result<reqwest::RequestBuilder, ProviderError> {
        let config = &request.config;
        let url = format!(
            "{}/models/{}:generateContent",
            config.effective_base_url(),
            config.effective_model()
        );

        let mut parts = vec![json!({ "text": request.prompt })];
        parts.extend(request.reference_assets.iter().map(reference_part));

        let mut body = json!({
            "contents": [{ "role": "user", "parts": parts }],
        });
        if let Some(system) = request.system_prompt.as_deref() {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }

        let generation_config = match request.kind {
            GenerationKind::Text => {
                let mut gc = json!({});
                if let Some(max) = config.params.max_tokens {
                    gc["maxOutputTokens"] = json!(max);
                }
                if let Some(t) = config.params.temperature {
                    gc["temperature"] = json!(t);
                }
                gc
            }
            GenerationKind::Image => json!({
                "responseModalities": ["TEXT", "IMAGE"],
                "imageConfig": {
                    "aspectRatio": request.aspect_ratio(),
                    "imageSize": request.resolution(),
                },
            }),
        };
        body["generationConfig"] = generation_config;

        Ok(client
            .post(url)
            .header("x-goog-api-key", token.0.as_str())
            .json(&body))
    }

    fn parse_response(
        &self,
        request: &GenerationRequest,
        body: Value,
    ) -> Result<GenerationResponse, ProviderError> {
        if let Some(reason) = body["promptFeedback"]["blockReason"].as_str() {
            return Err(self.malformed(format!("prompt blocked: {reason}")));
        }
        let parts = body["candidates"][0]["content"]["parts"]
            .as_array()
            .ok_or_else(|| self.malformed("response has no candidates[0].content.parts"))?;

        let mut text = String::new();
        let mut image_url = None;
        for part in parts {
            if let Some(t) = part["text"].as_str() {
                text.push_str(t);
            } else if let Some(data) = part["inlineData"]["data"].as_str() {
                if image_url.is_none() {
                    let mime = part["inlineData"]["mimeType"].as_str().unwrap_or("image/png");
                    image_url = Some(data_url(mime, data));
                }
            }
        }

        match request.kind {
            GenerationKind::Text if text.trim().is_empty() => {
                return Err(self.malformed("response contains no text"));
            }
            GenerationKind::Image if image_url.is_none() => {
                return Err(self.malformed("response contains no image"));
            }
            _ => {}
        }

        let usage = &body["usageMetadata"];
        Ok(GenerationResponse {
            content: text,
            image_url,
            tokens_used: TokenUsage {
                input: usage["promptTokenCount"].as_u64().unwrap_or(0),
                output: usage["candidatesTokenCount"].as_u64().unwrap_or(0),
            },
        })
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

    fn config(server: &MockServer, kind: GenerationKind, model: &str) -> ProviderConfig {
        ProviderConfig::new("g", kind, ProviderKind::Google, "gkey")
            .with_base_url(server.uri())
            .with_model(model)
    }

    #[tokio::test]
    async fn text_generation_sends_system_instruction() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-1.5-pro:generateContent"))
            .and(header("x-goog-api-key", "gkey"))
            .and(body_partial_json(json!({
                "systemInstruction": { "parts": [{ "text": "be brief" }] },
                "generationConfig": { "maxOutputTokens": 256 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{ "content": { "parts": [{ "text": "# Slide" }] } }],
                "usageMetadata": { "promptTokenCount": 12, "candidatesTokenCount": 3 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cfg = config(&server, GenerationKind::Text, "gemini-1.5-pro").with_params(
            ProviderParams {
                max_tokens: Some(256),
                ..Default::default()
            },
        );
        let adapter = HttpProviderAdapter::new(Duration::from_secs(5)).unwrap();
        let response = adapter
            .execute(
                GenerationRequest::new(GenerationKind::Text, "write", cfg)
                    .with_system_prompt("be brief"),
            )
            .await
            .unwrap();
        assert_eq!(response.content, "# Slide");
        assert_eq!(response.tokens_used, TokenUsage { input: 12, output: 3 });
    }

    #[tokio::test]
    async fn image_generation_returns_data_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-3-pro-image-preview:generateContent"))
            .and(body_partial_json(json!({
                "generationConfig": {
                    "responseModalities": ["TEXT", "IMAGE"],
                    "imageConfig": { "aspectRatio": "16:9", "imageSize": "2K" }
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{ "content": { "parts": [
                    { "text": "here you go" },
                    { "inlineData": { "mimeType": "image/png", "data": "iVBORw0KGgo=" } }
                ] } }],
                "usageMetadata": { "promptTokenCount": 20, "candidatesTokenCount": 1290 }
            })))
            .mount(&server)
            .await;

        let adapter = HttpProviderAdapter::new(Duration::from_secs(5)).unwrap();
        let request = GenerationRequest::new(
            GenerationKind::Image,
            "draw",
            config(&server, GenerationKind::Image, "gemini-3-pro-image-preview"),
        )
        .with_references(vec![ReferenceAsset::Url("https://x/logo.jpg".into())]);
        let response = adapter.execute(request).await.unwrap();
        assert_eq!(
            response.image_url.as_deref(),
            Some("data:image/png;base64,iVBORw0KGgo=")
        );
        assert_eq!(response.tokens_used.output, 1290);
    }

    #[test]
    fn image_response_without_image_is_malformed() {
        let request = GenerationRequest::new(
            GenerationKind::Image,
            "draw",
            ProviderConfig::new("g", GenerationKind::Image, ProviderKind::Google, "k"),
        );
        let body = json!({ "candidates": [{ "content": { "parts": [{ "text": "sorry" }] } }] });
        let err = GoogleProvider.parse_response(&request, body).unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse { .. }));
    }

    #[test]
    fn blocked_prompt_is_reported() {
        let request = GenerationRequest::new(
            GenerationKind::Text,
            "x",
            ProviderConfig::new("g", GenerationKind::Text, ProviderKind::Google, "k"),
        );
        let err = GoogleProvider
            .parse_response(&request, json!({ "promptFeedback": { "blockReason": "SAFETY" } }))
            .unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn references_become_inline_or_file_parts() {
        let inline = reference_part(&ReferenceAsset::Inline {
            mime_type: "image/jpeg".into(),
            data: b"hello".to_vec(),
        });
        assert_eq!(inline["inlineData"]["data"], "aGVsbG8=");
        let remote = reference_part(&ReferenceAsset::Url("https://x/a.png".into()));
        assert_eq!(remote["fileData"]["fileUri"], "https://x/a.png");
    }
}
