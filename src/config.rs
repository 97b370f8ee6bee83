//! Configuration types for slide generation.
//!
//! Two kinds of configuration live here:
//!
//! * [`ProviderConfig`]: one user-managed provider entry (which service,
//!   which credentials, which model, tuning knobs). These are stored by the
//!   [`crate::resolver::ProviderConfigStore`] and exported/imported as JSON,
//!   so they serialise in camelCase.
//!
//! * [`OrchestratorConfig`]: process-level knobs for the
//!   [`crate::orchestrator::Orchestrator`] (timeouts, deck concurrency, prompt
//!   overrides), built through [`OrchestratorConfigBuilder`].

use crate::error::SlidesError;
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Enums ────────────────────────────────────────────────────────────────

/// What a provider call produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationKind {
    /// Slide text content generated from the outline.
    Text,
    /// Slide image generated from the content.
    Image,
}

impl GenerationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationKind::Text => "text",
            GenerationKind::Image => "image",
        }
    }
}

impl fmt::Display for GenerationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The third-party service behind a [`ProviderConfig`].
///
/// Adding a provider means adding a variant here and an adapter in
/// [`crate::providers`]; the compiler then points at every match that needs
/// updating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "google")]
    Google,
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "qwen")]
    Qwen,
    #[serde(rename = "baidu")]
    Baidu,
    #[serde(rename = "openai_compatible")]
    OpenAiCompatible,
}

impl ProviderKind {
    /// All providers, in the order they are listed to users.
    pub const ALL: [ProviderKind; 6] = [
        ProviderKind::Google,
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Qwen,
        ProviderKind::Baidu,
        ProviderKind::OpenAiCompatible,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Google => "google",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Qwen => "qwen",
            ProviderKind::Baidu => "baidu",
            ProviderKind::OpenAiCompatible => "openai_compatible",
        }
    }

    /// Base URL used when the config leaves `base_url` empty.
    ///
    /// `None` means the provider has no canonical endpoint and a base URL is
    /// mandatory.
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            ProviderKind::Google => Some("https://generativelanguage.googleapis.com/v1beta"),
            ProviderKind::OpenAi => Some("https://api.openai.com/v1"),
            ProviderKind::Anthropic => Some("https://api.anthropic.com/v1"),
            ProviderKind::Qwen => Some("https://dashscope.aliyuncs.com/compatible-mode/v1"),
            ProviderKind::Baidu => Some("https://aip.baidubce.com"),
            ProviderKind::OpenAiCompatible => None,
        }
    }

    /// Whether the provider can serve the given generation kind at all.
    pub fn supports(&self, kind: GenerationKind) -> bool {
        match (self, kind) {
            (_, GenerationKind::Text) => true,
            (ProviderKind::Anthropic, GenerationKind::Image) => false,
            (_, GenerationKind::Image) => true,
        }
    }

    /// Whether reference images can condition a `kind` request.
    ///
    /// Only Gemini accepts image inputs for image generation; the OpenAI
    /// family takes them as vision input on chat completions.
    pub fn supports_references(&self, kind: GenerationKind) -> bool {
        match (self, kind) {
            (ProviderKind::Google, _) => true,
            (ProviderKind::Baidu, _) => false,
            (_, GenerationKind::Text) => true,
            (_, GenerationKind::Image) => false,
        }
    }

    /// Whether the provider requires a secondary secret (api key + secret
    /// exchanged for a bearer token).
    pub fn requires_secret_key(&self) -> bool {
        matches!(self, ProviderKind::Baidu)
    }

    /// Models offered to users for this provider and kind.
    pub fn known_models(&self, kind: GenerationKind) -> &'static [&'static str] {
        match (self, kind) {
            (ProviderKind::Google, GenerationKind::Text) => &[
                "gemini-2.5-flash",
                "gemini-1.5-pro",
                "gemini-1.5-flash",
                "gemini-1.0-pro",
            ],
            (ProviderKind::Google, GenerationKind::Image) => &[
                "gemini-3-pro-image-preview",
                "imagen-3.0-generate-001",
                "imagen-2.0",
            ],
            (ProviderKind::OpenAi, GenerationKind::Text) => &[
                "gpt-4o",
                "gpt-4o-mini",
                "gpt-4-turbo",
                "gpt-4",
                "gpt-3.5-turbo",
            ],
            (ProviderKind::OpenAi, GenerationKind::Image) => &["dall-e-3", "dall-e-2"],
            (ProviderKind::Anthropic, GenerationKind::Text) => &[
                "claude-3-5-sonnet-20241022",
                "claude-3-sonnet-20240229",
                "claude-3-haiku-20240307",
                "claude-3-opus-20240229",
            ],
            (ProviderKind::Anthropic, GenerationKind::Image) => &[],
            (ProviderKind::Qwen, GenerationKind::Text) => &[
                "qwen-max",
                "qwen-plus",
                "qwen-turbo",
                "qwen-long",
                "qwen2.5-72b-instruct",
                "qwen2.5-32b-instruct",
            ],
            (ProviderKind::Qwen, GenerationKind::Image) => &["qwen-vl-plus", "qwen-vl-max"],
            (ProviderKind::Baidu, GenerationKind::Text) => &[
                "ernie-4.0-8k",
                "ernie-3.5-8k",
                "ernie-turbo-8k",
                "ernie-speed-8k",
                "ernie-lite-8k",
            ],
            (ProviderKind::Baidu, GenerationKind::Image) => {
                &["stable-diffusion-xl", "stable-diffusion-v1.5"]
            }
            (ProviderKind::OpenAiCompatible, GenerationKind::Text) => &[
                "deepseek-v3.2",
                "deepseek-chat",
                "glm-4-plus",
                "glm-4-0520",
                "moonshot-v1-8k",
                "moonshot-v1-32k",
            ],
            (ProviderKind::OpenAiCompatible, GenerationKind::Image) => &[
                "flux-pro-1.1",
                "flux-dev",
                "flux-schnell",
                "stable-diffusion-3-large",
            ],
        }
    }

    /// Model used when a config leaves `model` empty.
    pub fn default_model(&self, kind: GenerationKind) -> Option<&'static str> {
        self.known_models(kind).first().copied()
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Provider config ──────────────────────────────────────────────────────

/// Provider-tunable parameters. Every field is optional; adapters fall back
/// to their own defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Image aspect ratio such as `"16:9"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    /// Image resolution such as `"2K"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    /// Thinking mode for OpenAI-compatible reasoning models (e.g. DeepSeek).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_thinking: Option<bool>,
}

/// One user-managed provider entry.
///
/// `Debug` is implemented by hand so credentials never reach log output.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub id: String,
    /// Display name chosen by the user.
    #[serde(default)]
    pub name: String,
    pub kind: GenerationKind,
    pub provider: ProviderKind,
    #[serde(default)]
    pub api_key: String,
    /// Second credential for providers that exchange key + secret for a token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, flatten)]
    pub params: ProviderParams,
}

fn default_enabled() -> bool {
    true
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("provider", &self.provider)
            .field("api_key", &redact(&self.api_key))
            .field("secret_key", &self.secret_key.as_deref().map(redact))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("enabled", &self.enabled)
            .field("params", &self.params)
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<empty>"
    } else {
        "<redacted>"
    }
}

impl ProviderConfig {
    /// Start a config with the provider's default model, enabled.
    pub fn new(
        id: impl Into<String>,
        kind: GenerationKind,
        provider: ProviderKind,
        api_key: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
            provider,
            api_key: api_key.into(),
            secret_key: None,
            base_url: None,
            model: provider.default_model(kind).unwrap_or_default().to_string(),
            enabled: true,
            params: ProviderParams::default(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_secret_key(mut self, secret: impl Into<String>) -> Self {
        self.secret_key = Some(secret.into());
        self
    }

    pub fn with_params(mut self, params: ProviderParams) -> Self {
        self.params = params;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// The base URL to call, without a trailing slash.
    ///
    /// Falls back to the provider's canonical endpoint; empty when neither is
    /// available (validation rejects that case).
    pub fn effective_base_url(&self) -> String {
        let raw = self
            .base_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .or_else(|| self.provider.default_base_url())
            .unwrap_or_default();
        raw.trim().trim_end_matches('/').to_string()
    }

    /// The model to request, falling back to the provider default.
    pub fn effective_model(&self) -> String {
        if self.model.trim().is_empty() {
            self.provider
                .default_model(self.kind)
                .unwrap_or_default()
                .to_string()
        } else {
            self.model.trim().to_string()
        }
    }
}

/// Outcome of [`validate`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Check a provider config for usability.
///
/// Errors make the config unusable as a default (the orchestrator turns them
/// into [`SlidesError::ConfigMissing`]); warnings are advisory.
pub fn validate(config: &ProviderConfig) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if !config.enabled {
        errors.push(format!("Provider '{}' is disabled", config.id));
    }
    if config.api_key.trim().is_empty() {
        errors.push("API key is required".to_string());
    }
    if config.provider.requires_secret_key()
        && config
            .secret_key
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .is_empty()
    {
        errors.push(format!("{} requires a secret key", config.provider));
    }
    if !config.provider.supports(config.kind) {
        errors.push(format!(
            "{} does not support {} generation",
            config.provider, config.kind
        ));
    }

    let base_url = config.effective_base_url();
    if base_url.is_empty() {
        errors.push(format!("{} requires a base URL", config.provider));
    } else if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        errors.push(format!("Base URL '{base_url}' must start with http:// or https://"));
    } else if base_url.starts_with("http://") {
        warnings.push("Base URL is not using HTTPS".to_string());
    }

    if config.effective_model().is_empty() {
        errors.push("Model is required".to_string());
    } else if !config.model.trim().is_empty()
        && !config
            .provider
            .known_models(config.kind)
            .contains(&config.model.trim())
    {
        warnings.push(format!(
            "Model '{}' is not in the known model list for {}",
            config.model.trim(),
            config.provider
        ));
    }

    if let Some(t) = config.params.temperature {
        if !(0.0..=2.0).contains(&t) {
            warnings.push(format!("Temperature {t} is outside 0.0–2.0"));
        }
    }
    if config.params.max_tokens == Some(0) {
        errors.push("maxTokens must be greater than 0".to_string());
    }
    if config.kind == GenerationKind::Image && config.params.aspect_ratio.is_none() {
        warnings.push("No aspect ratio set; the deck default will be used".to_string());
    }

    ValidationReport {
        is_valid: errors.is_empty(),
        errors,
        warnings,
    }
}

// ── Orchestrator config ──────────────────────────────────────────────────

/// Process-level configuration for the orchestrator.
///
/// Built via [`OrchestratorConfig::builder()`] or
/// [`OrchestratorConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_slides::OrchestratorConfig;
///
/// let config = OrchestratorConfig::builder()
///     .request_timeout_secs(600)
///     .deck_concurrency(4)
///     .build()
///     .unwrap();
/// assert_eq!(config.deck_concurrency, 4);
/// ```
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Per-provider-call timeout in seconds. Default: 300.
    ///
    /// Image models routinely take over a minute; expiry is reported as a
    /// network error on the page.
    pub request_timeout_secs: u64,

    /// Concurrent pages for whole-deck generation. Default: 8.
    ///
    /// Only [`crate::orchestrator::Orchestrator::generate_deck`] is bounded;
    /// batch retry dispatches every selected page at once.
    pub deck_concurrency: usize,

    /// System prompt for page-content generation. If None, uses built-in default.
    pub system_prompt: Option<String>,

    /// Free-form requirements appended to every image prompt.
    pub extra_requirements: Option<String>,

    /// Aspect ratio used when the image provider config sets none. Default: "16:9".
    pub default_aspect_ratio: String,

    /// Resolution used when the image provider config sets none. Default: "2K".
    pub default_resolution: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 300,
            deck_concurrency: 8,
            system_prompt: None,
            extra_requirements: None,
            default_aspect_ratio: "16:9".to_string(),
            default_resolution: "2K".to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Create a new builder for `OrchestratorConfig`.
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`OrchestratorConfig`].
#[derive(Debug)]
pub struct OrchestratorConfigBuilder {
    config: OrchestratorConfig,
}

impl OrchestratorConfigBuilder {
    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn deck_concurrency(mut self, n: usize) -> Self {
        self.config.deck_concurrency = n.max(1);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn extra_requirements(mut self, text: impl Into<String>) -> Self {
        self.config.extra_requirements = Some(text.into());
        self
    }

    pub fn default_aspect_ratio(mut self, ratio: impl Into<String>) -> Self {
        self.config.default_aspect_ratio = ratio.into();
        self
    }

    pub fn default_resolution(mut self, resolution: impl Into<String>) -> Self {
        self.config.default_resolution = resolution.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<OrchestratorConfig, SlidesError> {
        let c = &self.config;
        if c.request_timeout_secs == 0 {
            return Err(SlidesError::InvalidConfig(
                "Request timeout must be ≥ 1 second".into(),
            ));
        }
        if !is_aspect_ratio(&c.default_aspect_ratio) {
            return Err(SlidesError::InvalidConfig(format!(
                "Aspect ratio must look like W:H, got '{}'",
                c.default_aspect_ratio
            )));
        }
        Ok(self.config)
    }
}

fn is_aspect_ratio(s: &str) -> bool {
    match s.split_once(':') {
        Some((w, h)) => {
            matches!(w.trim().parse::<u32>(), Ok(w) if w > 0)
                && matches!(h.trim().parse::<u32>(), Ok(h) if h > 0)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_config() -> ProviderConfig {
        ProviderConfig::new("t1", GenerationKind::Text, ProviderKind::OpenAi, "sk-test")
    }

    #[test]
    fn new_config_uses_provider_default_model() {
        let c = text_config();
        assert_eq!(c.model, "gpt-4o");
        assert_eq!(c.effective_base_url(), "https://api.openai.com/v1");
        assert!(validate(&c).is_valid);
    }

    #[test]
    fn empty_key_is_an_error() {
        let c = ProviderConfig::new("t1", GenerationKind::Text, ProviderKind::Google, "  ");
        let report = validate(&c);
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.contains("API key")));
    }

    #[test]
    fn disabled_config_is_unusable() {
        let report = validate(&text_config().enabled(false));
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.contains("disabled")));
    }

    #[test]
    fn only_gemini_takes_references_for_images() {
        for kind in ProviderKind::ALL {
            assert_eq!(
                kind.supports_references(GenerationKind::Image),
                kind == ProviderKind::Google,
                "{kind}"
            );
        }
        assert!(ProviderKind::OpenAiCompatible.supports_references(GenerationKind::Text));
        assert!(!ProviderKind::Baidu.supports_references(GenerationKind::Text));
    }

    #[test]
    fn baidu_needs_secret_key() {
        let c = ProviderConfig::new("b", GenerationKind::Text, ProviderKind::Baidu, "ak");
        assert!(!validate(&c).is_valid);
        assert!(validate(&c.with_secret_key("sk")).is_valid);
    }

    #[test]
    fn openai_compatible_needs_base_url() {
        let c = ProviderConfig::new(
            "c",
            GenerationKind::Text,
            ProviderKind::OpenAiCompatible,
            "key",
        );
        let report = validate(&c);
        assert!(report.errors.iter().any(|e| e.contains("base URL")));
        let ok = c.with_base_url("https://api.deepseek.com/v1/");
        assert_eq!(ok.effective_base_url(), "https://api.deepseek.com/v1");
        assert!(validate(&ok).is_valid);
    }

    #[test]
    fn anthropic_cannot_generate_images() {
        let c = ProviderConfig::new("a", GenerationKind::Image, ProviderKind::Anthropic, "key");
        let report = validate(&c);
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.contains("does not support image")));
    }

    #[test]
    fn unknown_model_and_plain_http_are_warnings() {
        let c = text_config()
            .with_model("gpt-9-preview")
            .with_base_url("http://localhost:8080/v1");
        let report = validate(&c);
        assert!(report.is_valid, "{report:?}");
        assert_eq!(report.warnings.len(), 2, "{report:?}");
    }

    #[test]
    fn debug_redacts_credentials() {
        let c = ProviderConfig::new("b", GenerationKind::Text, ProviderKind::Baidu, "ak-123")
            .with_secret_key("sk-456");
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("ak-123"));
        assert!(!dbg.contains("sk-456"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn serialises_camel_case_with_flattened_params() {
        let c = text_config().with_params(ProviderParams {
            max_tokens: Some(2048),
            enable_thinking: Some(true),
            ..Default::default()
        });
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["apiKey"], "sk-test");
        assert_eq!(json["maxTokens"], 2048);
        assert_eq!(json["enableThinking"], true);
        assert_eq!(json["provider"], "openai");
        let back: ProviderConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn builder_defaults_and_validation() {
        let c = OrchestratorConfig::default();
        assert_eq!(c.request_timeout_secs, 300);
        assert_eq!(c.deck_concurrency, 8);

        let err = OrchestratorConfig::builder()
            .request_timeout_secs(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, SlidesError::InvalidConfig(_)));

        let err = OrchestratorConfig::builder()
            .default_aspect_ratio("wide")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("W:H"));

        let c = OrchestratorConfig::builder().deck_concurrency(0).build().unwrap();
        assert_eq!(c.deck_concurrency, 1);
    }
}
