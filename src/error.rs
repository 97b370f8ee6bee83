//! Error types for the edgequake-slides library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`SlidesError`]: **Fatal for one call**: the operation cannot proceed
//!   at all (no usable default provider, unknown page, unparseable config
//!   import). Nothing is mutated when one of these is returned before a
//!   provider call.
//!
//! * [`ProviderError`]: **Recoverable**: a provider call failed (bad key,
//!   throttling, transport failure, garbage payload). The orchestrator stores
//!   its message in [`crate::model::Page::last_error`] and marks the page
//!   FAILED; a later caller-initiated `generate` may succeed.
//!
//! Both are `Clone` because one in-flight job result is shared by every
//! caller waiting on the same page.

use crate::config::GenerationKind;
use thiserror::Error;

/// All fatal errors returned by the edgequake-slides library.
#[derive(Debug, Clone, Error)]
pub enum SlidesError {
    // ── Configuration ─────────────────────────────────────────────────────
    /// No usable default provider for a kind the page needs.
    ///
    /// Raised before any network call and before the page status is touched.
    #[error("No usable default {kind} provider: {reason}\nConfigure one with `slides config import`.")]
    ConfigMissing { kind: GenerationKind, reason: String },

    /// A config import document could not be parsed or is inconsistent.
    ///
    /// The previous provider configuration is left untouched.
    #[error("Failed to parse provider configuration: {0}")]
    ConfigParse(String),

    /// Builder or store validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pages ─────────────────────────────────────────────────────────────
    /// The page id does not exist in the repository.
    #[error("Page '{page_id}' not found")]
    PageNotFound { page_id: String },

    /// The page has no image version with this number.
    #[error("Page '{page_id}' has no image version {version}")]
    ImageVersionNotFound { page_id: String, version: u32 },

    /// The request cannot be applied to the page as it is now (editing a
    /// page without an image, an empty edit instruction, switching versions
    /// mid-generation). Nothing is mutated.
    #[error("Cannot {action} page '{page_id}': {reason}")]
    InvalidRequest {
        page_id: String,
        action: &'static str,
        reason: String,
    },

    // ── Providers ─────────────────────────────────────────────────────────
    /// The provider call failed; the page has been marked FAILED.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    // ── Storage ───────────────────────────────────────────────────────────
    /// Could not read or write a persisted document (config set, usage stats).
    #[error("Storage error at '{path}': {detail}")]
    Storage { path: String, detail: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (for example a panicked generation task).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SlidesError {
    /// The provider error behind this failure, if it came from a provider call.
    pub fn as_provider_error(&self) -> Option<&ProviderError> {
        match self {
            SlidesError::Provider(e) => Some(e),
            _ => None,
        }
    }
}

/// A recoverable error from a single provider call.
///
/// Never retried automatically; the message ends up in the page's
/// `last_error` and the user decides whether to retry.
#[derive(Debug, Clone, Error, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ProviderError {
    /// Missing or rejected credentials (HTTP 401/403, failed token exchange).
    #[error("Authentication failed for provider '{provider}': {detail}")]
    Auth { provider: String, detail: String },

    /// Provider throttled the request (HTTP 429 or provider quota code).
    #[error("Rate limit exceeded for provider '{provider}'{}", retry_hint(.retry_after_secs))]
    RateLimit {
        provider: String,
        retry_after_secs: Option<u64>,
    },

    /// Transport failure, timeout, or a non-success HTTP status.
    #[error("Network error talking to provider '{provider}': {detail}")]
    Network { provider: String, detail: String },

    /// The provider answered but the payload could not be understood.
    #[error("Malformed response from provider '{provider}': {detail}")]
    MalformedResponse { provider: String, detail: String },

    /// The provider cannot do what was asked (e.g. reference-image conditioning).
    #[error("Provider '{provider}' does not support {capability}")]
    UnsupportedCapability { provider: String, capability: String },
}

fn retry_hint(secs: &Option<u64>) -> String {
    match secs {
        Some(s) => format!(" (retry after {s}s)"),
        None => String::new(),
    }
}

impl ProviderError {
    /// Name of the provider that produced the error.
    pub fn provider(&self) -> &str {
        match self {
            ProviderError::Auth { provider, .. }
            | ProviderError::RateLimit { provider, .. }
            | ProviderError::Network { provider, .. }
            | ProviderError::MalformedResponse { provider, .. }
            | ProviderError::UnsupportedCapability { provider, .. } => provider,
        }
    }

    /// Whether retrying the same request later could plausibly succeed.
    ///
    /// Informational only: nothing in this crate retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimit { .. } | ProviderError::Network { .. }
        )
    }
}
