//! Static price table for cost estimation.
//!
//! Prices are dollars per 1K tokens with separate input and output rates.
//! Models missing from the table fall back to [`ModelPricing::fallback`], so
//! an estimate is always produced.
//!
//! ```
//! use edgequake_slides::pricing::calculate_cost;
//!
//! // gpt-4o: $0.005 / 1K input, $0.015 / 1K output
//! let cost = calculate_cost("gpt-4o", 2_000, 1_000);
//! assert!((cost - 0.025).abs() < 1e-9);
//! ```

use once_cell::sync::Lazy;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    /// $ per 1K input tokens
    pub input_per_1k: f64,
    /// $ per 1K output tokens
    pub output_per_1k: f64,
}

impl ModelPricing {
    const fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }

    /// Rate applied to models absent from the table.
    pub const fn fallback() -> Self {
        Self::new(0.001, 0.002)
    }
}

static PRICING_TABLE: Lazy<HashMap<&'static str, ModelPricing>> = Lazy::new(|| {
    let mut m = HashMap::new();

    // Google
    m.insert("gemini-2.5-flash", ModelPricing::new(0.0003, 0.0025));
    m.insert("gemini-1.5-pro", ModelPricing::new(0.00125, 0.005));
    m.insert("gemini-1.5-flash", ModelPricing::new(0.000075, 0.0003));
    m.insert("gemini-1.0-pro", ModelPricing::new(0.0005, 0.0015));
    m.insert("gemini-3-pro-image-preview", ModelPricing::new(0.002, 0.12));

    // OpenAI
    m.insert("gpt-4o", ModelPricing::new(0.005, 0.015));
    m.insert("gpt-4o-mini", ModelPricing::new(0.00015, 0.0006));
    m.insert("gpt-4-turbo", ModelPricing::new(0.01, 0.03));
    m.insert("gpt-4", ModelPricing::new(0.03, 0.06));
    m.insert("gpt-3.5-turbo", ModelPricing::new(0.0005, 0.0015));

    // Anthropic
    m.insert("claude-3-5-sonnet-20241022", ModelPricing::new(0.003, 0.015));
    m.insert("claude-3-sonnet-20240229", ModelPricing::new(0.003, 0.015));
    m.insert("claude-3-haiku-20240307", ModelPricing::new(0.00025, 0.00125));
    m.insert("claude-3-opus-20240229", ModelPricing::new(0.015, 0.075));

    // Qwen
    m.insert("qwen-max", ModelPricing::new(0.0024, 0.0096));
    m.insert("qwen-plus", ModelPricing::new(0.0008, 0.002));
    m.insert("qwen-turbo", ModelPricing::new(0.0003, 0.0006));
    m.insert("qwen-long", ModelPricing::new(0.0005, 0.002));

    // Baidu
    m.insert("ernie-4.0-8k", ModelPricing::new(0.0042, 0.0084));
    m.insert("ernie-3.5-8k", ModelPricing::new(0.0017, 0.0017));
    m.insert("ernie-speed-8k", ModelPricing::new(0.0, 0.0));
    m.insert("ernie-lite-8k", ModelPricing::new(0.0, 0.0));

    // OpenAI-compatible
    m.insert("deepseek-chat", ModelPricing::new(0.00027, 0.0011));
    m.insert("deepseek-v3.2", ModelPricing::new(0.00028, 0.00042));
    m.insert("glm-4-plus", ModelPricing::new(0.0007, 0.0007));
    m.insert("moonshot-v1-8k", ModelPricing::new(0.0017, 0.0017));

    m
});

/// Pricing for `model`, or the fallback rate when the model is unknown.
pub fn get_pricing(model: &str) -> ModelPricing {
    PRICING_TABLE
        .get(model)
        .copied()
        .unwrap_or_else(ModelPricing::fallback)
}

/// Estimated cost in dollars for one request.
///
/// ```text
/// cost = input / 1000 × input_rate + output / 1000 × output_rate
/// ```
pub fn calculate_cost(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    let p = get_pricing(model);
    (input_tokens as f64 / 1000.0) * p.input_per_1k
        + (output_tokens as f64 / 1000.0) * p.output_per_1k
}
