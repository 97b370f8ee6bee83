//! Prompts for slide content and slide image generation.
//!
//! All prompt text lives here so wording changes touch one file and tests can
//! inspect prompts without a provider. Callers can override the content
//! system prompt via [`crate::config::OrchestratorConfig::system_prompt`].

use crate::model::Page;
use once_cell::sync::Lazy;
use regex::Regex;

/// Default system prompt for page-content generation.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an expert presentation writer. You turn one entry of a slide deck outline into the content of that slide.

Follow these rules precisely:

1. CONTENT
   - Expand every bullet point of the outline entry; do not invent unrelated topics
   - Keep the text concise enough to fit on a single slide
   - Prefer short bullet points over paragraphs

2. STRUCTURE
   - Start with the slide title as a level-1 heading (#)
   - Use - for bullet points and at most one level of nesting
   - Use **bold** sparingly for key terms

3. OUTPUT FORMAT
   - Output ONLY the Markdown content of the slide
   - Do NOT wrap in ```markdown fences
   - Do NOT add commentary or speaker notes"#;

/// Instruction block appended when the page content references material images.
pub const MATERIAL_IMAGES_NOTE: &str = "Material images are attached as references. \
Place them naturally in the slide layout and keep their content recognisable.";

/// Prompt used by the connection test for text providers.
pub const TEST_TEXT_PROMPT: &str = "Hello, this is a test message. Please respond with 'OK'.";

/// Prompt used by the connection test for image providers.
pub const TEST_IMAGE_PROMPT: &str = "A simple test image of a blue circle";

/// Numbered list of slide titles (or parts), one per line.
pub fn outline_text(pages: &[Page]) -> String {
    pages
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let label = p
                .outline_content
                .part
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(p.outline_content.title.as_str());
            format!("{}. {}", i + 1, label)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// User prompt asking the text provider for one page's content.
///
/// `page_number` is 1-indexed.
pub fn page_content_prompt(
    deck_outline: &str,
    page: &Page,
    page_number: usize,
    total_pages: usize,
) -> String {
    let oc = &page.outline_content;
    let mut prompt = format!(
        "Deck outline:\n{deck_outline}\n\nWrite the content of slide {page_number} of {total_pages}.\n\nTitle: {}\n",
        oc.title
    );
    if let Some(part) = oc.part.as_deref().filter(|s| !s.trim().is_empty()) {
        prompt.push_str(&format!("This page belongs to: {part}\n"));
    }
    if !oc.points.is_empty() {
        prompt.push_str("Key points:\n");
        for point in &oc.points {
            prompt.push_str(&format!("- {point}\n"));
        }
    }
    prompt
}

/// Prompt for the image provider, built from the generated slide content.
///
/// Markdown image links are stripped from `content`; the images themselves
/// travel as reference assets.
pub fn image_prompt(
    deck_outline: &str,
    page: &Page,
    content: &str,
    has_material_images: bool,
    extra_requirements: Option<&str>,
) -> String {
    let section = page
        .outline_content
        .part
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(page.outline_content.title.as_str());
    let cleaned = remove_markdown_images(content);

    let mut prompt = format!(
        "Design a single presentation slide.\n\n\
         Deck outline:\n{deck_outline}\n\n\
         Current section: {section}\n\n\
         Slide content:\n{}\n\n\
         Render the text legibly, use a clean consistent layout, and keep the visual style coherent with a professional deck.",
        cleaned.trim()
    );
    if has_material_images {
        prompt.push_str("\n\n");
        prompt.push_str(MATERIAL_IMAGES_NOTE);
    }
    if let Some(extra) = extra_requirements.filter(|s| !s.trim().is_empty()) {
        prompt.push_str("\n\nAdditional requirements:\n");
        prompt.push_str(extra.trim());
    }
    prompt
}

static RE_IMAGE_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[[^\]]*\]\(([^)]*)\)").unwrap());
static RE_IMAGE_ALT: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\([^)]+\)").unwrap());
static RE_EXTRA_BLANKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n\s*\n").unwrap());

/// URLs of markdown images (`![alt](url)`) that point at remote resources or
/// uploaded files.
pub fn extract_image_urls_from_markdown(text: &str) -> Vec<String> {
    RE_IMAGE_URL
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|url| {
            url.starts_with("http://") || url.starts_with("https://") || url.starts_with("/files/")
        })
        .map(str::to_string)
        .collect()
}

/// Whether a provider can fetch `url` on its own: an absolute http(s) URL or
/// an inline `data:` URL. Relative `/files/...` links only resolve against
/// the host that served the deck.
pub fn is_fetchable_reference(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://") || url.starts_with("data:")
}

/// Prompt for redrawing an existing slide image from a natural-language
/// instruction. The current image travels as a reference asset.
pub fn image_edit_prompt(instruction: &str, original_content: Option<&str>) -> String {
    let description = original_content
        .map(remove_markdown_images)
        .filter(|c| !c.trim().is_empty());
    match description {
        Some(description) => format!(
            "Original description: {}\n\nEdit instruction: {}",
            description.trim(),
            instruction.trim()
        ),
        None => instruction.trim().to_string(),
    }
}

/// Replace `![alt](url)` with its alt text (or nothing) and collapse the
/// blank lines this leaves behind.
pub fn remove_markdown_images(text: &str) -> String {
    let replaced = RE_IMAGE_ALT.replace_all(text, |caps: &regex::Captures<'_>| {
        caps.get(1)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default()
    });
    RE_EXTRA_BLANKS.replace_all(&replaced, "\n\n").into_owned()
}
