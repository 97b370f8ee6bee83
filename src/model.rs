//! Data model: pages, their lifecycle status, image history, and batch outcomes.

use crate::config::GenerationKind;
use crate::error::SlidesError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Lifecycle status of one page.
///
/// `Completed` and `Failed` are not terminal: a later
/// [`crate::orchestrator::Orchestrator::generate`] call re-enters `Generating`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageStatus {
    #[default]
    Pending,
    Generating,
    Completed,
    Failed,
}

impl PageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageStatus::Pending => "PENDING",
            PageStatus::Generating => "GENERATING",
            PageStatus::Completed => "COMPLETED",
            PageStatus::Failed => "FAILED",
        }
    }

    /// Whether a generation attempt has finished at least once.
    pub fn is_settled(&self) -> bool {
        matches!(self, PageStatus::Completed | PageStatus::Failed)
    }
}

impl fmt::Display for PageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outline entry for one slide: a title and its bullet points.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlineContent {
    pub title: String,
    #[serde(default)]
    pub points: Vec<String>,
    /// Section the slide belongs to, when the outline is grouped into parts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part: Option<String>,
}

/// How an image version came to be.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImageOrigin {
    #[default]
    Generated,
    Edited,
}

/// One image a page has had. Versions are numbered from 1 in creation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageVersion {
    pub version: u32,
    pub image_url: String,
    #[serde(default)]
    pub origin: ImageOrigin,
    /// The edit instruction, for [`ImageOrigin::Edited`] versions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One slide's generation unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: String,
    #[serde(default)]
    pub project_id: String,
    /// Position in the deck (0-based).
    pub order: u32,
    pub outline_content: OutlineContent,
    #[serde(default)]
    pub status: PageStatus,
    /// Generated slide text, as markdown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Informational: how many times the page re-entered generation.
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Every image produced for this page, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_versions: Vec<ImageVersion>,
    /// The version `generated_image_url` points at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_image_version: Option<u32>,
}

impl Page {
    pub fn new(
        id: impl Into<String>,
        project_id: impl Into<String>,
        order: u32,
        outline_content: OutlineContent,
    ) -> Self {
        Self {
            id: id.into(),
            project_id: project_id.into(),
            order,
            outline_content,
            status: PageStatus::Pending,
            generated_content: None,
            generated_image_url: None,
            last_error: None,
            retry_count: 0,
            updated_at: None,
            image_versions: Vec::new(),
            current_image_version: None,
        }
    }

    pub fn has_content(&self) -> bool {
        self.generated_content
            .as_deref()
            .is_some_and(|c| !c.trim().is_empty())
    }

    /// Completed with a generated image: nothing left to do unless forced.
    pub fn is_done(&self) -> bool {
        self.status == PageStatus::Completed
            && self
                .generated_image_url
                .as_deref()
                .is_some_and(|u| !u.is_empty())
    }

    /// Record a new image and make it current. Returns its version number.
    ///
    /// An image the page carried from before versioning (a deck file that
    /// only has `generatedImageUrl`) is kept as version 1.
    pub fn push_image_version(
        &mut self,
        image_url: impl Into<String>,
        origin: ImageOrigin,
        instruction: Option<String>,
        at: DateTime<Utc>,
    ) -> u32 {
        if self.image_versions.is_empty() {
            if let Some(existing) = self.generated_image_url.clone().filter(|u| !u.is_empty()) {
                self.image_versions.push(ImageVersion {
                    version: 1,
                    image_url: existing,
                    origin: ImageOrigin::Generated,
                    instruction: None,
                    created_at: self.updated_at.unwrap_or(at),
                });
            }
        }
        let version = self.image_versions.iter().map(|v| v.version).max().unwrap_or(0) + 1;
        let image_url = image_url.into();
        self.image_versions.push(ImageVersion {
            version,
            image_url: image_url.clone(),
            origin,
            instruction,
            created_at: at,
        });
        self.generated_image_url = Some(image_url);
        self.current_image_version = Some(version);
        version
    }

    /// Point `generated_image_url` at an earlier version. Returns `false`
    /// when the version does not exist.
    pub fn select_image_version(&mut self, version: u32) -> bool {
        let Some(url) = self
            .image_versions
            .iter()
            .find(|v| v.version == version)
            .map(|v| v.image_url.clone())
        else {
            return false;
        };
        self.generated_image_url = Some(url);
        self.current_image_version = Some(version);
        true
    }

    pub fn current_image(&self) -> Option<&ImageVersion> {
        let current = self.current_image_version?;
        self.image_versions.iter().find(|v| v.version == current)
    }

    /// Provider kinds a generation run needs for this page.
    ///
    /// A page without text content needs both; one with content only needs an image.
    pub fn required_kinds(&self) -> Vec<GenerationKind> {
        if self.has_content() {
            vec![GenerationKind::Image]
        } else {
            vec![GenerationKind::Text, GenerationKind::Image]
        }
    }
}

/// A page that failed inside a batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageFailure {
    pub page_id: String,
    #[serde(serialize_with = "serialize_display")]
    pub error: SlidesError,
}

/// Settled outcome of a batch: every dispatched page lands in exactly one list.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub succeeded: Vec<String>,
    pub failed: Vec<PageFailure>,
}

impl BatchResult {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_full_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn push(&mut self, outcome: PageOutcome) {
        match outcome.result {
            Ok(_) => self.succeeded.push(outcome.page_id),
            Err(error) => self.failed.push(PageFailure {
                page_id: outcome.page_id,
                error,
            }),
        }
    }
}

/// One page's result as it settles, yielded by the streaming batch API.
#[derive(Debug, Clone)]
pub struct PageOutcome {
    pub page_id: String,
    pub result: Result<Page, SlidesError>,
}

/// On-disk deck document used by the CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeckFile {
    pub project_id: String,
    #[serde(default)]
    pub pages: Vec<Page>,
}

fn serialize_display<S: Serializer, T: fmt::Display>(v: &T, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(v)
}
