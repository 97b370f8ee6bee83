//! Page repository: the collection of pages the orchestrator mutates.
//!
//! Page persistence and CRUD belong to the host application; the orchestrator
//! only needs to read a page, apply an atomic edit to it, and list a project.
//! [`InMemoryPageRepository`] is the implementation used by the CLI and tests.

use crate::model::{DeckFile, Page};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Storage seam for pages.
///
/// `update` must apply the edit under the repository's own mutual exclusion
/// so concurrent jobs for different pages never interleave a write.
pub trait PageRepository: Send + Sync {
    fn get(&self, page_id: &str) -> Option<Page>;

    /// Apply `edit` to the stored page and return the updated copy.
    /// Returns `None` when the page does not exist.
    fn update(&self, page_id: &str, edit: &mut dyn FnMut(&mut Page)) -> Option<Page>;

    /// Pages of a project, sorted by `order`.
    fn pages_for_project(&self, project_id: &str) -> Vec<Page>;
}

#[derive(Debug, Default)]
pub struct InMemoryPageRepository {
    pages: RwLock<HashMap<String, Page>>,
}

impl InMemoryPageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_deck(deck: DeckFile) -> Self {
        let repo = Self::new();
        for mut page in deck.pages {
            if page.project_id.is_empty() {
                page.project_id = deck.project_id.clone();
            }
            repo.insert(page);
        }
        repo
    }

    /// Insert or replace a page.
    pub fn insert(&self, page: Page) {
        self.pages.write().insert(page.id.clone(), page);
    }

    pub fn remove(&self, page_id: &str) -> Option<Page> {
        self.pages.write().remove(page_id)
    }

    pub fn len(&self) -> usize {
        self.pages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.read().is_empty()
    }

    /// Snapshot of a project as a deck document.
    pub fn to_deck(&self, project_id: &str) -> DeckFile {
        DeckFile {
            project_id: project_id.to_string(),
            pages: self.pages_for_project(project_id),
        }
    }
}

impl PageRepository for InMemoryPageRepository {
    fn get(&self, page_id: &str) -> Option<Page> {
        self.pages.read().get(page_id).cloned()
    }

    fn update(&self, page_id: &str, edit: &mut dyn FnMut(&mut Page)) -> Option<Page> {
        let mut pages = self.pages.write();
        let page = pages.get_mut(page_id)?;
        edit(page);
        Some(page.clone())
    }

    fn pages_for_project(&self, project_id: &str) -> Vec<Page> {
        let mut pages: Vec<Page> = self
            .pages
            .read()
            .values()
            .filter(|p| p.project_id == project_id)
            .cloned()
            .collect();
        pages.sort_by_key(|p| p.order);
        pages
    }
}
