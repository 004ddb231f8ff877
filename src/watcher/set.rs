//! Named groups of watchers and the top-level dashboard.

use pharos_types::{DashboardView, SetView, Status};

use super::Watcher;

/// A named, ordered group of watchers.
#[derive(Debug, Clone)]
pub struct WatcherSet {
    name: String,
    watchers: Vec<Watcher>,
}

impl WatcherSet {
    pub fn new(name: impl Into<String>, watchers: Vec<Watcher>) -> Self {
        Self {
            name: name.into(),
            watchers,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Watchers in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &Watcher> {
        self.watchers.iter()
    }

    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }

    /// First watcher with the given id.
    pub fn find(&self, id: &str) -> Option<&Watcher> {
        self.watchers.iter().find(|w| w.id() == id)
    }

    /// Worst status among the set's watchers; `Ok` for an empty set.
    pub fn status(&self) -> Status {
        self.watchers
            .iter()
            .map(Watcher::status)
            .max()
            .unwrap_or_default()
    }

    pub fn view(&self) -> SetView {
        let watchers: Vec<_> = self.watchers.iter().map(Watcher::view).collect();
        SetView {
            name: self.name.clone(),
            status: watchers.iter().map(|w| w.status).max().unwrap_or_default(),
            watchers,
        }
    }
}

impl<'a> IntoIterator for &'a WatcherSet {
    type Item = &'a Watcher;
    type IntoIter = std::slice::Iter<'a, Watcher>;

    fn into_iter(self) -> Self::IntoIter {
        self.watchers.iter()
    }
}

/// Every watcher set shown on one page.
#[derive(Debug, Clone, Default)]
pub struct Dashboard {
    page_tag: String,
    sets: Vec<WatcherSet>,
}

impl Dashboard {
    pub fn new(page_tag: impl Into<String>, sets: Vec<WatcherSet>) -> Self {
        Self {
            page_tag: page_tag.into(),
            sets,
        }
    }

    /// Label shown in the page title.
    pub fn page_tag(&self) -> &str {
        &self.page_tag
    }

    pub fn sets(&self) -> &[WatcherSet] {
        &self.sets
    }

    /// Every watcher across all sets, in configuration order.
    pub fn watchers(&self) -> impl Iterator<Item = &Watcher> {
        self.sets.iter().flat_map(|set| set.iter())
    }

    /// First watcher with the given id across all sets.
    pub fn find(&self, id: &str) -> Option<&Watcher> {
        self.sets.iter().find_map(|set| set.find(id))
    }

    pub fn view(&self) -> DashboardView {
        DashboardView {
            page_tag: self.page_tag.clone(),
            sets: self.sets.iter().map(WatcherSet::view).collect(),
        }
    }
}
