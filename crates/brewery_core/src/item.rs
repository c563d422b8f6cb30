use std::collections::HashSet;

use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ItemStatus {
    #[default]
    Pending,
    Fetched,
    Transformed,
    Failed,
    Persisted,
}

impl ItemStatus {
    /// `Failed` and `Persisted` are final; every other move goes forward
    /// through pending, fetched, transformed, persisted.
    pub fn can_move_to(self, next: ItemStatus) -> bool {
        match (self, next) {
            (ItemStatus::Failed | ItemStatus::Persisted, _) => false,
            (_, ItemStatus::Failed) => true,
            _ => next.rank() >= self.rank(),
        }
    }

    fn rank(self) -> u8 {
        match self {
            ItemStatus::Pending => 0,
            ItemStatus::Fetched => 1,
            ItemStatus::Transformed => 2,
            ItemStatus::Persisted | ItemStatus::Failed => 3,
        }
    }
}

/// One unit of work: an article URL, a newsletter body, a video transcript.
///
/// A work item is owned by exactly one pipeline run; workers take it by value
/// and hand it back together with their stage result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    key: String,
    ordinal: usize,
    payload: String,
    content: Option<String>,
    status: ItemStatus,
}

impl WorkItem {
    /// Creates an item whose identity key is derived from the payload.
    pub fn new(ordinal: usize, payload: impl Into<String>) -> Self {
        let payload = payload.into();
        let key = identity_key(&payload);
        Self::with_key(ordinal, key, payload)
    }

    pub fn with_key(ordinal: usize, key: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ordinal,
            payload: payload.into(),
            content: None,
            status: ItemStatus::Pending,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Output of the last completed stage, if any.
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    /// Text the next stage should work on: the latest stage output, or the
    /// raw payload before any stage ran.
    pub fn input(&self) -> &str {
        self.content.as_deref().unwrap_or(&self.payload)
    }

    pub fn status(&self) -> ItemStatus {
        self.status
    }

    /// Stores a stage's output and moves the status forward. A backwards
    /// move is refused and leaves the item untouched.
    pub fn advance(&mut self, output: String, status: ItemStatus) -> bool {
        if !self.status.can_move_to(status) {
            return false;
        }
        self.content = Some(output);
        self.status = status;
        true
    }

    pub fn mark_failed(&mut self) -> bool {
        self.move_to(ItemStatus::Failed)
    }

    pub fn mark_persisted(&mut self) -> bool {
        self.move_to(ItemStatus::Persisted)
    }

    fn move_to(&mut self, status: ItemStatus) -> bool {
        let allowed = self.status.can_move_to(status);
        if allowed {
            self.status = status;
        }
        allowed
    }
}

/// Stable identity of a payload: the canonical URL for http(s) payloads,
/// the trimmed text otherwise.
pub fn identity_key(payload: &str) -> String {
    normalize_url_for_dedupe(payload).unwrap_or_else(|| payload.trim().to_string())
}

/// Canonical form used to detect duplicate URLs: lowercase scheme and host,
/// default port and fragment dropped, trailing slash trimmed.
pub fn normalize_url_for_dedupe(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    let mut normalized = url.to_string();
    if url.query().is_none() && normalized.ends_with('/') {
        normalized.pop();
    }
    Some(normalized)
}

/// Keeps the first item for every identity key and renumbers ordinals so they
/// stay contiguous. Returns the surviving items and the number dropped.
pub fn dedupe_items(items: Vec<WorkItem>) -> (Vec<WorkItem>, usize) {
    let before = items.len();
    let mut seen = HashSet::with_capacity(before);
    let mut kept: Vec<WorkItem> = items
        .into_iter()
        .filter(|item| seen.insert(item.key.clone()))
        .collect();
    for (ordinal, item) in kept.iter_mut().enumerate() {
        item.ordinal = ordinal;
    }
    let dropped = before - kept.len();
    (kept, dropped)
}

/// An ordered, bounded group of items; the unit of persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    index: usize,
    items: Vec<WorkItem>,
}

impl Batch {
    pub fn new(index: usize, items: Vec<WorkItem>) -> Self {
        Self { index, items }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn items(&self) -> &[WorkItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(WorkItem::key)
    }

    pub fn into_items(self) -> Vec<WorkItem> {
        self.items
    }

    /// Restores submission order after out-of-order stage completion.
    pub fn sort_by_ordinal(&mut self) {
        self.items.sort_by_key(WorkItem::ordinal);
    }
}

pub fn split_into_batches(items: Vec<WorkItem>, size: usize) -> Vec<Batch> {
    let size = size.max(1);
    let mut batches = Vec::with_capacity(items.len().div_ceil(size));
    let mut current = Vec::with_capacity(size);
    for item in items {
        current.push(item);
        if current.len() == size {
            let index = batches.len();
            batches.push(Batch::new(index, std::mem::take(&mut current)));
        }
    }
    if !current.is_empty() {
        let index = batches.len();
        batches.push(Batch::new(index, current));
    }
    batches
}
