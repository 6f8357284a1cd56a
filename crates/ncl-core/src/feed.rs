//! Feed Store
//!
//! Fixed-capacity ring of recent posts, newest first. Entries reference
//! authors by [`IdentityKey`] only; the identity cache owns all metadata.

use crate::identity::IdentityKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub content: String,
    pub identity: IdentityKey,
    pub timestamp: u64,
}

/// Cut `text` to at most `max` bytes without splitting a UTF-8 character.
pub fn truncate_on_char_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

pub struct FeedStore {
    /// Ring storage; `slots[(head + n) % cap]` is the n-th newest entry
    slots: Vec<Option<FeedEntry>>,
    head: usize,
    len: usize,
    max_content_len: usize,
    /// First visible row (0 = newest)
    view_first: usize,
    view_rows: usize,
}

impl FeedStore {
    pub fn new(capacity: usize, max_content_len: usize, visible_rows: usize) -> Self {
        assert!(capacity > 0, "feed capacity must be non-zero");
        Self {
            slots: vec![None; capacity],
            head: 0,
            len: 0,
            max_content_len,
            view_first: 0,
            view_rows: visible_rows,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Insert as the newest entry; the oldest falls off when full.
    pub fn push(&mut self, identity: IdentityKey, content: &str, timestamp: u64) {
        let cap = self.slots.len();
        self.head = (self.head + cap - 1) % cap;
        self.slots[self.head] = Some(FeedEntry {
            content: truncate_on_char_boundary(content, self.max_content_len).to_string(),
            identity,
            timestamp,
        });
        self.len = (self.len + 1).min(cap);
    }

    /// Entry at row `n` (0 = newest).
    pub fn get(&self, n: usize) -> Option<&FeedEntry> {
        if n >= self.len {
            return None;
        }
        self.slots[(self.head + n) % self.slots.len()].as_ref()
    }

    /// All entries, newest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &FeedEntry> + '_ {
        (0..self.len).filter_map(move |n| self.get(n))
    }

    /// Whether any stored row was posted by `identity`.
    pub fn references(&self, identity: &IdentityKey) -> bool {
        self.iter().any(|row| &row.identity == identity)
    }

    /// Move the viewport the renderer is showing.
    pub fn set_viewport(&mut self, first: usize, rows: usize) {
        self.view_first = first;
        self.view_rows = rows;
    }

    /// Entries currently on screen, newest first.
    pub fn visible(&self) -> impl DoubleEndedIterator<Item = &FeedEntry> + '_ {
        let end = (self.view_first + self.view_rows).min(self.len);
        let start = self.view_first.min(end);
        (start..end).filter_map(move |n| self.get(n))
    }
}
