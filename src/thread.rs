//! Thread assembly from a flat set of events.
//!
//! A thread is the opening post plus every event that links back to it under
//! either reply convention (see [`crate::linking`]). Relays return events in
//! no particular order and the same reply may arrive from several filters, so
//! assembly de-duplicates by id and imposes a deterministic order.

use std::collections::HashSet;

use crate::event::Event;
use crate::linking::{canonical, references_root};
use crate::media::{Dimensions, ImageMeta};
use crate::post_number::{extract_quote_refs, ReferenceMap};

/// Opening post with its replies, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thread {
    pub root: Event,
    pub replies: Vec<Event>,
    /// Subject line; empty when the root carries none.
    pub title: String,
    pub image_url: Option<String>,
    pub image_dimensions: Option<Dimensions>,
}

/// Thread title from NIP-14 `subject`, falling back to the legacy `title` tag.
pub fn thread_title(root: &Event) -> String {
    root.tag_value("subject")
        .or_else(|| root.tag_value("title"))
        .unwrap_or_default()
        .to_string()
}

/// Build a thread from its root and any candidate replies.
///
/// Candidates that do not link to `root` are dropped, as is the root itself.
pub fn assemble<I>(root: Event, candidates: I) -> Thread
where
    I: IntoIterator<Item = Event>,
{
    let mut seen = HashSet::new();
    let mut replies: Vec<Event> = candidates
        .into_iter()
        .filter(|ev| ev.id != root.id && references_root(ev, &root.id))
        .filter(|ev| seen.insert(ev.id.clone()))
        .collect();
    replies.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

    let image = ImageMeta::from_event(&root).unwrap_or_default();
    Thread {
        title: thread_title(&root),
        image_url: image.url,
        image_dimensions: image.dimensions,
        root,
        replies,
    }
}

impl Thread {
    /// Root followed by replies, in display order.
    pub fn all_events(&self) -> impl Iterator<Item = &Event> {
        std::iter::once(&self.root).chain(self.replies.iter())
    }

    /// Post number lookup for quote links inside this thread.
    pub fn reference_map(&self) -> ReferenceMap {
        ReferenceMap::from_ids(self.all_events().map(|ev| ev.id.as_str()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.all_events().any(|ev| ev.id == id)
    }

    /// Post a reply answers directly. Parents outside the thread fall back to
    /// the root.
    pub fn parent_of(&self, reply_id: &str) -> Option<&str> {
        let reply = self.replies.iter().find(|ev| ev.id == reply_id)?;
        let parent = canonical(reply)
            .map(|link| link.parent().to_string())
            .and_then(|p| self.all_events().find(|ev| ev.id == p));
        Some(parent.map_or(self.root.id.as_str(), |ev| ev.id.as_str()))
    }

    /// Replies whose text quotes the post `id`.
    pub fn backlinks(&self, id: &str) -> Vec<&Event> {
        let refs = self.reference_map();
        self.replies
            .iter()
            .filter(|ev| ev.id != id)
            .filter(|ev| {
                extract_quote_refs(&ev.content)
                    .iter()
                    .any(|num| refs.resolve(num) == Some(id))
            })
            .collect()
    }
}
