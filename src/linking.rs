//! Reply-to-thread linking conventions.
//!
//! Clients on the network link replies in two ways that coexist on the same
//! relays:
//!
//! - flat: one tag pointing at the thread root, either NIP-22's uppercase
//!   `["E", <root>]` or a lone unmarked `["e", <id>]`. When both appear
//!   together the pair is NIP-22's root and parent;
//! - threaded: NIP-10 lowercase `e` tags carrying a `root` and a `reply`
//!   marker, so a reply can answer another reply while still naming the root.
//!   The deprecated positional form (several unmarked `e` tags, first is the
//!   root, last is the parent) maps here too.
//!
//! Everything downstream works on the normalized [`LinkConvention`].

use crate::event::{Event, Tag};

const MARKER_ROOT: &str = "root";
const MARKER_REPLY: &str = "reply";

/// How a reply names its thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkConvention {
    /// Single reference to the root.
    Flat(String),
    /// Root plus the post being answered directly.
    Threaded { root: String, parent: String },
}

impl LinkConvention {
    pub fn root(&self) -> &str {
        match self {
            LinkConvention::Flat(root) => root,
            LinkConvention::Threaded { root, .. } => root,
        }
    }

    /// Direct parent; a flat link answers the root itself.
    pub fn parent(&self) -> &str {
        match self {
            LinkConvention::Flat(root) => root,
            LinkConvention::Threaded { parent, .. } => parent,
        }
    }
}

/// Every link an event carries, under either convention.
pub fn links(event: &Event) -> Vec<LinkConvention> {
    let upper_root = event.tag_value("E").filter(|v| !v.is_empty());
    let mut out: Vec<LinkConvention> = event
        .tags_named("E")
        .filter_map(Tag::value)
        .map(|root| LinkConvention::Flat(root.to_string()))
        .collect();

    let e_tags: Vec<&Tag> = event
        .tags_named("e")
        .filter(|t| t.value().is_some_and(|v| !v.is_empty()))
        .collect();
    match (marked(&e_tags, MARKER_ROOT), marked(&e_tags, MARKER_REPLY)) {
        (Some(root), parent) => out.push(LinkConvention::Threaded {
            root: root.to_string(),
            parent: parent.unwrap_or(root).to_string(),
        }),
        (None, Some(parent)) => out.push(LinkConvention::Flat(parent.to_string())),
        (None, None) => {
            let unmarked: Vec<&str> = e_tags
                .iter()
                .copied()
                .filter(|t| t.get(3).map_or(true, str::is_empty))
                .filter_map(Tag::value)
                .collect();
            match unmarked.as_slice() {
                [] => {}
                // NIP-22 pairs the uppercase root with the lowercase parent.
                [only] => out.push(match upper_root {
                    Some(root) => LinkConvention::Threaded {
                        root: root.to_string(),
                        parent: only.to_string(),
                    },
                    None => LinkConvention::Flat(only.to_string()),
                }),
                [first, .., last] => out.push(LinkConvention::Threaded {
                    root: first.to_string(),
                    parent: last.to_string(),
                }),
            }
        }
    }
    out
}

fn marked<'a>(tags: &[&'a Tag], marker: &str) -> Option<&'a str> {
    tags.iter()
        .copied()
        .find(|t| t.get(3) == Some(marker))
        .and_then(Tag::value)
}

/// The one `(root, parent)` link used for an event, preferring the more
/// precise threaded form.
pub fn canonical(event: &Event) -> Option<LinkConvention> {
    let all = links(event);
    all.iter()
        .find(|l| matches!(l, LinkConvention::Threaded { .. }))
        .or_else(|| all.first())
        .cloned()
}

/// Whether `event` belongs to the thread rooted at `root_id`.
pub fn references_root(event: &Event, root_id: &str) -> bool {
    links(event)
        .iter()
        .any(|l| l.root() == root_id || l.parent() == root_id)
}

/// Root named by the flat `E` tag alone.
///
/// Board listings count activity with this cheaper rule and ignore the
/// threaded form.
pub fn root_scope(event: &Event) -> Option<&str> {
    event.tag_value("E")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_with(tags: Vec<Tag>) -> Event {
        Event {
            id: "ff00".into(),
            pubkey: "p".into(),
            kind: 1,
            created_at: 1,
            tags,
            content: String::new(),
            sig: String::new(),
        }
    }

    #[test]
    fn uppercase_root_is_flat() {
        let ev = event_with(vec![Tag::new(["E", "root1", "", "pk"])]);
        assert_eq!(links(&ev), vec![LinkConvention::Flat("root1".into())]);
        assert_eq!(root_scope(&ev), Some("root1"));
    }

    #[test]
    fn marked_tags_are_threaded() {
        let ev = event_with(vec![
            Tag::new(["e", "root1", "", "root"]),
            Tag::new(["e", "mid", "", "reply"]),
        ]);
        let link = canonical(&ev).unwrap();
        assert_eq!(link.root(), "root1");
        assert_eq!(link.parent(), "mid");
        assert!(references_root(&ev, "root1"));
        assert!(!references_root(&ev, "other"));
        assert_eq!(root_scope(&ev), None);
    }

    #[test]
    fn root_marker_alone_answers_root() {
        let ev = event_with(vec![Tag::new(["e", "root1", "", "root"])]);
        assert_eq!(
            canonical(&ev),
            Some(LinkConvention::Threaded {
                root: "root1".into(),
                parent: "root1".into()
            })
        );
    }

    #[test]
    fn unmarked_tags_use_positions() {
        let single = event_with(vec![Tag::new(["e", "root1"])]);
        assert_eq!(canonical(&single), Some(LinkConvention::Flat("root1".into())));

        let positional = event_with(vec![
            Tag::new(["e", "root1"]),
            Tag::new(["e", "middle"]),
            Tag::new(["e", "parent"]),
        ]);
        let link = canonical(&positional).unwrap();
        assert_eq!((link.root(), link.parent()), ("root1", "parent"));
    }

    #[test]
    fn both_conventions_normalize_to_threaded() {
        let ev = event_with(vec![
            Tag::new(["E", "root1"]),
            Tag::new(["e", "root1", "", "root"]),
            Tag::new(["e", "mid", "", "reply"]),
        ]);
        assert_eq!(links(&ev).len(), 2);
        assert!(matches!(
            canonical(&ev),
            Some(LinkConvention::Threaded { .. })
        ));
    }

    #[test]
    fn uppercase_root_pairs_with_lone_parent() {
        let ev = event_with(vec![Tag::new(["E", "root1"]), Tag::new(["e", "first"])]);
        assert_eq!(
            canonical(&ev),
            Some(LinkConvention::Threaded {
                root: "root1".into(),
                parent: "first".into()
            })
        );
        assert!(references_root(&ev, "root1"));
        assert_eq!(root_scope(&ev), Some("root1"));
    }

    #[test]
    fn mentions_and_empty_values_are_not_links() {
        let ev = event_with(vec![
            Tag::new(["e", "quoted", "", "mention"]),
            Tag::new(["e", ""]),
            Tag::new(["e"]),
        ]);
        assert!(links(&ev).is_empty());
        assert_eq!(canonical(&ev), None);
    }
}
