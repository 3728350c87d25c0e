//! Short post numbers derived from event ids.
//!
//! Event ids are 64 hex characters, far too long to quote by hand. A post
//! number keeps only the first 32 bits, reduced to eight decimal digits, so
//! two ids can collide. Resolving a number back to an id therefore needs the
//! concrete event set of a thread, captured in a [`ReferenceMap`].

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

/// Number shown for ids too short to derive one from.
pub const NULL_POST_NUMBER: &str = "00000000";

/// Quote token: `>>` followed by 6 to 8 ASCII digits.
pub(crate) static QUOTE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">>([0-9]{6,8})").expect("quote pattern"));

/// Convert a hex event id into an 8-digit post number.
pub fn to_display_id(hex_id: &str) -> String {
    let Some(prefix) = hex_id.get(..8) else {
        return NULL_POST_NUMBER.to_string();
    };
    match u32::from_str_radix(prefix, 16) {
        Ok(num) => format!("{:08}", num % 100_000_000),
        Err(_) => NULL_POST_NUMBER.to_string(),
    }
}

/// Quote token for an event, e.g. `>>12345678`.
pub fn to_quote_token(hex_id: &str) -> String {
    format!(">>{}", to_display_id(hex_id))
}

/// Post number as shown in a post header, e.g. `No.12345678`.
pub fn format_post_number(hex_id: &str) -> String {
    format!("No.{}", to_display_id(hex_id))
}

/// Digit strings of every quote token in `content`, in order of appearance.
pub fn extract_quote_refs(content: &str) -> Vec<String> {
    QUOTE_TOKEN
        .captures_iter(content)
        .map(|c| c[1].to_string())
        .collect()
}

/// Post number → event id lookup for one thread's events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceMap {
    entries: HashMap<String, String>,
}

impl ReferenceMap {
    /// Build the map from ids in thread order (root first, then replies).
    ///
    /// When two ids share a post number the later one takes it over.
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut entries = HashMap::new();
        for id in ids {
            let id = id.as_ref();
            entries.insert(to_display_id(id), id.to_string());
        }
        Self { entries }
    }

    /// Event id behind a post number, if it belongs to this thread.
    pub fn resolve(&self, display_id: &str) -> Option<&str> {
        self.entries.get(display_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
