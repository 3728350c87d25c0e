//! Nostr event model.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Short text note. Threads and replies are both published as this kind.
pub const KIND_TEXT_NOTE: u32 = 1;
/// NIP-22 comment, produced by other clients replying to a thread.
pub const KIND_COMMENT: u32 = 1111;

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// Tags appear as small arrays where the first element denotes the type and the
/// following elements hold data. The ones an imageboard cares about:
///
/// - `e` / `E` – link a reply to its thread root or direct parent
/// - `p` – references another author's public key
/// - `t` – board hashtag
/// - `subject` / `title` – thread title
/// - `imeta` – attached image metadata
///
/// Each tag is stored verbatim so uncommon or custom tags are preserved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag(pub Vec<String>);

impl Tag {
    /// Build a tag from its parts, e.g. `Tag::new(["t", "21chan-b"])`.
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Tag(parts.into_iter().map(Into::into).collect())
    }

    /// Tag type, the first element.
    pub fn name(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Primary value, the second element.
    pub fn value(&self) -> Option<&str> {
        self.get(1)
    }

    /// Element at `index`, if present.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }
}

/// Event as received from or published to relays.
///
/// ```json
/// {
///   "id": "aa11",
///   "pubkey": "79be667e...",
///   "kind": 1,
///   "created_at": 1700000000,
///   "tags": [["t", "21chan-b"], ["subject", "first"]],
///   "content": "hello",
///   "sig": "deadbeef"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    /// Event identifier (hex of SHA-256 hash).
    pub id: String,
    /// Author public key (hex).
    pub pubkey: String,
    /// Kind number, e.g. `1` or `1111`.
    pub kind: u32,
    /// Unix timestamp of creation.
    pub created_at: u64,
    /// Arbitrary tags such as `t` (topic) or `e` (reply link).
    pub tags: Vec<Tag>,
    /// Event content body.
    pub content: String,
    /// Schnorr signature over the event hash.
    pub sig: String,
}

impl Event {
    /// Tags whose type equals `name`, in order.
    pub fn tags_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Tag> + 'a {
        self.tags.iter().filter(move |t| t.name() == Some(name))
    }

    /// Value of the first `name` tag that carries one.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .filter(|t| t.name() == Some(name))
            .find_map(Tag::value)
    }
}

/// Unsigned event content handed to a signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub kind: u32,
    pub content: String,
    pub tags: Vec<Tag>,
    pub created_at: u64,
}

impl Draft {
    /// Compute the NIP-01 event hash this draft would have under `pubkey`.
    pub fn hash(&self, pubkey: &str) -> Result<[u8; 32]> {
        let arr = serde_json::json!([0, pubkey, self.created_at, self.kind, self.tags, self.content]);
        let data = serde_json::to_vec(&arr)?;
        Ok(Sha256::digest(&data).into())
    }
}

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
