//! Board registry and bump-ordered board listings.

use std::collections::{HashMap, HashSet};

use crate::event::Event;
use crate::linking::root_scope;
use crate::media::{Dimensions, ImageMeta};
use crate::thread::thread_title;

/// Name stamped into hashtags, `client` tags and post footers.
pub const SITE_NAME: &str = "21chan";

/// Static description of one board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Board {
    /// Short slug used in paths, e.g. `b` for `/b/`.
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    /// Value of the `t` tag that files a thread under this board.
    pub hashtag: &'static str,
    pub nsfw: bool,
}

const fn board(
    id: &'static str,
    name: &'static str,
    description: &'static str,
    hashtag: &'static str,
    nsfw: bool,
) -> Board {
    Board {
        id,
        name,
        description,
        hashtag,
        nsfw,
    }
}

pub const BOARDS: &[Board] = &[
    board("btc", "Bitcoin", "Bitcoin discussion and news", "21chan-btc", false),
    board("ln", "Lightning", "Lightning Network and L2 solutions", "21chan-ln", false),
    board("biz", "Business", "Business and finance discussion", "21chan-biz", false),
    board("tech", "Technology", "Technology and programming", "21chan-tech", false),
    board(
        "b",
        "Random",
        "The stories and information posted here are artistic works of fiction and falsehood. \
         Only a fool would take anything posted here as fact.",
        "21chan-b",
        true,
    ),
    board("pol", "Politically Incorrect", "Political discussion and current events", "21chan-pol", false),
    board("fit", "Fitness", "Health, fitness, and self-improvement", "21chan-fit", false),
    board("lit", "Literature", "Books, writing, and philosophy", "21chan-lit", false),
    board("mu", "Music", "Music discussion and sharing", "21chan-mu", false),
    board("v", "Video Games", "Video game discussion", "21chan-v", false),
    board("tv", "Television & Film", "Movies and television discussion", "21chan-tv", false),
    board("x", "Paranormal", "Pair of normal discussions", "21chan-x", false),
];

pub fn board_by_id(id: &str) -> Option<&'static Board> {
    BOARDS.iter().find(|b| b.id == id)
}

pub fn board_by_hashtag(hashtag: &str) -> Option<&'static Board> {
    BOARDS.iter().find(|b| b.hashtag == hashtag)
}

pub fn is_valid_board(id: &str) -> bool {
    board_by_id(id).is_some()
}

/// One row of a board listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSummary {
    pub root: Event,
    pub title: String,
    pub image_url: Option<String>,
    pub image_dimensions: Option<Dimensions>,
    pub reply_count: usize,
    /// Newest `created_at` among the root and its counted replies.
    pub last_activity: u64,
}

/// Threads of one board in bump order.
pub type BoardSnapshot = Vec<ThreadSummary>;

/// Summarize thread roots and order them by latest activity.
///
/// Only replies carrying a flat `E` root tag are counted; a listing needs to
/// know that a thread is active, not how its reply chains nest. Duplicate
/// roots or replies (same id) count once.
pub fn aggregate<'a, R, P>(roots: R, replies: P) -> BoardSnapshot
where
    R: IntoIterator<Item = &'a Event>,
    P: IntoIterator<Item = &'a Event>,
{
    let mut activity: HashMap<&str, (usize, u64)> = HashMap::new();
    let mut seen_replies = HashSet::new();
    for reply in replies {
        if !seen_replies.insert(reply.id.as_str()) {
            continue;
        }
        if let Some(root_id) = root_scope(reply) {
            let entry = activity.entry(root_id).or_insert((0, 0));
            entry.0 += 1;
            entry.1 = entry.1.max(reply.created_at);
        }
    }

    let mut seen_roots = HashSet::new();
    let mut snapshot: BoardSnapshot = roots
        .into_iter()
        .filter(|root| seen_roots.insert(root.id.as_str()))
        .map(|root| {
            let (reply_count, last_reply) =
                activity.get(root.id.as_str()).copied().unwrap_or((0, 0));
            let image = ImageMeta::from_event(root).unwrap_or_default();
            ThreadSummary {
                root: root.clone(),
                title: thread_title(root),
                image_url: image.url,
                image_dimensions: image.dimensions,
                reply_count,
                last_activity: root.created_at.max(last_reply),
            }
        })
        .collect();
    snapshot.sort_by(|a, b| {
        b.last_activity
            .cmp(&a.last_activity)
            .then_with(|| a.root.id.cmp(&b.root.id))
    });
    snapshot
}
