//! Unsigned drafts for new threads and replies.
//!
//! Both kinds are published as plain text notes so other clients render them.
//! The image URL and a board footer are repeated in the content for clients
//! that ignore `imeta`.

use crate::board::{board_by_id, Board, SITE_NAME};
use crate::error::{ChanError, Result};
use crate::event::{unix_now, Draft, Tag, KIND_TEXT_NOTE};
use crate::media::ImageMeta;

/// Opening post of a new thread.
#[derive(Debug, Clone, Default)]
pub struct NewThread {
    pub board: String,
    pub subject: String,
    pub content: String,
    /// Threads always carry an image.
    pub image: ImageMeta,
}

/// Post being answered directly, when it is not the thread root.
#[derive(Debug, Clone)]
pub struct ParentRef {
    pub id: String,
    pub pubkey: String,
}

/// Reply to an existing thread.
#[derive(Debug, Clone, Default)]
pub struct NewReply {
    pub board: String,
    pub root_id: String,
    pub root_pubkey: String,
    pub parent: Option<ParentRef>,
    pub content: String,
    pub image: Option<ImageMeta>,
}

fn board_footer(board: &Board) -> String {
    format!("[/{}/ - {SITE_NAME}]", board.id)
}

fn join_paragraphs<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn known_board(id: &str) -> Result<&'static Board> {
    board_by_id(id).ok_or_else(|| ChanError::UnknownBoard(id.to_string()))
}

/// Check a thread can be posted, without touching the network.
pub fn validate_thread(thread: &NewThread) -> Result<&'static Board> {
    let board = known_board(&thread.board)?;
    if !thread.image.is_attachable() {
        return Err(ChanError::missing("a thread needs an image url and mime type"));
    }
    Ok(board)
}

/// Check a reply can be posted, without touching the network.
pub fn validate_reply(reply: &NewReply) -> Result<&'static Board> {
    let board = known_board(&reply.board)?;
    if reply.root_id.is_empty() {
        return Err(ChanError::missing("reply has no thread id"));
    }
    if reply.root_pubkey.is_empty() {
        return Err(ChanError::missing("reply has no thread author"));
    }
    let has_image = reply.image.as_ref().is_some_and(|img| img.url.is_some());
    if reply.content.trim().is_empty() && !has_image {
        return Err(ChanError::missing("reply needs text or an image"));
    }
    Ok(board)
}

pub fn thread_draft(thread: &NewThread) -> Result<Draft> {
    let board = validate_thread(thread)?;
    let image_url = thread.image.url.as_deref().unwrap_or_default();
    let footer = board_footer(board);
    Ok(Draft {
        kind: KIND_TEXT_NOTE,
        content: join_paragraphs([thread.content.as_str(), image_url, footer.as_str()]),
        tags: vec![
            Tag::new(["subject", thread.subject.as_str()]),
            thread.image.to_tag(),
            Tag::new(["t", board.hashtag]),
            Tag::new(["client", SITE_NAME]),
        ],
        created_at: unix_now(),
    })
}

/// Reply draft tagged for both reply conventions: a flat `E` root reference
/// for listings and marked `e` tags for threaded readers.
pub fn reply_draft(reply: &NewReply) -> Result<Draft> {
    let board = validate_reply(reply)?;
    let root = reply.root_id.as_str();
    let root_pk = reply.root_pubkey.as_str();

    let mut tags = vec![
        Tag::new(["E", root, "", root_pk]),
        Tag::new(["e", root, "", "root"]),
    ];
    match &reply.parent {
        Some(parent) if parent.id != root => {
            tags.push(Tag::new(["e", parent.id.as_str(), "", "reply"]))
        }
        _ => tags.push(Tag::new(["e", root, "", "root"])),
    }
    tags.push(Tag::new(["p", root_pk]));
    if let Some(parent) = &reply.parent {
        if !parent.pubkey.is_empty() && parent.pubkey != root_pk {
            tags.push(Tag::new(["p", parent.pubkey.as_str()]));
        }
    }
    tags.push(Tag::new(["client", SITE_NAME]));

    let image_url = reply
        .image
        .as_ref()
        .and_then(|img| img.url.as_deref())
        .unwrap_or_default();
    if let Some(image) = reply.image.as_ref().filter(|img| img.is_attachable()) {
        tags.push(image.to_tag());
    }

    let footer = board_footer(board);
    Ok(Draft {
        kind: KIND_TEXT_NOTE,
        content: join_paragraphs([reply.content.as_str(), image_url, footer.as_str()]),
        tags,
        created_at: unix_now(),
    })
}
