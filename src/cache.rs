//! View cache merging relay results with locally published events.
//!
//! Relays take a while to return an event we just published. Until they do,
//! the event is kept as pending and folded into every view rebuilt from
//! network data; once a network read returns the same id it stops being
//! pending. Both paths feed the same id-keyed sets, so replaying an insert or
//! a network read never duplicates a post. A pending thread older than every
//! thread on the fetched page has fallen off the listing and is dropped, along
//! with pending replies to threads no longer listed.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::board::{aggregate, BoardSnapshot};
use crate::event::Event;
use crate::linking::root_scope;
use crate::thread::{assemble, Thread};

type EventSet = BTreeMap<String, Event>;

fn keyed(events: impl IntoIterator<Item = Event>) -> EventSet {
    events.into_iter().map(|ev| (ev.id.clone(), ev)).collect()
}

/// Drop pending events the network now returns.
fn confirm(pending: &mut EventSet, network: &EventSet) {
    pending.retain(|id, _| !network.contains_key(id));
}

#[derive(Debug, Default)]
struct BoardEntry {
    roots: EventSet,
    replies: EventSet,
    pending_roots: EventSet,
    pending_replies: EventSet,
    snapshot: BoardSnapshot,
}

impl BoardEntry {
    fn rebuild(&mut self) {
        let roots = self.roots.values().chain(self.pending_roots.values());
        let replies = self.replies.values().chain(self.pending_replies.values());
        self.snapshot = aggregate(roots, replies);
    }

    fn prune_stale(&mut self) {
        if let Some(oldest) = self.roots.values().map(|ev| ev.created_at).min() {
            self.pending_roots.retain(|_, ev| ev.created_at >= oldest);
        }
        let (roots, pending_roots) = (&self.roots, &self.pending_roots);
        self.pending_replies.retain(|_, ev| {
            root_scope(ev)
                .is_some_and(|root| roots.contains_key(root) || pending_roots.contains_key(root))
        });
    }
}

/// A thread's events. The root may still be unknown when a local reply is
/// recorded before the thread was ever read.
#[derive(Debug, Default)]
struct ThreadEntry {
    root: Option<Event>,
    replies: EventSet,
    pending: EventSet,
    view: Option<Thread>,
}

impl ThreadEntry {
    fn rebuild(&mut self) {
        if let Some(root) = &self.root {
            let candidates = self.replies.values().chain(self.pending.values()).cloned();
            self.view = Some(assemble(root.clone(), candidates));
        }
    }
}

/// Board listings and threads as last seen, keyed by board id and root id.
#[derive(Debug, Default)]
pub struct ViewCache {
    boards: HashMap<String, BoardEntry>,
    threads: HashMap<String, ThreadEntry>,
}

impl ViewCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a thread root we just published.
    pub fn record_thread(&mut self, board_id: &str, root: Event) {
        debug!(board = board_id, id = %root.id, "caching local thread");
        let thread = self.threads.entry(root.id.clone()).or_default();
        if thread.root.is_none() {
            thread.root = Some(root.clone());
            thread.rebuild();
        }
        let board = self.boards.entry(board_id.to_string()).or_default();
        if !board.roots.contains_key(&root.id) {
            board.pending_roots.insert(root.id.clone(), root);
        }
        board.rebuild();
    }

    /// Insert a reply we just published to the thread `root_id`.
    ///
    /// The board listing only changes if it has been built before; a listing
    /// that does not exist yet picks the reply up on its first read.
    pub fn record_reply(&mut self, board_id: &str, root_id: &str, reply: Event) {
        debug!(board = board_id, root = root_id, id = %reply.id, "caching local reply");
        let thread = self.threads.entry(root_id.to_string()).or_default();
        if !thread.replies.contains_key(&reply.id) {
            thread.pending.insert(reply.id.clone(), reply.clone());
        }
        thread.rebuild();

        if let Some(board) = self.boards.get_mut(board_id) {
            if !board.replies.contains_key(&reply.id) {
                board.pending_replies.insert(reply.id.clone(), reply);
            }
            board.rebuild();
        }
    }

    /// Replace a board's network events and return the merged listing.
    pub fn observe_board(
        &mut self,
        board_id: &str,
        roots: Vec<Event>,
        replies: Vec<Event>,
    ) -> BoardSnapshot {
        let board = self.boards.entry(board_id.to_string()).or_default();
        board.roots = keyed(roots);
        board.replies = keyed(replies);
        confirm(&mut board.pending_roots, &board.roots);
        confirm(&mut board.pending_replies, &board.replies);
        board.prune_stale();
        board.rebuild();
        debug!(
            board = board_id,
            threads = board.snapshot.len(),
            pending = board.pending_roots.len() + board.pending_replies.len(),
            "board observed"
        );
        board.snapshot.clone()
    }

    /// Replace a thread's network events and return the merged thread.
    pub fn observe_thread(&mut self, root: Event, replies: Vec<Event>) -> Thread {
        let entry = self.threads.entry(root.id.clone()).or_default();
        entry.replies = keyed(replies);
        confirm(&mut entry.pending, &entry.replies);
        let candidates = entry.replies.values().chain(entry.pending.values()).cloned();
        let thread = assemble(root.clone(), candidates);
        entry.root = Some(root);
        entry.view = Some(thread.clone());
        thread
    }

    pub fn board(&self, board_id: &str) -> Option<BoardSnapshot> {
        self.boards.get(board_id).map(|b| b.snapshot.clone())
    }

    pub fn thread(&self, root_id: &str) -> Option<Thread> {
        self.threads.get(root_id).and_then(|t| t.view.clone())
    }

    /// Locally published events not yet returned by any relay.
    pub fn pending_count(&self) -> usize {
        let boards: usize = self
            .boards
            .values()
            .map(|b| b.pending_roots.len() + b.pending_replies.len())
            .sum();
        let threads: usize = self.threads.values().map(|t| t.pending.len()).sum();
        boards + threads
    }
}
