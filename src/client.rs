//! Imageboard operations over a relay transport.
//!
//! [`ChanClient`] turns board and thread reads into relay queries, signs new
//! posts with the active identity and keeps a [`ViewCache`] so a post shows up
//! in the views the moment a relay acknowledges it.

use std::{
    future::Future,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::board::{board_by_id, BoardSnapshot};
use crate::cache::ViewCache;
use crate::compose::{reply_draft, thread_draft, NewReply, NewThread};
use crate::config::Settings;
use crate::error::{ChanError, Result};
use crate::event::{Event, KIND_COMMENT, KIND_TEXT_NOTE};
use crate::identity::IdentityResolver;
use crate::relay::{CancelSignal, Filter, Transport};
use crate::session::SessionStore;
use crate::thread::Thread;

/// Read tuning for [`ChanClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Maximum threads requested per board.
    pub board_limit: usize,
    /// Extra attempts for a read that failed transiently.
    pub retries: u32,
    pub retry_delay: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            board_limit: 50,
            retries: 3,
            retry_delay: Duration::from_millis(1000),
        }
    }
}

impl From<&Settings> for ClientOptions {
    fn from(cfg: &Settings) -> Self {
        Self {
            board_limit: cfg.board_limit,
            retries: cfg.thread_retries,
            retry_delay: cfg.thread_retry_delay,
        }
    }
}

pub struct ChanClient<T, S> {
    transport: T,
    identity: IdentityResolver<S>,
    cache: Mutex<ViewCache>,
    options: ClientOptions,
}

impl<T: Transport, S: SessionStore> ChanClient<T, S> {
    pub fn new(transport: T, identity: IdentityResolver<S>, options: ClientOptions) -> Self {
        Self {
            transport,
            identity,
            cache: Mutex::new(ViewCache::new()),
            options,
        }
    }

    pub fn identity(&self) -> &IdentityResolver<S> {
        &self.identity
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn cache(&self) -> MutexGuard<'_, ViewCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Last listing built for `board_id`, without touching the network.
    pub fn cached_board(&self, board_id: &str) -> Option<BoardSnapshot> {
        self.cache().board(board_id)
    }

    /// Last view of the thread `root_id`, without touching the network.
    pub fn cached_thread(&self, root_id: &str) -> Option<Thread> {
        self.cache().thread(root_id)
    }

    /// Run a read, retrying transient failures with a fixed delay.
    async fn with_retry<F, Fut, R>(&self, what: &str, cancel: &CancelSignal, mut op: F) -> Result<R>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.options.retries => {
                    attempt += 1;
                    warn!(what, attempt, error = %e, "read failed, retrying");
                    tokio::select! {
                        _ = sleep(self.options.retry_delay) => {}
                        _ = cancel.cancelled() => return Err(ChanError::Cancelled),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Threads of a board in bump order, merged with posts published here
    /// that relays have not returned yet.
    pub async fn fetch_board(&self, board_id: &str, cancel: &CancelSignal) -> Result<BoardSnapshot> {
        let board = board_by_id(board_id).ok_or_else(|| ChanError::UnknownBoard(board_id.into()))?;
        let root_filters = [Filter::new()
            .kinds([KIND_TEXT_NOTE])
            .tag("t", [board.hashtag])
            .limit(self.options.board_limit)];
        let filters = &root_filters;
        let roots = self
            .with_retry("board threads", cancel, move || self.transport.query(filters, cancel))
            .await?;

        let replies = if roots.is_empty() {
            Vec::new()
        } else {
            let reply_filters = [Filter::new()
                .kinds([KIND_TEXT_NOTE, KIND_COMMENT])
                .tag("E", roots.iter().map(|ev| ev.id.clone()))];
            let filters = &reply_filters;
            self.with_retry("board replies", cancel, move || self.transport.query(filters, cancel))
                .await?
        };
        debug!(board = board.id, roots = roots.len(), replies = replies.len(), "board fetched");

        let snapshot = self.cache().observe_board(board.id, roots, replies);
        info!(board = board.id, threads = snapshot.len(), "board loaded");
        Ok(snapshot)
    }

    async fn find_root(&self, root_id: &str, cancel: &CancelSignal) -> Result<Event> {
        let filters = [Filter::new().ids([root_id]).kinds([KIND_TEXT_NOTE]).limit(1)];
        self.transport
            .query(&filters, cancel)
            .await?
            .into_iter()
            .find(|ev| ev.id == root_id)
            .ok_or_else(|| ChanError::not_found(format!("thread {root_id}")))
    }

    /// A thread with every reply that links to it under either convention.
    ///
    /// A root no relay returns yet is retried, then reported as
    /// [`ChanError::NotFound`].
    pub async fn fetch_thread(&self, root_id: &str, cancel: &CancelSignal) -> Result<Thread> {
        if root_id.is_empty() {
            return Err(ChanError::missing("thread id"));
        }
        let root = self
            .with_retry("thread root", cancel, move || self.find_root(root_id, cancel))
            .await?;

        let reply_filters = [
            Filter::new()
                .kinds([KIND_TEXT_NOTE, KIND_COMMENT])
                .tag("e", [root_id]),
            Filter::new()
                .kinds([KIND_TEXT_NOTE, KIND_COMMENT])
                .tag("E", [root_id]),
        ];
        let filters = &reply_filters;
        let replies = self
            .with_retry("thread replies", cancel, move || self.transport.query(filters, cancel))
            .await?;

        let thread = self.cache().observe_thread(root, replies);
        info!(root = root_id, replies = thread.replies.len(), "thread loaded");
        Ok(thread)
    }

    /// Sign and publish a new thread, then show it in the board listing.
    pub async fn create_thread(&self, thread: &NewThread) -> Result<Event> {
        let draft = thread_draft(thread)?;
        let identity = self.identity.active_identity();
        let event = identity.sign(&draft)?;
        self.transport.publish(&event).await?;
        self.cache().record_thread(&thread.board, event.clone());
        info!(
            board = %thread.board,
            id = %event.id,
            anonymous = identity.is_anonymous(),
            "thread created"
        );
        Ok(event)
    }

    /// Sign and publish a reply, then show it in its thread.
    pub async fn create_reply(&self, reply: &NewReply) -> Result<Event> {
        let draft = reply_draft(reply)?;
        let identity = self.identity.active_identity();
        let event = identity.sign(&draft)?;
        self.transport.publish(&event).await?;
        self.cache()
            .record_reply(&reply.board, &reply.root_id, event.clone());
        info!(
            root = %reply.root_id,
            id = %event.id,
            anonymous = identity.is_anonymous(),
            "reply created"
        );
        Ok(event)
    }
}
