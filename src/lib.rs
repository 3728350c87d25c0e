//! Anonymous imageboard client for Nostr relays.
//!
//! Events from relays are flat and unordered. This crate turns them into
//! boards, threads with ordered replies, numbered posts with quote links and
//! bump order. It signs new posts with a per-session throwaway key unless a
//! logged-in identity is selected, and shows freshly published posts before
//! relays return them.

pub mod board;
pub mod cache;
pub mod client;
pub mod compose;
pub mod config;
pub mod content;
pub mod error;
pub mod event;
pub mod identity;
pub mod linking;
pub mod media;
pub mod post_number;
pub mod relay;
pub mod session;
pub mod thread;

pub use client::{ChanClient, ClientOptions};
pub use error::{ChanError, Result};
pub use event::{Event, Tag};
