//! Configuration loading from `.env` files.

use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};

/// Runtime settings derived from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Relays to read from and publish to.
    pub relays: Vec<String>,
    /// Optional Tor SOCKS proxy (host:port).
    pub tor_socks: Option<String>,
    /// JSON file backing the posting session (ephemeral key, identity mode).
    pub session_file: PathBuf,
    /// Per-relay deadline for a query.
    pub query_timeout: Duration,
    /// Per-relay deadline for a publish acknowledgment.
    pub publish_timeout: Duration,
    /// Extra attempts for reads that come back empty or fail in transit.
    pub thread_retries: u32,
    pub thread_retry_delay: Duration,
    /// Maximum threads requested per board listing.
    pub board_limit: usize,
    /// Hex secret key used as the logged-in identity.
    pub login_secret_key: Option<String>,
}

impl Settings {
    /// Load settings from the specified `.env` file.
    pub fn from_env(path: &str) -> Result<Self> {
        dotenvy::from_filename(path).context("reading env file")?;
        let relays = csv_strings(env::var("RELAYS").unwrap_or_default());
        if relays.is_empty() {
            bail!("RELAYS must list at least one relay url");
        }
        for relay in &relays {
            if !(relay.starts_with("ws://") || relay.starts_with("wss://")) {
                bail!("relay url must use ws:// or wss://: {relay}");
            }
        }
        let tor_socks = non_empty_var("TOR_SOCKS");
        let session_file = match non_empty_var("SESSION_FILE") {
            Some(file) => PathBuf::from(file),
            None => base_dir(path).join("chanstr-session.json"),
        };
        Ok(Self {
            relays,
            tor_socks,
            session_file,
            query_timeout: Duration::from_millis(number_var("QUERY_TIMEOUT_MS", 10_000)?),
            publish_timeout: Duration::from_millis(number_var("PUBLISH_TIMEOUT_MS", 5_000)?),
            thread_retries: number_var("THREAD_RETRIES", 3)?,
            thread_retry_delay: Duration::from_millis(number_var("THREAD_RETRY_DELAY_MS", 1_000)?),
            board_limit: number_var("BOARD_LIMIT", 50)?,
            login_secret_key: non_empty_var("LOGIN_SECRET_KEY"),
        })
    }
}

/// Directory holding the env file; relative paths in it resolve from here.
pub fn base_dir(env_path: &str) -> PathBuf {
    match Path::new(env_path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn number_var<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match non_empty_var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("parsing {key}={raw}")),
        None => Ok(default),
    }
}

/// Split a comma-separated string into trimmed string values.
pub fn csv_strings(input: impl AsRef<str>) -> Vec<String> {
    let s = input.as_ref();
    s.split(',')
        .filter_map(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .collect()
}
