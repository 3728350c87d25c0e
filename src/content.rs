//! Post body parsing: greentext lines, quote links and bare URLs.
//!
//! Parsing is split from resolution. [`parse_line`] only recognizes token
//! shapes; [`resolve_line`] later looks quote numbers up in a thread's
//! [`ReferenceMap`]. A number the map does not know stays a dead link.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::post_number::{ReferenceMap, QUOTE_TOKEN};

/// Longest URL label shown before truncating.
pub const URL_LABEL_MAX: usize = 50;

static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s]+").expect("url pattern"));

/// A run of text within one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Span {
    /// Plain text.
    Text(String),
    /// Absolute `http(s)` link; the full URL is kept as the target.
    Url(String),
    /// `>>` quote of another post by number.
    QuoteRef {
        /// Digits after `>>`, as written.
        display_id: String,
        /// Event id the number resolved to, `None` for a dead link.
        target: Option<String>,
    },
}

impl Span {
    fn quote(display_id: &str) -> Self {
        Span::QuoteRef {
            display_id: display_id.to_string(),
            target: None,
        }
    }
}

/// One parsed line of a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Whether the whole line renders as greentext.
    pub greentext: bool,
    pub spans: Vec<Span>,
}

/// True if `line` starts with a single `>` (a `>>` quote does not count).
pub fn is_greentext(line: &str) -> bool {
    line.starts_with('>') && !line.starts_with(">>")
}

/// Label shown for a link, cut to [`URL_LABEL_MAX`] characters.
pub fn url_label(url: &str) -> String {
    if url.chars().count() > URL_LABEL_MAX {
        let head: String = url.chars().take(URL_LABEL_MAX).collect();
        format!("{head}...")
    } else {
        url.to_string()
    }
}

/// Split a single line into spans, left to right.
pub fn parse_line(line: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut last = 0;
    for m in QUOTE_TOKEN.find_iter(line) {
        push_text(&mut spans, &line[last..m.start()]);
        spans.push(Span::quote(&m.as_str()[2..]));
        last = m.end();
    }
    push_text(&mut spans, &line[last..]);
    spans
}

/// Push `text`, splitting out any URLs it contains.
fn push_text(spans: &mut Vec<Span>, text: &str) {
    let mut last = 0;
    for m in URL.find_iter(text) {
        if m.start() > last {
            spans.push(Span::Text(text[last..m.start()].to_string()));
        }
        spans.push(Span::Url(m.as_str().to_string()));
        last = m.end();
    }
    if last < text.len() {
        spans.push(Span::Text(text[last..].to_string()));
    }
}

/// Parse a whole post body. Lines never influence each other.
pub fn parse_content(content: &str) -> Vec<Line> {
    content
        .split('\n')
        .map(|raw| {
            let line = raw.strip_suffix('\r').unwrap_or(raw);
            Line {
                greentext: is_greentext(line),
                spans: parse_line(line),
            }
        })
        .collect()
}

/// Fill in quote targets from the thread's reference map.
pub fn resolve_line(line: &mut Line, refs: &ReferenceMap) {
    for span in &mut line.spans {
        if let Span::QuoteRef { display_id, target } = span {
            *target = refs.resolve(display_id).map(str::to_string);
        }
    }
}

/// Parse and resolve a post body in one go.
pub fn resolve_content(content: &str, refs: &ReferenceMap) -> Vec<Line> {
    let mut lines = parse_content(content);
    for line in &mut lines {
        resolve_line(line, refs);
    }
    lines
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for span in &self.spans {
            match span {
                Span::Text(text) => f.write_str(text)?,
                Span::Url(url) => f.write_str(&url_label(url))?,
                Span::QuoteRef {
                    display_id,
                    target: Some(_),
                } => write!(f, ">>{display_id}")?,
                Span::QuoteRef {
                    display_id,
                    target: None,
                } => write!(f, ">>{display_id} (dead)")?,
            }
        }
        Ok(())
    }
}
