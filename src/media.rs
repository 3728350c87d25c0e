//! Image metadata carried in `imeta` tags and upload results.

use serde::{Deserialize, Serialize};

use crate::event::{Event, Tag};

/// Pixel size of an attached image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    /// Parse `"<W>x<H>"`. Anything but exactly two integers yields `None`.
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.split('x');
        let (w, h) = (parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            width: w.trim().parse().ok()?,
            height: h.trim().parse().ok()?,
        })
    }
}

/// Fields of an `imeta` tag such as
/// `["imeta", "url https://…", "m image/png", "dim 800x600", "x <sha256>"]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageMeta {
    pub url: Option<String>,
    pub mime: Option<String>,
    pub dimensions: Option<Dimensions>,
    pub hash: Option<String>,
}

impl ImageMeta {
    /// Read the first `imeta` tag of an event, if any.
    pub fn from_event(event: &Event) -> Option<Self> {
        event.tags_named("imeta").next().map(Self::from_tag)
    }

    /// Parse the space-separated parts of one `imeta` tag. Unknown parts and
    /// unparsable dimensions are skipped.
    pub fn from_tag(tag: &Tag) -> Self {
        let mut meta = Self::default();
        for part in tag.0.iter().skip(1) {
            if let Some((key, value)) = part.split_once(' ') {
                meta.set(key, value);
            }
        }
        meta
    }

    /// Parse the `(key, value)` pairs an uploader returns.
    pub fn from_upload_tags<K, V>(tags: &[(K, V)]) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut meta = Self::default();
        for (key, value) in tags {
            meta.set(key.as_ref(), value.as_ref());
        }
        meta
    }

    fn set(&mut self, key: &str, value: &str) {
        match key {
            "url" => self.url = Some(value.to_string()),
            "m" => self.mime = Some(value.to_string()),
            "dim" => self.dimensions = Dimensions::parse(value),
            "x" => self.hash = Some(value.to_string()),
            _ => {}
        }
    }

    /// Whether the metadata is complete enough to attach to a post.
    pub fn is_attachable(&self) -> bool {
        self.url.as_deref().is_some_and(|u| !u.is_empty())
            && self.mime.as_deref().is_some_and(|m| !m.is_empty())
    }

    /// Encode as an `imeta` tag. Absent fields are left out.
    pub fn to_tag(&self) -> Tag {
        let mut parts = vec!["imeta".to_string()];
        if let Some(url) = &self.url {
            parts.push(format!("url {url}"));
        }
        if let Some(mime) = &self.mime {
            parts.push(format!("m {mime}"));
        }
        if let Some(dim) = &self.dimensions {
            parts.push(format!("dim {}x{}", dim.width, dim.height));
        }
        if let Some(hash) = &self.hash {
            parts.push(format!("x {hash}"));
        }
        Tag(parts)
    }
}
