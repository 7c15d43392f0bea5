//! Track identity and metadata, read off the full-screen player.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::tree::{HostTree, NodeId, Query, Selector};

pub const UNKNOWN: &str = "Unknown";

/// Longest text the positional fallback will accept as a title or artist.
const MAX_FALLBACK_TEXT_CHARS: usize = 200;
const SEPARATOR: char = '•';

static TRACK_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"trackId=(\d+)").unwrap());

/// Opaque per-track token, unique within the session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TrackIdentity(String);

impl TrackIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackMetadata {
    pub artist: String,
    pub title: String,
}

impl Default for TrackMetadata {
    fn default() -> Self {
        Self {
            artist: UNKNOWN.to_string(),
            title: UNKNOWN.to_string(),
        }
    }
}

impl TrackMetadata {
    pub fn new(artist: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            artist: artist.into(),
            title: title.into(),
        }
    }

    /// Both fields resolved to something other than the sentinel.
    pub fn is_resolved(&self) -> bool {
        !self.artist.is_empty()
            && !self.title.is_empty()
            && self.artist != UNKNOWN
            && self.title != UNKNOWN
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    /// Rendered with deep links to the artist and track pages.
    Online,
    /// A local file; the host renders plain text without links.
    Local,
}

fn player_region_selector() -> Selector {
    Selector::one(Query::tag("div").attr_eq("data-test-id", "FULLSCREEN_PLAYER_MODAL"))
}

fn track_link_selector() -> Selector {
    Selector::one(Query::tag("a").attr_contains("href", "/album/track?albumId="))
}

fn artist_link_selector() -> Selector {
    Selector::one(Query::tag("a").attr_contains("href", "/artist?artistId="))
}

fn title_class_selector() -> Selector {
    Selector::any_of([
        Query::any().class_contains("Title"),
        Query::any().class_contains("title"),
    ])
}

fn artist_class_selector() -> Selector {
    Selector::any_of([
        Query::any().class_contains("Artist"),
        Query::any().class_contains("artist"),
        Query::any().class_contains("Subtitle"),
        Query::any().class_contains("subtitle"),
    ])
}

fn text_block_selector() -> Selector {
    Selector::any_of([
        Query::tag("div").class_contains("Text"),
        Query::tag("span").class_contains("Text"),
    ])
}

/// The full-screen now-playing view, if it is open.
pub fn player_region<T: HostTree + ?Sized>(tree: &T) -> Option<NodeId> {
    tree.select_first(tree.root(), &player_region_selector())
}

/// Track id from the first track link inside the player.
///
/// Local tracks have no such link and resolve to `None` even though the
/// player is open; callers keep that case apart from "player closed".
pub fn resolve_identity<T: HostTree + ?Sized>(tree: &T, region: NodeId) -> Option<TrackIdentity> {
    let link = tree.select_first(region, &track_link_selector())?;
    let href = tree.attr(link, "href")?;
    TRACK_ID_RE
        .captures(href)
        .and_then(|caps| caps.get(1))
        .map(|id| TrackIdentity::new(id.as_str()))
}

/// Identity of whatever the player currently shows.
pub fn current_identity<T: HostTree + ?Sized>(tree: &T) -> Option<TrackIdentity> {
    let region = player_region(tree)?;
    resolve_identity(tree, region)
}

pub fn track_kind<T: HostTree + ?Sized>(tree: &T, region: NodeId) -> TrackKind {
    let artist = tree.select_first(region, &artist_link_selector());
    let track = tree.select_first(region, &track_link_selector());
    if artist.is_none() && track.is_none() {
        TrackKind::Local
    } else {
        TrackKind::Online
    }
}

/// Best-effort artist and title. Never fails; unresolved fields stay "Unknown".
pub fn resolve_metadata<T: HostTree + ?Sized>(tree: &T, region: NodeId) -> TrackMetadata {
    let artist_link = tree.select_first(region, &artist_link_selector());
    let track_link = tree.select_first(region, &track_link_selector());

    if let (Some(artist), Some(track)) = (artist_link, track_link) {
        return TrackMetadata::new(
            tree.text_content(artist).trim(),
            tree.text_content(track).trim(),
        );
    }

    let mut meta = TrackMetadata::default();

    for node in tree.select_all(region, &title_class_selector()) {
        let text = tree.text_content(node);
        let text = text.trim();
        if is_candidate(text) && text != meta.artist {
            meta.title = text.to_string();
            break;
        }
    }

    for node in tree.select_all(region, &artist_class_selector()) {
        let text = tree.text_content(node);
        let text = text.trim();
        if is_candidate(text) && text != meta.title {
            meta.artist = text.to_string();
            break;
        }
    }

    if meta.artist == UNKNOWN || meta.title == UNKNOWN {
        // Positional fallback: first distinct short text is the title, second the artist.
        let mut texts: Vec<String> = Vec::new();
        for node in tree.select_all(region, &text_block_selector()) {
            let text = tree.text_content(node).trim().to_string();
            if text.is_empty() || text.chars().count() >= MAX_FALLBACK_TEXT_CHARS {
                continue;
            }
            if !texts.contains(&text) {
                texts.push(text);
            }
        }

        let mut texts = texts.into_iter();
        if let Some(first) = texts.next() {
            if meta.title == UNKNOWN {
                meta.title = first;
            }
        }
        if let Some(second) = texts.next() {
            if meta.artist == UNKNOWN {
                meta.artist = second;
            }
        }
    }

    meta
}

fn is_candidate(text: &str) -> bool {
    !text.is_empty() && !text.contains(SEPARATOR)
}
