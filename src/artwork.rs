//! Cover image lookup and download URL resolution.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::settings::{keys, SettingsSnapshot};
use crate::tree::{HostTree, NodeId, Query, Selector};

/// Hosts the player serves cover art from.
pub const ARTWORK_HOSTS: [&str; 2] = ["avatars.yandex.net", "music.yandex"];

static SIZE_SEGMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\d+x\d+").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolutionTier {
    /// Quality 1, 200x200.
    Small,
    /// Quality 2, 400x400.
    Medium,
    /// Quality 3, 1000x1000.
    Large,
    /// Quality 4 or unset; the `/orig` segment.
    #[default]
    Original,
    /// Explicit square edge from `imageSize`.
    Custom(u32),
}

impl ResolutionTier {
    /// `imageQuality` wins whenever it is present, even with a value outside
    /// 1..=4 (which means original). `imageSize` is only read without it.
    pub fn from_settings(settings: Option<&SettingsSnapshot>) -> Self {
        let Some(settings) = settings else {
            return ResolutionTier::Original;
        };
        if settings.value(keys::IMAGE_QUALITY).is_some() {
            return match settings.image_quality() {
                Some(1) => ResolutionTier::Small,
                Some(2) => ResolutionTier::Medium,
                Some(3) => ResolutionTier::Large,
                _ => ResolutionTier::Original,
            };
        }
        settings
            .image_size()
            .map(ResolutionTier::Custom)
            .unwrap_or(ResolutionTier::Original)
    }

    /// Path segment that replaces the `/{w}x{h}` part of an artwork URL.
    pub fn segment(&self) -> String {
        match self {
            ResolutionTier::Small => "/200x200".to_string(),
            ResolutionTier::Medium => "/400x400".to_string(),
            ResolutionTier::Large => "/1000x1000".to_string(),
            ResolutionTier::Original => "/orig".to_string(),
            ResolutionTier::Custom(edge) => format!("/{edge}x{edge}"),
        }
    }
}

/// Lookup-only handle on the matched cover image plus its download URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtworkReference {
    pub image: NodeId,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtworkLookup {
    Missing,
    /// Found but not decoded yet; wait for its load continuation.
    Pending(NodeId),
    Ready(NodeId),
}

fn artwork_image_selector() -> Selector {
    Selector::any_of(
        ARTWORK_HOSTS
            .iter()
            .map(|host| Query::tag("img").attr_contains("src", *host)),
    )
}

fn cover_container_selector() -> Selector {
    Selector::any_of([
        Query::tag("div").class_contains("CoverStack"),
        Query::tag("div").class_contains("Cover"),
    ])
}

pub fn find_artwork_image<T: HostTree + ?Sized>(tree: &T, region: NodeId) -> Option<NodeId> {
    tree.select_first(region, &artwork_image_selector())
}

pub fn locate<T: HostTree + ?Sized>(tree: &T, region: NodeId) -> ArtworkLookup {
    match find_artwork_image(tree, region) {
        None => ArtworkLookup::Missing,
        Some(image) if tree.image_state(image).is_ready() => ArtworkLookup::Ready(image),
        Some(image) => ArtworkLookup::Pending(image),
    }
}

/// Nearest cover-like ancestor, falling back to the image's direct parent.
pub fn cover_container<T: HostTree + ?Sized>(tree: &T, image: NodeId) -> Option<NodeId> {
    tree.closest(image, &cover_container_selector())
        .or_else(|| tree.parent(image))
}

/// Rewrites the first `/{w}x{h}` segment for `tier`. URLs without one pass through.
pub fn resolve_url(src: &str, tier: ResolutionTier) -> String {
    SIZE_SEGMENT_RE
        .replacen(src, 1, tier.segment().as_str())
        .into_owned()
}

pub fn resolve_artwork<T: HostTree + ?Sized>(
    tree: &T,
    image: NodeId,
    tier: ResolutionTier,
) -> Option<ArtworkReference> {
    let src = tree.attr(image, "src")?.trim();
    if src.is_empty() {
        return None;
    }
    Some(ArtworkReference {
        image,
        url: resolve_url(src, tier),
    })
}

/// Download URL for whatever the player shows, ignoring load state.
pub fn current_artwork_url<T: HostTree + ?Sized>(
    tree: &T,
    region: NodeId,
    tier: ResolutionTier,
) -> Option<String> {
    let image = find_artwork_image(tree, region)?;
    resolve_artwork(tree, image, tier).map(|artwork| artwork.url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Document;
    use crate::settings::transform;
    use crate::track::player_region;
    use serde_json::json;

    const SRC: &str = "https://avatars.yandex.net/get-music-content/123/abc.def/200x200";

    fn snapshot(items: serde_json::Value) -> SettingsSnapshot {
        transform(&json!({ "sections": [{ "items": items }] })).unwrap()
    }

    #[test]
    fn quality_three_rewrites_to_thousand() {
        let url = resolve_url(
            "https://avatars.yandex.net/get-music-content/1/a/200x200/cover.jpg",
            ResolutionTier::Large,
        );
        assert!(url.contains("/1000x1000/"));
        assert!(!url.contains("200x200"));
    }

    #[test]
    fn original_drops_size_segment() {
        let url = resolve_url(
            "https://avatars.yandex.net/get-music-content/1/a/200x200/cover.jpg",
            ResolutionTier::Original,
        );
        assert_eq!(url, "https://avatars.yandex.net/get-music-content/1/a/orig/cover.jpg");
        let residual = Regex::new(r"/\d+x\d+").unwrap();
        assert!(!residual.is_match(&url));
    }

    #[test]
    fn url_without_segment_is_unchanged() {
        let src = "https://music.yandex.ru/blocks/cover.png";
        assert_eq!(resolve_url(src, ResolutionTier::Small), src);
    }

    #[test]
    fn tier_from_settings() {
        assert_eq!(ResolutionTier::from_settings(None), ResolutionTier::Original);

        let quality = |q: i64| {
            snapshot(json!([{ "id": "imageQuality", "value": q, "defaultParameter": 4 }]))
        };
        assert_eq!(ResolutionTier::from_settings(Some(&quality(1))), ResolutionTier::Small);
        assert_eq!(ResolutionTier::from_settings(Some(&quality(2))), ResolutionTier::Medium);
        assert_eq!(ResolutionTier::from_settings(Some(&quality(3))), ResolutionTier::Large);
        assert_eq!(ResolutionTier::from_settings(Some(&quality(4))), ResolutionTier::Original);

        let custom = snapshot(json!([{ "id": "imageSize", "input": "640", "defaultParameter": "" }]));
        assert_eq!(ResolutionTier::from_settings(Some(&custom)), ResolutionTier::Custom(640));
        assert_eq!(resolve_url(SRC, ResolutionTier::Custom(640)), SRC.replace("200x200", "640x640"));

        let both = snapshot(json!([
            { "id": "imageQuality", "value": 2 },
            { "id": "imageSize", "input": "640" }
        ]));
        assert_eq!(ResolutionTier::from_settings(Some(&both)), ResolutionTier::Medium);
    }

    #[test]
    fn pending_image_is_reported_with_its_node() {
        let doc = Document::from_html(&format!(
            r#"<div data-test-id="FULLSCREEN_PLAYER_MODAL"><img src="{SRC}" data-loading></div>"#
        ));
        let region = player_region(&doc).unwrap();
        let image = find_artwork_image(&doc, region).unwrap();
        assert_eq!(locate(&doc, region), ArtworkLookup::Pending(image));
    }

    #[test]
    fn foreign_images_are_ignored() {
        let doc = Document::from_html(
            r#"<div data-test-id="FULLSCREEN_PLAYER_MODAL"><img src="https://example.com/200x200/a.jpg"></div>"#,
        );
        let region = player_region(&doc).unwrap();
        assert_eq!(locate(&doc, region), ArtworkLookup::Missing);
        assert_eq!(current_artwork_url(&doc, region, ResolutionTier::Original), None);
    }

    #[test]
    fn container_prefers_cover_ancestor_then_parent() {
        let doc = Document::from_html(&format!(
            r#"<div data-test-id="FULLSCREEN_PLAYER_MODAL">
                 <div class="Poster_CoverStack__x"><span class="Wrap"><img id="a" src="{SRC}"></span></div>
                 <section><img id="b" src="{SRC}"></section>
               </div>"#
        ));
        let images = doc.select_all(doc.root(), &artwork_image_selector());
        let stack = doc.parent(doc.parent(images[0]).unwrap()).unwrap();
        assert_eq!(cover_container(&doc, images[0]), Some(stack));
        assert_eq!(cover_container(&doc, images[1]), doc.parent(images[1]));
    }
}
