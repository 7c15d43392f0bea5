//! In-memory document that stands in for the host's rendered surface.
//!
//! Nodes live in an arena and are never freed, so a removed node can still be
//! inspected after the fact. Child-list changes under the root are recorded as
//! `MutationRecord`s, the way a subtree observer on the document would see them.

use std::collections::HashSet;

use scraper::{ElementRef, Html};

use crate::tree::{HostTree, ImageState, MutationRecord, NodeId, Position, TreeEvent};

/// Parsed snapshots carry no decode information; images without explicit
/// dimensions are treated as loaded at this edge length.
const SNAPSHOT_FALLBACK_EDGE: u32 = 1;

#[derive(Debug, Clone)]
enum NodeKind {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    image: ImageState,
    position: Position,
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<NodeData>,
    root: NodeId,
    body: NodeId,
    events: Vec<TreeEvent>,
    load_listeners: HashSet<NodeId>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// An empty `<html><body></body></html>` document.
    pub fn new() -> Self {
        let mut doc = Document {
            nodes: Vec::new(),
            root: NodeId(0),
            body: NodeId(0),
            events: Vec::new(),
            load_listeners: HashSet::new(),
        };
        let root = doc.alloc_element("html", Vec::new());
        let body = doc.alloc_element("body", Vec::new());
        doc.link(root, body);
        doc.root = root;
        doc.body = body;
        doc
    }

    /// Builds a document from a rendered HTML snapshot.
    ///
    /// Images are complete unless they carry a `data-loading` attribute; natural
    /// size comes from their `width`/`height` attributes.
    pub fn from_html(html: &str) -> Self {
        let parsed = Html::parse_document(html);
        let mut doc = Document {
            nodes: Vec::new(),
            root: NodeId(0),
            body: NodeId(0),
            events: Vec::new(),
            load_listeners: HashSet::new(),
        };
        let root = doc.import_element(parsed.root_element());
        doc.root = root;
        doc.body = doc
            .children(root)
            .into_iter()
            .find(|child| doc.tag(*child) == Some("body"))
            .unwrap_or(root);
        doc
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Creates an element and appends it under `parent`, recording the change.
    pub fn append_element(&mut self, parent: NodeId, tag: &str, attrs: &[(&str, &str)]) -> NodeId {
        let attrs = attrs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        let node = self.alloc_element(tag, attrs);
        self.append_child(parent, node);
        node
    }

    pub fn append_text(&mut self, parent: NodeId, text: &str) -> NodeId {
        let node = self.alloc(NodeKind::Text(text.to_string()));
        self.append_child(parent, node);
        node
    }

    /// Parses `html` as a fragment and appends its top-level nodes under
    /// `parent`, one mutation record per top-level node.
    pub fn append_html(&mut self, parent: NodeId, html: &str) -> Vec<NodeId> {
        let fragment = Html::parse_fragment(html);
        let holder = self.import_element(fragment.root_element());
        let top_level = self.children(holder);
        for node in &top_level {
            self.append_child(parent, *node);
        }
        top_level
    }

    /// Removes every child of `parent`, recording each removal.
    pub fn clear_children(&mut self, parent: NodeId) {
        for child in self.children(parent) {
            self.remove(child);
        }
    }

    pub fn set_image_state(&mut self, node: NodeId, state: ImageState) {
        if let Some(data) = self.nodes.get_mut(node.0) {
            data.image = state;
        }
    }

    /// Marks an image as decoded and fires its one-shot load continuation, if any.
    pub fn finish_image_load(&mut self, node: NodeId, width: u32, height: u32) {
        self.set_image_state(node, ImageState::loaded(width, height));
        if self.load_listeners.remove(&node) {
            self.events.push(TreeEvent::ImageLoaded(node));
        }
    }

    pub fn has_load_listener(&self, node: NodeId) -> bool {
        self.load_listeners.contains(&node)
    }

    /// Live elements under the root that carry `class`.
    pub fn count_with_class(&self, class: &str) -> usize {
        let mut count = 0;
        let mut stack = vec![self.root];
        while let Some(node) = stack.pop() {
            if self.has_class(node, class) {
                count += 1;
            }
            stack.extend(self.children(node));
        }
        count
    }

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeData {
            kind,
            parent: None,
            children: Vec::new(),
            image: ImageState::default(),
            position: Position::Static,
        });
        id
    }

    fn alloc_element(&mut self, tag: &str, attrs: Vec<(String, String)>) -> NodeId {
        let position = attrs
            .iter()
            .find(|(name, _)| name == "style")
            .and_then(|(_, style)| inline_position(style))
            .unwrap_or_default();
        let node = self.alloc(NodeKind::Element {
            tag: tag.to_ascii_lowercase(),
            attrs,
        });
        self.nodes[node.0].position = position;
        node
    }

    /// Attaches without recording; only used while building detached subtrees.
    fn link(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    fn import_element(&mut self, element: ElementRef<'_>) -> NodeId {
        let value = element.value();
        let attrs: Vec<(String, String)> = value
            .attrs()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        let is_img = value.name().eq_ignore_ascii_case("img");
        let pending = attrs.iter().any(|(name, _)| name == "data-loading");
        let width = dimension(&attrs, "width");
        let height = dimension(&attrs, "height");

        let node = self.alloc_element(value.name(), attrs);
        if is_img && !pending {
            self.nodes[node.0].image = ImageState::loaded(
                width.unwrap_or(SNAPSHOT_FALLBACK_EDGE),
                height.unwrap_or(SNAPSHOT_FALLBACK_EDGE),
            );
        }

        for child in element.children() {
            if let Some(child_element) = ElementRef::wrap(child) {
                let imported = self.import_element(child_element);
                self.link(node, imported);
            } else if let Some(text) = child.value().as_text() {
                let content: &str = text;
                let imported = self.alloc(NodeKind::Text(content.to_string()));
                self.link(node, imported);
            }
        }
        node
    }

    fn record(&mut self, record: MutationRecord) {
        if self.is_connected(record.target) {
            self.events.push(TreeEvent::Mutation(record));
        }
    }

    fn attrs_mut(&mut self, node: NodeId) -> Option<&mut Vec<(String, String)>> {
        match self.nodes.get_mut(node.0).map(|data| &mut data.kind) {
            Some(NodeKind::Element { attrs, .. }) => Some(attrs),
            _ => None,
        }
    }
}

impl HostTree for Document {
    fn root(&self) -> NodeId {
        self.root
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.0).and_then(|data| data.parent)
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(node.0)
            .map(|data| data.children.clone())
            .unwrap_or_default()
    }

    fn tag(&self, node: NodeId) -> Option<&str> {
        match self.nodes.get(node.0).map(|data| &data.kind) {
            Some(NodeKind::Element { tag, .. }) => Some(tag.as_str()),
            _ => None,
        }
    }

    fn attr(&self, node: NodeId, name: &str) -> Option<&str> {
        match self.nodes.get(node.0).map(|data| &data.kind) {
            Some(NodeKind::Element { attrs, .. }) => attrs
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str()),
            _ => None,
        }
    }

    fn text_content(&self, node: NodeId) -> String {
        let mut text = String::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            let Some(data) = self.nodes.get(current.0) else {
                continue;
            };
            if let NodeKind::Text(content) = &data.kind {
                text.push_str(content);
            }
            stack.extend(data.children.iter().rev().copied());
        }
        text
    }

    fn image_state(&self, node: NodeId) -> ImageState {
        self.nodes
            .get(node.0)
            .map(|data| data.image)
            .unwrap_or_default()
    }

    fn computed_position(&self, node: NodeId) -> Position {
        self.nodes
            .get(node.0)
            .map(|data| data.position)
            .unwrap_or_default()
    }

    fn create_element(&mut self, tag: &str) -> NodeId {
        self.alloc_element(tag, Vec::new())
    }

    fn append_child(&mut self, parent: NodeId, child: NodeId) {
        if parent.0 >= self.nodes.len() || child.0 >= self.nodes.len() || parent == child {
            return;
        }
        // Appending an ancestor under its own descendant would form a cycle.
        if self.contains(child, parent) {
            return;
        }
        self.remove(child);
        self.link(parent, child);
        self.record(MutationRecord::added(parent, child));
    }

    fn remove(&mut self, node: NodeId) {
        let Some(parent) = self.parent(node) else {
            return;
        };
        self.record(MutationRecord::removed(parent, node));
        self.nodes[parent.0].children.retain(|child| *child != node);
        self.nodes[node.0].parent = None;
    }

    fn set_attr(&mut self, node: NodeId, name: &str, value: &str) {
        let Some(attrs) = self.attrs_mut(node) else {
            return;
        };
        match attrs.iter_mut().find(|(key, _)| key == name) {
            Some((_, existing)) => *existing = value.to_string(),
            None => attrs.push((name.to_string(), value.to_string())),
        }
    }

    fn add_class(&mut self, node: NodeId, class: &str) {
        if self.has_class(node, class) {
            return;
        }
        let updated = match self.attr(node, "class") {
            Some(existing) if !existing.trim().is_empty() => format!("{} {}", existing.trim(), class),
            _ => class.to_string(),
        };
        self.set_attr(node, "class", &updated);
    }

    fn set_position(&mut self, node: NodeId, position: Position) {
        if let Some(data) = self.nodes.get_mut(node.0) {
            data.position = position;
        }
    }

    fn listen_for_load(&mut self, image: NodeId) {
        self.load_listeners.insert(image);
    }

    fn drain_events(&mut self) -> Vec<TreeEvent> {
        std::mem::take(&mut self.events)
    }
}

fn inline_position(style: &str) -> Option<Position> {
    style.split(';').find_map(|declaration| {
        let (property, value) = declaration.split_once(':')?;
        if property.trim().eq_ignore_ascii_case("position") {
            Position::parse(value)
        } else {
            None
        }
    })
}

fn dimension(attrs: &[(String, String)], name: &str) -> Option<u32> {
    attrs
        .iter()
        .find(|(key, _)| key == name)
        .and_then(|(_, value)| value.trim().trim_end_matches("px").parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{Query, Selector};

    #[test]
    fn snapshot_images_are_loaded_unless_marked_pending() {
        let doc = Document::from_html(
            r#"<div><img id="a" src="x" width="300" height="300"><img id="b" src="y" data-loading></div>"#,
        );
        let images = doc.select_all(doc.root(), &Selector::one(Query::tag("img")));
        assert_eq!(images.len(), 2);
        assert_eq!(doc.image_state(images[0]), ImageState::loaded(300, 300));
        assert!(!doc.image_state(images[1]).is_ready());
    }

    #[test]
    fn mutations_are_recorded_only_for_connected_targets() {
        let mut doc = Document::new();
        let detached = doc.create_element("div");
        let child = doc.create_element("span");
        doc.append_child(detached, child);
        assert!(doc.drain_events().is_empty());

        let body = doc.body();
        doc.append_child(body, detached);
        doc.remove(detached);
        let events = doc.drain_events();
        assert_eq!(
            events,
            vec![
                TreeEvent::Mutation(MutationRecord::added(body, detached)),
                TreeEvent::Mutation(MutationRecord::removed(body, detached)),
            ]
        );
    }

    #[test]
    fn load_continuation_fires_once() {
        let mut doc = Document::new();
        let body = doc.body();
        let img = doc.append_element(body, "img", &[("src", "x")]);
        doc.drain_events();

        doc.listen_for_load(img);
        doc.listen_for_load(img);
        doc.finish_image_load(img, 10, 10);
        doc.finish_image_load(img, 10, 10);
        assert_eq!(doc.drain_events(), vec![TreeEvent::ImageLoaded(img)]);
    }

    #[test]
    fn inline_style_sets_position() {
        let doc = Document::from_html(r#"<div style="color: red; position: absolute"></div>"#);
        let div = doc
            .select_first(doc.root(), &Selector::one(Query::tag("div")))
            .unwrap();
        assert_eq!(doc.computed_position(div), Position::Absolute);
    }

    #[test]
    fn text_content_concatenates_in_order() {
        let doc = Document::from_html("<p>Hello <b>big</b> world</p>");
        let p = doc
            .select_first(doc.root(), &Selector::one(Query::tag("p")))
            .unwrap();
        assert_eq!(doc.text_content(p), "Hello big world");
    }
}
