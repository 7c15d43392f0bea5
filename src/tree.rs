//! Structural view of the host's rendered tree.
//!
//! The engine never understands the host's component model. It only asks
//! structural questions (tag, attribute substring, class substring, nearest
//! ancestor) through `HostTree`, so any rendered surface that can answer them
//! can be driven, including the synthetic `dom::Document` used in tests.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Load state of an image element, as the host reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageState {
    pub complete: bool,
    pub natural_width: u32,
    pub natural_height: u32,
}

impl ImageState {
    pub fn loaded(width: u32, height: u32) -> Self {
        Self {
            complete: true,
            natural_width: width,
            natural_height: height,
        }
    }

    pub fn pending() -> Self {
        Self::default()
    }

    /// A completed image with zero natural height is a failed or placeholder
    /// decode and is not usable yet.
    pub fn is_ready(&self) -> bool {
        self.complete && self.natural_height > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Position {
    #[default]
    Static,
    Relative,
    Absolute,
    Fixed,
    Sticky,
}

impl Position {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "static" => Some(Position::Static),
            "relative" => Some(Position::Relative),
            "absolute" => Some(Position::Absolute),
            "fixed" => Some(Position::Fixed),
            "sticky" => Some(Position::Sticky),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Position::Static => "static",
            Position::Relative => "relative",
            Position::Absolute => "absolute",
            Position::Fixed => "fixed",
            Position::Sticky => "sticky",
        }
    }
}

/// One child-list change under an observed target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub target: NodeId,
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
}

impl MutationRecord {
    pub fn added(target: NodeId, node: NodeId) -> Self {
        Self {
            target,
            added: vec![node],
            removed: Vec::new(),
        }
    }

    pub fn removed(target: NodeId, node: NodeId) -> Self {
        Self {
            target,
            added: Vec::new(),
            removed: vec![node],
        }
    }
}

/// Something the tree wants the coordinator to know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEvent {
    Mutation(MutationRecord),
    /// A one-shot load continuation registered with `listen_for_load` fired.
    ImageLoaded(NodeId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    AttrEquals(&'static str, &'static str),
    AttrContains(&'static str, &'static str),
    /// Substring of the raw `class` attribute, case-sensitive.
    ClassContains(&'static str),
}

/// Optional tag plus matchers that must all hold.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Query {
    tag: Option<&'static str>,
    matchers: Vec<Matcher>,
}

impl Query {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn tag(tag: &'static str) -> Self {
        Self {
            tag: Some(tag),
            matchers: Vec::new(),
        }
    }

    pub fn attr_eq(mut self, name: &'static str, value: &'static str) -> Self {
        self.matchers.push(Matcher::AttrEquals(name, value));
        self
    }

    pub fn attr_contains(mut self, name: &'static str, needle: &'static str) -> Self {
        self.matchers.push(Matcher::AttrContains(name, needle));
        self
    }

    pub fn class_contains(mut self, needle: &'static str) -> Self {
        self.matchers.push(Matcher::ClassContains(needle));
        self
    }
}

/// Matches when any of its queries does, like a CSS selector list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector(Vec<Query>);

impl Selector {
    pub fn one(query: Query) -> Self {
        Self(vec![query])
    }

    pub fn any_of(queries: impl IntoIterator<Item = Query>) -> Self {
        Self(queries.into_iter().collect())
    }

    pub fn queries(&self) -> &[Query] {
        &self.0
    }
}

impl From<Query> for Selector {
    fn from(query: Query) -> Self {
        Selector::one(query)
    }
}

pub trait HostTree {
    /// The observed root. A node is live only while its ancestor chain reaches it.
    fn root(&self) -> NodeId;
    fn parent(&self, node: NodeId) -> Option<NodeId>;
    fn children(&self, node: NodeId) -> Vec<NodeId>;
    /// Lowercase tag name, `None` for text nodes.
    fn tag(&self, node: NodeId) -> Option<&str>;
    fn attr(&self, node: NodeId, name: &str) -> Option<&str>;
    /// Concatenated text of the node and all its descendants.
    fn text_content(&self, node: NodeId) -> String;
    fn image_state(&self, node: NodeId) -> ImageState;
    fn computed_position(&self, node: NodeId) -> Position;

    /// Creates a detached element.
    fn create_element(&mut self, tag: &str) -> NodeId;
    /// Appends `child` as the last child of `parent`, detaching it first if needed.
    fn append_child(&mut self, parent: NodeId, child: NodeId);
    /// Detaches `node` from its parent. No-op for detached nodes.
    fn remove(&mut self, node: NodeId);
    fn set_attr(&mut self, node: NodeId, name: &str, value: &str);
    fn add_class(&mut self, node: NodeId, class: &str);
    fn set_position(&mut self, node: NodeId, position: Position);
    /// Registers a one-shot continuation that surfaces as
    /// `TreeEvent::ImageLoaded` once the image finishes loading.
    fn listen_for_load(&mut self, image: NodeId);
    /// Pending mutation records and fired continuations, oldest first.
    fn drain_events(&mut self) -> Vec<TreeEvent>;

    fn is_element(&self, node: NodeId) -> bool {
        self.tag(node).is_some()
    }

    fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.attr(node, "class")
            .map(|value| value.split_whitespace().any(|token| token == class))
            .unwrap_or(false)
    }

    fn matches(&self, node: NodeId, selector: &Selector) -> bool {
        let Some(tag) = self.tag(node) else {
            return false;
        };
        selector.queries().iter().any(|query| {
            if let Some(wanted) = query.tag {
                if !tag.eq_ignore_ascii_case(wanted) {
                    return false;
                }
            }
            query.matchers.iter().all(|matcher| match matcher {
                Matcher::AttrEquals(name, value) => self.attr(node, name) == Some(*value),
                Matcher::AttrContains(name, needle) => self
                    .attr(node, name)
                    .map(|v| v.contains(needle))
                    .unwrap_or(false),
                Matcher::ClassContains(needle) => self
                    .attr(node, "class")
                    .map(|v| v.contains(needle))
                    .unwrap_or(false),
            })
        })
    }

    /// Descendants of `scope` (not `scope` itself) in document order.
    fn select_all(&self, scope: NodeId, selector: &Selector) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack: Vec<NodeId> = self.children(scope).into_iter().rev().collect();
        while let Some(node) = stack.pop() {
            if self.matches(node, selector) {
                found.push(node);
            }
            stack.extend(self.children(node).into_iter().rev());
        }
        found
    }

    fn select_first(&self, scope: NodeId, selector: &Selector) -> Option<NodeId> {
        let mut stack: Vec<NodeId> = self.children(scope).into_iter().rev().collect();
        while let Some(node) = stack.pop() {
            if self.matches(node, selector) {
                return Some(node);
            }
            stack.extend(self.children(node).into_iter().rev());
        }
        None
    }

    /// `node` itself or its nearest matching ancestor.
    fn closest(&self, node: NodeId, selector: &Selector) -> Option<NodeId> {
        let mut current = Some(node);
        while let Some(candidate) = current {
            if self.matches(candidate, selector) {
                return Some(candidate);
            }
            current = self.parent(candidate);
        }
        None
    }

    /// Inclusive: a node contains itself.
    fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(candidate) = current {
            if candidate == ancestor {
                return true;
            }
            current = self.parent(candidate);
        }
        false
    }

    fn is_connected(&self, node: NodeId) -> bool {
        self.contains(self.root(), node)
    }
}
