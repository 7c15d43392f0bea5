//! Keeps exactly one save-cover control attached to the current cover.
//!
//! Each trigger runs one `evaluate` pass. A pass either leaves the tree alone,
//! tears the control down, or moves it to the container of the current
//! artwork. Nothing here ever fails: a missing element just ends the pass.

use serde::Serialize;
use tracing::{debug, info};

use crate::artwork::{self, ArtworkLookup, ArtworkReference, ResolutionTier};
use crate::track::{self, TrackIdentity};
use crate::tree::{HostTree, NodeId, Position};

/// Class carried by the injected control.
pub const CONTROL_CLASS: &str = "cover-download-button";
/// Class added to whichever container currently hosts the control.
pub const CONTAINER_CLASS: &str = "cover-download-button-container";

const DOWNLOAD_ICON_PATH: &str = "M19 9h-4V3H9v6H5l7 7 7-7zM5 18v2h14v-2H5z";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentState {
    control: Option<NodeId>,
    container: Option<NodeId>,
    last_identity: Option<TrackIdentity>,
    artwork: Option<ArtworkReference>,
    busy_downloading: bool,
    busy_evaluating: bool,
}

impl AttachmentState {
    pub fn control(&self) -> Option<NodeId> {
        self.control
    }

    pub fn container(&self) -> Option<NodeId> {
        self.container
    }

    pub fn last_identity(&self) -> Option<&TrackIdentity> {
        self.last_identity.as_ref()
    }

    /// Artwork the current control downloads.
    pub fn artwork(&self) -> Option<&ArtworkReference> {
        self.artwork.as_ref()
    }

    pub fn busy_downloading(&self) -> bool {
        self.busy_downloading
    }

    pub fn busy_evaluating(&self) -> bool {
        self.busy_evaluating
    }

    /// Either flag on its own suppresses re-evaluation.
    pub fn is_busy(&self) -> bool {
        self.busy_downloading || self.busy_evaluating
    }

    /// The recorded control, but only while it is still a child of the
    /// recorded container and that container is still live.
    pub fn live_control<T: HostTree + ?Sized>(&self, tree: &T) -> Option<NodeId> {
        let control = self.control?;
        let container = self.container?;
        if tree.parent(control) == Some(container) && tree.is_connected(container) {
            Some(control)
        } else {
            None
        }
    }
}

/// What a single pass did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Evaluation {
    /// Dropped because a pass or a download was already in progress.
    Busy,
    /// Player closed; any control was torn down and state cleared.
    Closed { removed: bool },
    /// Same track, control still in place.
    Steady,
    NoArtwork,
    /// Artwork not decoded yet; a load continuation was registered.
    AwaitingLoad { image: NodeId },
    NoContainer,
    /// Container unchanged and the control is still inside it.
    Unchanged,
    /// Old control discarded but no URL could be resolved, so none was attached.
    UrlUnresolved,
    Attached { control: NodeId, container: NodeId },
}

#[derive(Debug, Default)]
pub struct Attachment {
    state: AttachmentState,
}

impl Attachment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &AttachmentState {
        &self.state
    }

    pub fn set_downloading(&mut self, downloading: bool) {
        self.state.busy_downloading = downloading;
    }

    /// True when `node` is the live control or sits inside it.
    pub fn is_control_hit<T: HostTree + ?Sized>(&self, tree: &T, node: NodeId) -> bool {
        self.state
            .live_control(tree)
            .map(|control| tree.contains(control, node))
            .unwrap_or(false)
    }

    /// Runs one pass unless one is already running or a download is in flight.
    pub fn evaluate<T: HostTree + ?Sized>(&mut self, tree: &mut T, tier: ResolutionTier) -> Evaluation {
        if self.state.is_busy() {
            debug!(
                downloading = self.state.busy_downloading,
                evaluating = self.state.busy_evaluating,
                "Skipping evaluation while busy"
            );
            return Evaluation::Busy;
        }

        self.state.busy_evaluating = true;
        let outcome = self.reconcile(tree, tier);
        self.state.busy_evaluating = false;

        debug!(?outcome, "Evaluation finished");
        outcome
    }

    fn reconcile<T: HostTree + ?Sized>(&mut self, tree: &mut T, tier: ResolutionTier) -> Evaluation {
        let Some(region) = track::player_region(tree) else {
            let removed = self.discard_control(tree);
            if removed {
                info!("Player closed, control removed");
            }
            self.state.container = None;
            self.state.last_identity = None;
            self.state.artwork = None;
            return Evaluation::Closed { removed };
        };

        let identity = track::resolve_identity(tree, region);
        if identity.is_some()
            && identity == self.state.last_identity
            && self.state.live_control(tree).is_some()
        {
            return Evaluation::Steady;
        }
        let track_changed = identity != self.state.last_identity;
        if track_changed {
            debug!(
                from = ?self.state.last_identity,
                to = ?identity,
                "Track identity changed"
            );
        }
        self.state.last_identity = identity;

        let image = match artwork::locate(tree, region) {
            ArtworkLookup::Missing => return Evaluation::NoArtwork,
            ArtworkLookup::Pending(image) => {
                tree.listen_for_load(image);
                return Evaluation::AwaitingLoad { image };
            }
            ArtworkLookup::Ready(image) => image,
        };

        let Some(container) = artwork::cover_container(tree, image) else {
            return Evaluation::NoContainer;
        };

        // A new track rendered into the same container still gets a fresh control.
        if !track_changed && self.state.container == Some(container) {
            if let Some(control) = self.state.control {
                if tree.contains(container, control) {
                    if let Some(reference) = artwork::resolve_artwork(tree, image, tier) {
                        self.state.artwork = Some(reference);
                    }
                    return Evaluation::Unchanged;
                }
            }
        }

        self.discard_control(tree);

        let Some(reference) = artwork::resolve_artwork(tree, image, tier) else {
            return Evaluation::UrlUnresolved;
        };

        if tree.computed_position(container) == Position::Static {
            tree.set_position(container, Position::Relative);
        }
        tree.add_class(container, CONTAINER_CLASS);

        let control = build_control(tree);
        tree.append_child(container, control);

        info!(
            track = ?self.state.last_identity,
            kind = ?track::track_kind(tree, region),
            url = %reference.url,
            "Control attached"
        );

        self.state.control = Some(control);
        self.state.container = Some(container);
        self.state.artwork = Some(reference);
        Evaluation::Attached { control, container }
    }

    /// Detaches the recorded control, if any. Returns whether it was in a tree.
    fn discard_control<T: HostTree + ?Sized>(&mut self, tree: &mut T) -> bool {
        let Some(control) = self.state.control.take() else {
            return false;
        };
        let attached = tree.parent(control).is_some();
        if attached {
            tree.remove(control);
        }
        attached
    }
}

/// Builds the control subtree while it is still detached, so attaching it is
/// a single child-list change.
fn build_control<T: HostTree + ?Sized>(tree: &mut T) -> NodeId {
    let button = tree.create_element("button");
    tree.set_attr(button, "type", "button");
    tree.set_attr(button, "aria-label", "Download cover");
    tree.add_class(button, CONTROL_CLASS);

    let svg = tree.create_element("svg");
    tree.set_attr(svg, "viewBox", "0 0 24 24");
    tree.set_attr(svg, "xmlns", "http://www.w3.org/2000/svg");
    let path = tree.create_element("path");
    tree.set_attr(path, "d", DOWNLOAD_ICON_PATH);

    tree.append_child(svg, path);
    tree.append_child(button, svg);
    button
}
