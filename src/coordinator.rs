//! The single actor that owns the host tree and the attachment state.
//!
//! Host changes, clicks, settings refreshes and download completions all
//! funnel into one loop, so evaluation passes never overlap and the state is
//! only ever touched from here.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::artwork::{self, ResolutionTier};
use crate::attachment::{Attachment, AttachmentState, Evaluation};
use crate::bridge::{BatchVerdict, ChangeBridge};
use crate::download::{self, CoverSink, DownloadRequest, SaveMode, SavedCover};
use crate::error::Result;
use crate::notify::{notify_if_permitted, Notifier, Permission};
use crate::settings::{SettingsSnapshot, SharedSettings};
use crate::track::{self, TrackIdentity};
use crate::tree::{HostTree, NodeId, TreeEvent};

pub enum HostEvent<T> {
    /// The host re-rendered; the closure applies its changes to the tree.
    Mutate(Box<dyn FnOnce(&mut T) + Send>),
    /// The user clicked `node`.
    Click(NodeId),
    /// Press the control without knowing its node.
    ActivateControl,
    Shutdown,
}

pub struct HostHandle<T> {
    tx: mpsc::UnboundedSender<HostEvent<T>>,
}

impl<T> Clone for HostHandle<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> HostHandle<T> {
    /// Each call returns false once the coordinator has stopped.
    pub fn mutate(&self, apply: impl FnOnce(&mut T) + Send + 'static) -> bool {
        self.tx.send(HostEvent::Mutate(Box::new(apply))).is_ok()
    }

    pub fn click(&self, node: NodeId) -> bool {
        self.tx.send(HostEvent::Click(node)).is_ok()
    }

    pub fn activate_control(&self) -> bool {
        self.tx.send(HostEvent::ActivateControl).is_ok()
    }

    pub fn shutdown(&self) -> bool {
        self.tx.send(HostEvent::Shutdown).is_ok()
    }
}

pub fn host_channel<T>() -> (HostHandle<T>, mpsc::UnboundedReceiver<HostEvent<T>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (HostHandle { tx }, rx)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub evaluations: usize,
    pub batches_relevant: usize,
    pub batches_ignored: usize,
    pub batches_discarded: usize,
    pub downloads_started: usize,
    pub downloads_finished: usize,
}

struct DownloadDone {
    url: String,
    result: Result<SavedCover>,
}

pub struct Coordinator<T, D, N> {
    tree: T,
    attachment: Attachment,
    bridge: ChangeBridge,
    settings: SharedSettings,
    sink: Arc<D>,
    notifier: Arc<N>,
    last_auto_download: Option<TrackIdentity>,
    last_download: Option<Result<SavedCover>>,
    done_tx: mpsc::UnboundedSender<DownloadDone>,
    done_rx: mpsc::UnboundedReceiver<DownloadDone>,
    stats: CoordinatorStats,
}

impl<T: HostTree, D: CoverSink, N: Notifier> Coordinator<T, D, N> {
    pub fn new(tree: T, sink: D, notifier: N, debounce: Duration) -> Self {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        Self {
            tree,
            attachment: Attachment::new(),
            bridge: ChangeBridge::new(debounce),
            settings: None,
            sink: Arc::new(sink),
            notifier: Arc::new(notifier),
            last_auto_download: None,
            last_download: None,
            done_tx,
            done_rx,
            stats: CoordinatorStats::default(),
        }
    }

    pub fn with_settings(mut self, settings: SharedSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn tree(&self) -> &T {
        &self.tree
    }

    pub fn state(&self) -> &AttachmentState {
        self.attachment.state()
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.stats
    }

    pub fn settings(&self) -> Option<&SettingsSnapshot> {
        self.settings.as_deref()
    }

    pub fn sink(&self) -> &D {
        &self.sink
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Outcome of the most recently finished download.
    pub fn last_download(&self) -> Option<&Result<SavedCover>> {
        self.last_download.as_ref()
    }

    pub fn take_last_download(&mut self) -> Option<Result<SavedCover>> {
        self.last_download.take()
    }

    /// One evaluation pass, then whatever tree events it caused.
    pub fn evaluate(&mut self) -> Evaluation {
        let outcome = self.run_pass();
        self.flush_tree_events();
        outcome
    }

    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<HostEvent<T>>,
        mut settings_rx: watch::Receiver<SharedSettings>,
    ) -> Self {
        if self.notifier.permission() == Permission::Default {
            self.notifier.request_permission();
        }

        let initial = self.evaluate();
        info!(?initial, "Coordinator started");

        let mut settings_open = true;
        loop {
            let deadline = self.bridge.deadline();
            tokio::select! {
                event = events.recv() => match event {
                    Some(HostEvent::Mutate(apply)) => {
                        apply(&mut self.tree);
                        self.flush_tree_events();
                    }
                    Some(HostEvent::Click(node)) => {
                        if self.attachment.is_control_hit(&self.tree, node) {
                            self.download_current();
                        }
                    }
                    Some(HostEvent::ActivateControl) => self.download_current(),
                    Some(HostEvent::Shutdown) | None => break,
                },
                Some(done) = self.done_rx.recv() => self.finish_download(done),
                changed = settings_rx.changed(), if settings_open => {
                    if changed.is_err() {
                        debug!("Settings channel closed");
                        settings_open = false;
                        continue;
                    }
                    let snapshot = settings_rx.borrow_and_update().clone();
                    self.apply_settings(snapshot);
                }
                _ = sleep_until_deadline(deadline), if deadline.is_some() => {
                    if self.bridge.take_if_due(Instant::now()) {
                        self.evaluate();
                    }
                }
            }
        }

        if self.attachment.state().busy_downloading() {
            debug!("Waiting for in-flight download before stopping");
            if let Some(done) = self.done_rx.recv().await {
                self.finish_download(done);
            }
        }

        info!(stats = ?self.stats, "Coordinator stopped");
        self
    }

    fn run_pass(&mut self) -> Evaluation {
        let tier = ResolutionTier::from_settings(self.settings.as_deref());
        let outcome = self.attachment.evaluate(&mut self.tree, tier);
        if outcome != Evaluation::Busy {
            self.stats.evaluations += 1;
        }
        outcome
    }

    /// Mutation records become one batch for the bridge; fired load
    /// continuations re-enter evaluation straight away.
    fn flush_tree_events(&mut self) {
        loop {
            let events = self.tree.drain_events();
            if events.is_empty() {
                break;
            }

            let mut batch = Vec::new();
            let mut loaded = Vec::new();
            for event in events {
                match event {
                    TreeEvent::Mutation(record) => batch.push(record),
                    TreeEvent::ImageLoaded(image) => loaded.push(image),
                }
            }

            if !batch.is_empty() {
                match self.bridge.observe(&self.tree, &batch, self.attachment.state()) {
                    BatchVerdict::Armed => self.stats.batches_relevant += 1,
                    BatchVerdict::Ignored => self.stats.batches_ignored += 1,
                    BatchVerdict::Discarded => self.stats.batches_discarded += 1,
                }
            }

            for image in loaded {
                debug!(image = image.index(), "Artwork loaded, re-evaluating");
                self.run_pass();
            }
        }
    }

    fn apply_settings(&mut self, snapshot: SharedSettings) {
        self.settings = snapshot;
        self.check_auto_download();
    }

    /// Each newly shown track is downloaded once while auto-download is on.
    /// Independent of evaluation; only an in-flight download holds it back.
    fn check_auto_download(&mut self) {
        let Some(settings) = self.settings.clone() else {
            return;
        };
        if !settings.auto_download() || self.attachment.state().busy_downloading() {
            return;
        }
        let Some(region) = track::player_region(&self.tree) else {
            return;
        };
        let Some(identity) = track::resolve_identity(&self.tree, region) else {
            return;
        };
        if self.last_auto_download.as_ref() == Some(&identity) {
            return;
        }
        let tier = ResolutionTier::from_settings(Some(&*settings));
        let Some(url) = artwork::current_artwork_url(&self.tree, region, tier) else {
            return;
        };

        info!(track = %identity, "Auto-downloading cover");
        if self.start_download(url) {
            self.last_auto_download = Some(identity);
        }
    }

    /// Downloads the artwork behind the current control, at the tier the
    /// settings ask for right now.
    fn download_current(&mut self) {
        let Some(stored) = self.attachment.state().artwork().map(|artwork| artwork.url.clone()) else {
            warn!("No artwork behind the control, nothing to download");
            return;
        };
        let tier = ResolutionTier::from_settings(self.settings.as_deref());
        let url = track::player_region(&self.tree)
            .and_then(|region| artwork::current_artwork_url(&self.tree, region, tier))
            .unwrap_or(stored);
        self.start_download(url);
    }

    fn start_download(&mut self, url: String) -> bool {
        if self.attachment.state().busy_downloading() {
            info!("Download already in progress");
            return false;
        }

        let metadata = track::player_region(&self.tree)
            .map(|region| track::resolve_metadata(&self.tree, region));
        let pattern = self
            .settings
            .as_deref()
            .and_then(SettingsSnapshot::file_name_pattern);
        let filename = download::build_filename(metadata.as_ref(), pattern);

        info!(url = %url, filename = %filename, "Starting cover download");
        self.attachment.set_downloading(true);
        self.stats.downloads_started += 1;

        let sink = Arc::clone(&self.sink);
        let done_tx = self.done_tx.clone();
        let request = DownloadRequest {
            url: url.clone(),
            filename,
        };
        tokio::spawn(async move {
            let result = sink.deliver(request).await;
            let _ = done_tx.send(DownloadDone { url, result });
        });
        true
    }

    fn finish_download(&mut self, done: DownloadDone) {
        self.attachment.set_downloading(false);
        self.stats.downloads_finished += 1;

        match &done.result {
            Ok(saved) => {
                let show = self
                    .settings
                    .as_deref()
                    .map(SettingsSnapshot::show_notifications)
                    .unwrap_or(false);
                if show {
                    let title = match saved.mode {
                        SaveMode::Prompted => "Cover saved",
                        SaveMode::Direct => "Cover downloaded",
                    };
                    notify_if_permitted(
                        self.notifier.as_ref(),
                        title,
                        &saved.filename,
                        Some(done.url.as_str()),
                    );
                }
            }
            Err(err) if err.is_cancelled() => debug!("Save dialog dismissed"),
            Err(err) => error!(error = %err, url = %done.url, "Cover download failed"),
        }
        self.last_download = Some(done.result);
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
