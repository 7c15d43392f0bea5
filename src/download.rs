//! Saving the cover: filename derivation, fetching and writing.

use std::env;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{CoverError, Result};
use crate::track::TrackMetadata;

pub const DEFAULT_PATTERN: &str = "{artist} - {title}";
pub const FALLBACK_FILENAME: &str = "cover.jpg";
const EXTENSION: &str = ".jpg";
const ILLEGAL_CHARS: [char; 10] = ['/', '\\', '?', '%', '*', ':', '|', '"', '<', '>'];

/// Replaces every character filesystems reject with `-`.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if ILLEGAL_CHARS.contains(&c) { '-' } else { c })
        .collect()
}

/// `cover.jpg` unless both artist and title are known; otherwise the pattern
/// with its first `{artist}` and first `{title}` substituted.
pub fn build_filename(metadata: Option<&TrackMetadata>, pattern: Option<&str>) -> String {
    let Some(metadata) = metadata.filter(|meta| meta.is_resolved()) else {
        return FALLBACK_FILENAME.to_string();
    };
    let pattern = pattern.unwrap_or(DEFAULT_PATTERN);
    let name = pattern
        .replacen("{artist}", &metadata.artist, 1)
        .replacen("{title}", &metadata.title, 1);
    sanitize_filename(&format!("{name}{EXTENSION}"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub filename: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveMode {
    /// The user picked the destination.
    Prompted,
    /// Written straight into the download directory.
    Direct,
}

#[derive(Debug, Clone, Serialize)]
pub struct SavedCover {
    pub filename: String,
    pub path: Option<PathBuf>,
    pub mode: SaveMode,
    pub saved_at: DateTime<Utc>,
}

/// Whatever turns a download request into a saved file.
pub trait CoverSink: Send + Sync + 'static {
    fn deliver(&self, request: DownloadRequest) -> impl Future<Output = Result<SavedCover>> + Send;
}

/// Final step of a download: put the bytes somewhere. Prompting savers report
/// a dismissed dialog as `CoverError::Cancelled`.
pub trait CoverSaver: Send + Sync + 'static {
    fn save(&self, bytes: Vec<u8>, filename: String) -> impl Future<Output = Result<SavedCover>> + Send;
}

#[derive(Debug, Clone)]
pub struct DirectorySaver {
    dir: PathBuf,
}

impl DirectorySaver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `name.jpg`, then `name (1).jpg`, `name (2).jpg`, ... like a browser.
    fn candidate(&self, filename: &str, n: usize) -> PathBuf {
        if n == 0 {
            return self.dir.join(filename);
        }
        let path = Path::new(filename);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| filename.to_string());
        let extension = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        self.dir.join(format!("{stem} ({n}){extension}"))
    }

    /// Claims the first free candidate. Existence is checked by the create
    /// itself, so two concurrent saves never land on the same file.
    async fn create_unique(&self, filename: &str) -> Result<(PathBuf, File)> {
        let mut n = 0;
        loop {
            let path = self.candidate(filename, n);
            match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(file) => return Ok((path, file)),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => n += 1,
                Err(err) => return Err(CoverError::io(&path, err)),
            }
        }
    }
}

impl CoverSaver for DirectorySaver {
    async fn save(&self, bytes: Vec<u8>, filename: String) -> Result<SavedCover> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| CoverError::io(&self.dir, err))?;
        let (path, mut file) = self.create_unique(&filename).await?;
        file.write_all(&bytes)
            .await
            .map_err(|err| CoverError::io(&path, err))?;
        file.flush().await.map_err(|err| CoverError::io(&path, err))?;
        info!(path = %path.display(), bytes = bytes.len(), "Cover downloaded");
        Ok(SavedCover {
            filename,
            path: Some(path),
            mode: SaveMode::Direct,
            saved_at: Utc::now(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickOutcome {
    Chosen(PathBuf),
    /// The user closed the dialog without choosing.
    Dismissed,
    /// No dialog can be shown in this session.
    Unavailable,
}

/// Asks the user where a cover should go.
pub trait SavePicker: Send + Sync + 'static {
    fn pick(&self, suggested: &str) -> impl Future<Output = PickOutcome> + Send;
}

/// Native save-as dialog.
#[derive(Debug, Clone, Copy, Default)]
pub struct DialogPicker;

impl DialogPicker {
    pub fn is_available() -> bool {
        if cfg!(target_os = "linux") {
            env::var_os("DISPLAY").is_some() || env::var_os("WAYLAND_DISPLAY").is_some()
        } else {
            true
        }
    }
}

impl SavePicker for DialogPicker {
    async fn pick(&self, suggested: &str) -> PickOutcome {
        if !Self::is_available() {
            return PickOutcome::Unavailable;
        }
        let file = rfd::AsyncFileDialog::new()
            .set_title("Save cover")
            .set_file_name(suggested)
            .add_filter("JPEG image", &["jpg", "jpeg"])
            .save_file()
            .await;
        match file {
            Some(handle) => PickOutcome::Chosen(handle.path().to_path_buf()),
            None => PickOutcome::Dismissed,
        }
    }
}

/// Save-as flow: the user picks the destination, and without a dialog the
/// cover goes straight into the fallback directory.
#[derive(Debug, Clone)]
pub struct PromptSaver<P = DialogPicker> {
    picker: P,
    fallback: DirectorySaver,
}

impl PromptSaver {
    pub fn new(fallback: DirectorySaver) -> Self {
        Self::with_picker(DialogPicker, fallback)
    }
}

impl<P: SavePicker> PromptSaver<P> {
    pub fn with_picker(picker: P, fallback: DirectorySaver) -> Self {
        Self { picker, fallback }
    }

    pub fn fallback(&self) -> &DirectorySaver {
        &self.fallback
    }
}

impl<P: SavePicker> CoverSaver for PromptSaver<P> {
    async fn save(&self, bytes: Vec<u8>, filename: String) -> Result<SavedCover> {
        let path = match self.picker.pick(&filename).await {
            PickOutcome::Chosen(path) => path,
            PickOutcome::Dismissed => {
                info!("Save dialog dismissed");
                return Err(CoverError::Cancelled);
            }
            PickOutcome::Unavailable => {
                debug!("No save dialog available, saving directly");
                return self.fallback.save(bytes, filename).await;
            }
        };

        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|err| CoverError::io(&path, err))?;
        info!(path = %path.display(), bytes = bytes.len(), "Cover saved");
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or(filename);
        Ok(SavedCover {
            filename,
            path: Some(path),
            mode: SaveMode::Prompted,
            saved_at: Utc::now(),
        })
    }
}

/// Fetches the artwork over HTTP and hands the bytes to a saver.
#[derive(Debug, Clone)]
pub struct CoverDownloader<S> {
    client: Client,
    saver: S,
}

impl<S: CoverSaver> CoverDownloader<S> {
    pub fn new(saver: S) -> Self {
        Self {
            client: Client::new(),
            saver,
        }
    }

    pub fn saver(&self) -> &S {
        &self.saver
    }

    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        debug!(url, "Fetching artwork");
        let response = self.client.get(url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }
}

impl<S: CoverSaver> CoverSink for CoverDownloader<S> {
    async fn deliver(&self, request: DownloadRequest) -> Result<SavedCover> {
        let bytes = self.fetch(&request.url).await?;
        self.saver.save(bytes, request.filename).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_default_format() {
        let meta = TrackMetadata::new("A?B", "C*D");
        assert_eq!(build_filename(Some(&meta), None), "A-B - C-D.jpg");
    }

    #[test]
    fn every_illegal_character_is_replaced() {
        assert_eq!(sanitize_filename(r#"My/Cool:Song?.jpg"#), "My-Cool-Song-.jpg");
        assert_eq!(sanitize_filename(r#"/\?%*:|"<>"#), "----------");
    }

    #[test]
    fn pattern_substitutes_first_placeholders_only() {
        let meta = TrackMetadata::new("Band", "Song");
        assert_eq!(
            build_filename(Some(&meta), Some("{title} ({artist}) {title}")),
            "Song (Band) {title}.jpg"
        );
        assert_eq!(
            build_filename(Some(&meta), Some("covers/{artist}")),
            "covers-Band.jpg"
        );
    }

    #[test]
    fn unknown_metadata_falls_back_to_cover() {
        assert_eq!(build_filename(None, None), FALLBACK_FILENAME);
        let half = TrackMetadata::new("Band", crate::track::UNKNOWN);
        assert_eq!(build_filename(Some(&half), Some("{artist}")), FALLBACK_FILENAME);
    }

    #[tokio::test]
    async fn directory_saver_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let saver = DirectorySaver::new(dir.path().join("covers"));

        let first = saver.save(vec![1, 2, 3], "cover.jpg".to_string()).await.unwrap();
        let second = saver.save(vec![4], "cover.jpg".to_string()).await.unwrap();

        assert_eq!(first.path.as_deref(), Some(dir.path().join("covers/cover.jpg").as_path()));
        assert_eq!(
            second.path.as_deref(),
            Some(dir.path().join("covers/cover (1).jpg").as_path())
        );
        assert_eq!(second.mode, SaveMode::Direct);
        assert_eq!(std::fs::read(dir.path().join("covers/cover.jpg")).unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn concurrent_saves_claim_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cover.jpg"), b"existing").unwrap();
        let saver = DirectorySaver::new(dir.path());

        let (a, b, c) = tokio::join!(
            saver.save(vec![1], "cover.jpg".to_string()),
            saver.save(vec![2], "cover.jpg".to_string()),
            saver.save(vec![3], "cover.jpg".to_string()),
        );
        let mut paths: Vec<PathBuf> = [a, b, c]
            .into_iter()
            .map(|saved| saved.unwrap().path.unwrap())
            .collect();
        paths.sort();
        paths.dedup();

        assert_eq!(paths.len(), 3);
        assert!(!paths.contains(&dir.path().join("cover.jpg")));
        assert_eq!(std::fs::read(dir.path().join("cover.jpg")).unwrap(), b"existing");
    }

    #[tokio::test]
    async fn unusable_directory_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let saver = DirectorySaver::new(blocker.join("covers"));

        let err = saver.save(vec![1], "cover.jpg".to_string()).await.unwrap_err();
        assert!(matches!(err, CoverError::Io { .. }), "got {err:?}");
    }

    struct FixedPicker(PickOutcome);

    impl SavePicker for FixedPicker {
        async fn pick(&self, _suggested: &str) -> PickOutcome {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn dismissed_dialog_cancels_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let saver = PromptSaver::with_picker(FixedPicker(PickOutcome::Dismissed), DirectorySaver::new(dir.path()));

        let err = saver.save(vec![1], "cover.jpg".to_string()).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn chosen_destination_is_written_as_prompted() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("Band - Song (alt).jpg");
        let saver = PromptSaver::with_picker(
            FixedPicker(PickOutcome::Chosen(target.clone())),
            DirectorySaver::new(dir.path().join("unused")),
        );

        let saved = saver.save(vec![7, 8], "Band - Song.jpg".to_string()).await.unwrap();
        assert_eq!(saved.mode, SaveMode::Prompted);
        assert_eq!(saved.filename, "Band - Song (alt).jpg");
        assert_eq!(saved.path.as_deref(), Some(target.as_path()));
        assert_eq!(std::fs::read(&target).unwrap(), vec![7, 8]);
        assert!(!dir.path().join("unused").exists());
    }

    #[tokio::test]
    async fn missing_dialog_falls_back_to_directory() {
        let dir = tempfile::tempdir().unwrap();
        let saver = PromptSaver::with_picker(FixedPicker(PickOutcome::Unavailable), DirectorySaver::new(dir.path()));

        let saved = saver.save(vec![1], "cover.jpg".to_string()).await.unwrap();
        assert_eq!(saved.mode, SaveMode::Direct);
        assert_eq!(saved.path.as_deref(), Some(dir.path().join("cover.jpg").as_path()));
        assert_eq!(saver.fallback().dir(), dir.path());
    }
}
