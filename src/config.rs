use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::bridge::DEFAULT_DEBOUNCE;
use crate::settings::DEFAULT_REFRESH;

pub const DEFAULT_SETTINGS_URL: &str = "http://localhost:2007";
pub const DEFAULT_ADDON_NAME: &str = "CoverDownloader";
const FALLBACK_DOWNLOAD_DIR: &str = "covers";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub settings_url: String,
    pub addon_name: String,
    pub refresh_interval: Duration,
    pub debounce: Duration,
    pub download_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            settings_url: DEFAULT_SETTINGS_URL.to_string(),
            addon_name: DEFAULT_ADDON_NAME.to_string(),
            refresh_interval: DEFAULT_REFRESH,
            debounce: DEFAULT_DEBOUNCE,
            download_dir: default_download_dir(),
        }
    }
}

impl AppConfig {
    /// Reads `.env`, then `.env.local`, then the process environment.
    pub fn from_env() -> Self {
        if let Err(e) = dotenvy::dotenv() {
            debug!(error = %e, "No .env loaded");
        }
        if let Err(e) = dotenvy::from_path(Path::new(".env.local")) {
            debug!(error = %e, "No .env.local loaded");
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Self {
            settings_url: non_empty("COVER_SETTINGS_URL").unwrap_or(defaults.settings_url),
            addon_name: non_empty("COVER_ADDON_NAME").unwrap_or(defaults.addon_name),
            refresh_interval: parse_number("COVER_REFRESH_SECS", non_empty("COVER_REFRESH_SECS"))
                .map(Duration::from_secs)
                .unwrap_or(defaults.refresh_interval),
            debounce: parse_number("COVER_DEBOUNCE_MS", non_empty("COVER_DEBOUNCE_MS"))
                .map(Duration::from_millis)
                .unwrap_or(defaults.debounce),
            download_dir: non_empty("COVER_DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.download_dir),
        }
    }
}

fn parse_number(key: &str, raw: Option<String>) -> Option<u64> {
    let raw = raw?;
    match raw.parse::<u64>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            warn!(key, value = %raw, "Ignoring invalid number, using default");
            None
        }
    }
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| PathBuf::from(FALLBACK_DOWNLOAD_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = AppConfig::from_lookup(lookup(&[]));
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.settings_url, "http://localhost:2007");
        assert_eq!(config.refresh_interval, Duration::from_secs(3));
        assert_eq!(config.debounce, Duration::from_millis(200));
    }

    #[test]
    fn overrides_are_applied() {
        let config = AppConfig::from_lookup(lookup(&[
            ("COVER_SETTINGS_URL", "http://127.0.0.1:9000/"),
            ("COVER_ADDON_NAME", "Cover Downloader"),
            ("COVER_REFRESH_SECS", "10"),
            ("COVER_DEBOUNCE_MS", "50"),
            ("COVER_DOWNLOAD_DIR", "/tmp/covers"),
        ]));
        assert_eq!(config.settings_url, "http://127.0.0.1:9000/");
        assert_eq!(config.addon_name, "Cover Downloader");
        assert_eq!(config.refresh_interval, Duration::from_secs(10));
        assert_eq!(config.debounce, Duration::from_millis(50));
        assert_eq!(config.download_dir, PathBuf::from("/tmp/covers"));
    }

    #[test]
    fn bad_numbers_fall_back() {
        let config = AppConfig::from_lookup(lookup(&[
            ("COVER_REFRESH_SECS", "soon"),
            ("COVER_DEBOUNCE_MS", "0"),
            ("COVER_ADDON_NAME", "   "),
        ]));
        assert_eq!(config.refresh_interval, DEFAULT_REFRESH);
        assert_eq!(config.debounce, DEFAULT_DEBOUNCE);
        assert_eq!(config.addon_name, DEFAULT_ADDON_NAME);
    }
}
