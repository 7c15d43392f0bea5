//! Addon settings pulled from the local settings service.
//!
//! Every refresh replaces the whole snapshot; nothing is merged.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, warn};

pub mod keys {
    pub const IMAGE_QUALITY: &str = "imageQuality";
    pub const IMAGE_SIZE: &str = "imageSize";
    pub const FILE_NAME_FORMAT: &str = "fileNameFormat";
    pub const FILE_NAME_PATTERN: &str = "fileNamePattern";
    pub const SHOW_NOTIFICATIONS: &str = "showNotifications";
    pub const AUTO_DOWNLOAD: &str = "autoDownload";
}

pub const DEFAULT_REFRESH: Duration = Duration::from_secs(3);

/// Item fields that may carry a value, in lookup order.
const VALUE_FIELDS: [&str; 5] = ["bool", "input", "selected", "value", "filePath"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingValue {
    pub value: Value,
    pub default: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SettingEntry {
    Value(SettingValue),
    /// A button group, keyed by button id.
    Group(BTreeMap<String, SettingValue>),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct SettingsSnapshot(BTreeMap<String, SettingEntry>);

impl SettingsSnapshot {
    pub fn get(&self, id: &str) -> Option<&SettingEntry> {
        self.0.get(id)
    }

    /// Value of a plain (non-group) setting.
    pub fn value(&self, id: &str) -> Option<&Value> {
        match self.0.get(id)? {
            SettingEntry::Value(setting) => Some(&setting.value),
            SettingEntry::Group(_) => None,
        }
    }

    pub fn button(&self, group: &str, id: &str) -> Option<&Value> {
        match self.0.get(group)? {
            SettingEntry::Group(buttons) => buttons.get(id).map(|setting| &setting.value),
            SettingEntry::Value(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Quality tier, 1 to 4. Present-but-unreadable values come back as `None`.
    pub fn image_quality(&self) -> Option<u32> {
        self.value(keys::IMAGE_QUALITY).and_then(positive_number)
    }

    /// Custom square edge in pixels; accepts numbers and numeric strings.
    pub fn image_size(&self) -> Option<u32> {
        self.value(keys::IMAGE_SIZE).and_then(positive_number)
    }

    /// Filename template with `{artist}` and `{title}` placeholders.
    pub fn file_name_pattern(&self) -> Option<&str> {
        self.button(keys::FILE_NAME_FORMAT, keys::FILE_NAME_PATTERN)
            .and_then(Value::as_str)
            .filter(|pattern| !pattern.trim().is_empty())
    }

    pub fn show_notifications(&self) -> bool {
        self.value(keys::SHOW_NOTIFICATIONS).map(truthy).unwrap_or(false)
    }

    pub fn auto_download(&self) -> bool {
        self.value(keys::AUTO_DOWNLOAD).map(truthy).unwrap_or(false)
    }
}

fn positive_number(value: &Value) -> Option<u32> {
    let n = match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    (n > 0).then_some(n)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Flattens the service's `{sections: [{items: [...]}]}` payload.
///
/// Returns `None` when `sections` is missing. Sections without items and items
/// without an id are skipped.
pub fn transform(data: &Value) -> Option<SettingsSnapshot> {
    let sections = data.get("sections")?.as_array()?;
    let mut result = BTreeMap::new();

    for section in sections {
        let Some(items) = section.get("items").and_then(Value::as_array) else {
            continue;
        };
        for item in items {
            let Some(id) = item.get("id").and_then(Value::as_str) else {
                continue;
            };
            let buttons = item.get("buttons").and_then(Value::as_array);
            let is_text = item.get("type").and_then(Value::as_str) == Some("text");

            let entry = match buttons {
                Some(buttons) if is_text => {
                    let group = buttons
                        .iter()
                        .filter_map(|button| {
                            let button_id = button.get("id")?.as_str()?;
                            Some((
                                button_id.to_string(),
                                SettingValue {
                                    value: field(button, "text"),
                                    default: field(button, "defaultParameter"),
                                },
                            ))
                        })
                        .collect();
                    SettingEntry::Group(group)
                }
                _ => SettingEntry::Value(SettingValue {
                    value: VALUE_FIELDS
                        .iter()
                        .filter_map(|name| item.get(*name))
                        .find(|value| !value.is_null())
                        .cloned()
                        .unwrap_or(Value::Null),
                    default: field(item, "defaultParameter"),
                }),
            };
            result.insert(id.to_string(), entry);
        }
    }

    Some(SettingsSnapshot(result))
}

fn field(object: &Value, name: &str) -> Value {
    object.get(name).cloned().unwrap_or(Value::Null)
}

/// Where snapshots come from. The coordinator only ever sees the result.
pub trait SettingsSource: Send + Sync + 'static {
    fn fetch(&self) -> impl Future<Output = Option<SettingsSnapshot>> + Send;
}

#[derive(Clone)]
pub struct SettingsClient {
    base_url: String,
    addon_name: String,
    client: Client,
}

impl SettingsClient {
    pub fn new(base_url: impl Into<String>, addon_name: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            addon_name: addon_name.into(),
            client: Client::new(),
        }
    }

    pub fn handle_url(&self) -> String {
        format!(
            "{}/get_handle?name={}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(&self.addon_name)
        )
    }

    /// Network failures and malformed payloads are logged and yield `None`.
    pub async fn get_settings(&self) -> Option<SettingsSnapshot> {
        let url = self.handle_url();
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(err) => {
                error!(error = %err, url = %url, "Settings request failed");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            error!(status = status.as_u16(), url = %url, "Settings service returned an error");
            return None;
        }

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(err) => {
                error!(error = %err, "Settings payload is not valid JSON");
                return None;
            }
        };

        let Some(data) = body.get("data") else {
            warn!("Settings payload has no data object");
            return None;
        };
        let snapshot = transform(data);
        match &snapshot {
            Some(snapshot) => debug!(entries = snapshot.len(), "Settings refreshed"),
            None => warn!("Settings payload does not match the expected structure"),
        }
        snapshot
    }
}

impl SettingsSource for SettingsClient {
    async fn fetch(&self) -> Option<SettingsSnapshot> {
        self.get_settings().await
    }
}

pub type SharedSettings = Option<Arc<SettingsSnapshot>>;

/// Polls `source` every `period`, first one period after start, and publishes
/// each result (including `None`) for the coordinator.
pub fn spawn_refresh<S: SettingsSource>(
    source: S,
    period: Duration,
    initial: SharedSettings,
) -> watch::Receiver<SharedSettings> {
    let (tx, rx) = watch::channel(initial);
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + period;
        let mut ticker = tokio::time::interval_at(start, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let snapshot = source.fetch().await.map(Arc::new);
            if tx.send(snapshot).is_err() {
                debug!("Settings receiver dropped, stopping refresh");
                break;
            }
        }
    });
    rx
}
