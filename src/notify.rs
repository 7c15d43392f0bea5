//! Desktop notification collaborator.

use std::sync::Mutex;

use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Permission {
    /// Never asked.
    #[default]
    Default,
    Granted,
    Denied,
}

pub trait Notifier: Send + Sync + 'static {
    fn permission(&self) -> Permission;
    /// Non-blocking; the answer shows up in a later `permission()` call.
    fn request_permission(&self);
    fn show(&self, title: &str, body: &str, icon: Option<&str>);
}

/// Emits notifications through the log. Grants on request.
#[derive(Debug, Default)]
pub struct LogNotifier {
    permission: Mutex<Permission>,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_permission(permission: Permission) -> Self {
        Self {
            permission: Mutex::new(permission),
        }
    }
}

impl Notifier for LogNotifier {
    fn permission(&self) -> Permission {
        self.permission
            .lock()
            .map(|permission| *permission)
            .unwrap_or(Permission::Denied)
    }

    fn request_permission(&self) {
        if let Ok(mut permission) = self.permission.lock() {
            if *permission == Permission::Default {
                *permission = Permission::Granted;
                debug!("Notification permission granted");
            }
        }
    }

    fn show(&self, title: &str, body: &str, icon: Option<&str>) {
        info!(title, body, icon = icon.unwrap_or(""), "Notification");
    }
}

/// Shows the notification only when permission was granted earlier.
pub fn notify_if_permitted<N: Notifier + ?Sized>(notifier: &N, title: &str, body: &str, icon: Option<&str>) -> bool {
    if notifier.permission() != Permission::Granted {
        debug!(title, "Notification suppressed, permission not granted");
        return false;
    }
    notifier.show(title, body, icon);
    true
}
