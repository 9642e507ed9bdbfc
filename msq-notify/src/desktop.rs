//! Operating-system notifications.

use msq_core::NotificationData;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesktopPermission {
    Granted,
    Denied,
    /// The user has not been asked yet.
    Default,
}

pub trait DesktopNotifier: Send + Sync {
    fn permission(&self) -> DesktopPermission;
    /// Whether the app window currently has focus.
    fn is_focused(&self) -> bool;
    fn show(&self, notification: &NotificationData);
}

/// For headless runs: never allowed, always focused.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDesktop;

impl DesktopNotifier for NoDesktop {
    fn permission(&self) -> DesktopPermission {
        DesktopPermission::Denied
    }

    fn is_focused(&self) -> bool {
        true
    }

    fn show(&self, _notification: &NotificationData) {}
}

pub(crate) fn should_show(notifier: &dyn DesktopNotifier) -> bool {
    !notifier.is_focused() && notifier.permission() == DesktopPermission::Granted
}
