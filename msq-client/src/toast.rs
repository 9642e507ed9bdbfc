//! Toast sink for headless runs: every toast becomes a log line.

use msq_core::{Toast, ToastAction, ToastLevel, ToastSink};

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingToastSink;

impl ToastSink for TracingToastSink {
    fn show(&self, toast: Toast) {
        let description = toast.description.as_deref().unwrap_or("");
        let action = toast.action.as_ref().map(action_label).unwrap_or_default();
        let id = toast.id.as_deref().unwrap_or("");
        match toast.level {
            ToastLevel::Error => {
                tracing::error!(toast_id = id, description, action = action.as_str(), "{}", toast.message)
            }
            ToastLevel::Warning => {
                tracing::warn!(toast_id = id, description, action = action.as_str(), "{}", toast.message)
            }
            ToastLevel::Success | ToastLevel::Info => {
                tracing::info!(toast_id = id, description, action = action.as_str(), "{}", toast.message)
            }
        }
    }
}

fn action_label(action: &ToastAction) -> String {
    match action {
        ToastAction::Refresh => "refresh".to_string(),
        ToastAction::Retry => "retry".to_string(),
        ToastAction::Dismiss => "dismiss".to_string(),
        ToastAction::Open(target) => format!("open {}", target),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_labels() {
        assert_eq!(action_label(&ToastAction::Refresh), "refresh");
        assert_eq!(
            action_label(&ToastAction::Open("/boqs/4".to_string())),
            "open /boqs/4"
        );
    }
}
