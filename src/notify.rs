use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::UiConfig;
use crate::error::VoxchatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NotifyTool {
    NotifySend,
    Kdialog,
    Zenity,
}

impl NotifyTool {
    fn binary(&self) -> &'static str {
        match self {
            NotifyTool::NotifySend => "notify-send",
            NotifyTool::Kdialog => "kdialog",
            NotifyTool::Zenity => "zenity",
        }
    }

    fn detect() -> Option<Self> {
        [NotifyTool::NotifySend, NotifyTool::Kdialog, NotifyTool::Zenity]
            .into_iter()
            .find(|tool| which::which(tool.binary()).is_ok())
    }
}

/// Desktop alerts for failures the user has to act on (microphone access).
#[derive(Debug, Clone)]
pub struct Notifier {
    config: UiConfig,
    tool: Option<NotifyTool>,
}

impl Notifier {
    pub fn new(config: &UiConfig) -> Self {
        let tool = if config.show_notifications {
            NotifyTool::detect()
        } else {
            None
        };
        debug!("Notification tool: {:?}", tool.map(|t| t.binary()));

        Self {
            config: config.clone(),
            tool,
        }
    }

    fn args(&self, tool: NotifyTool, title: &str, message: &str) -> Vec<String> {
        let timeout_ms = self.config.notification_timeout_ms;
        let timeout_secs = (timeout_ms / 1000).max(1).to_string();
        match tool {
            NotifyTool::NotifySend => vec![
                "--urgency".to_string(),
                "critical".to_string(),
                "--expire-time".to_string(),
                timeout_ms.to_string(),
                title.to_string(),
                message.to_string(),
            ],
            NotifyTool::Kdialog => vec![
                "--passivepopup".to_string(),
                message.to_string(),
                timeout_secs,
                "--title".to_string(),
                title.to_string(),
            ],
            NotifyTool::Zenity => vec![
                "--error".to_string(),
                "--title".to_string(),
                title.to_string(),
                "--text".to_string(),
                message.to_string(),
                "--timeout".to_string(),
                timeout_secs,
            ],
        }
    }

    pub async fn alert(&self, title: &str, message: &str) -> Result<(), VoxchatError> {
        let Some(tool) = self.tool else {
            info!("[Alert] {}: {}", title, message);
            return Ok(());
        };

        // zenity and kdialog block until dismissed, so don't wait on them
        if tool != NotifyTool::NotifySend {
            Command::new(tool.binary())
                .args(self.args(tool, title, message))
                .spawn()
                .map_err(|e| {
                    VoxchatError::Notification(format!("failed to run {}: {}", tool.binary(), e))
                })?;
            return Ok(());
        }

        let output = Command::new(tool.binary())
            .args(self.args(tool, title, message))
            .output()
            .await
            .map_err(|e| VoxchatError::Notification(format!("failed to show alert: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("notify-send warning: {}", stderr);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_notifier_has_no_tool() {
        let config = UiConfig {
            show_notifications: false,
            notification_timeout_ms: 3000,
        };
        let notifier = Notifier::new(&config);
        assert!(notifier.tool.is_none());
    }

    #[tokio::test]
    async fn test_alert_without_tool_is_ok() {
        let config = UiConfig {
            show_notifications: false,
            notification_timeout_ms: 3000,
        };
        let notifier = Notifier::new(&config);
        let result = notifier.alert("Microphone", "Permission denied").await;
        assert!(result.is_ok());
    }

    #[test]
    fn test_notify_send_args() {
        let notifier = Notifier::new(&UiConfig {
            show_notifications: false,
            notification_timeout_ms: 5000,
        });
        let args = notifier.args(NotifyTool::NotifySend, "Title", "Body");
        assert_eq!(args[3], "5000");
        assert_eq!(&args[4..], ["Title", "Body"]);
    }

    #[test]
    fn test_short_timeout_rounds_up_to_one_second() {
        let notifier = Notifier::new(&UiConfig {
            show_notifications: false,
            notification_timeout_ms: 200,
        });
        let args = notifier.args(NotifyTool::Kdialog, "Title", "Body");
        assert_eq!(args[2], "1");
    }
}
