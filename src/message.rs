use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

/// How a turn entered the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    #[default]
    Text,
    Voice,
    File,
}

impl std::fmt::Display for InputType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputType::Text => write!(f, "text"),
            InputType::Voice => write!(f, "voice"),
            InputType::File => write!(f, "file"),
        }
    }
}

/// Creation time in milliseconds plus a per-conversation sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(timestamp: &DateTime<Local>, seq: u64) -> Self {
        Self(format!("{}-{}", timestamp.timestamp_millis(), seq))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One turn of the conversation. Never mutated after creation.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: MessageId,
    pub speaker: Speaker,
    pub text: String,
    pub input_type: InputType,
    pub timestamp: DateTime<Local>,
}

impl Message {
    pub fn new(seq: u64, speaker: Speaker, text: impl Into<String>, input_type: InputType) -> Self {
        let timestamp = Local::now();
        Self {
            id: MessageId::new(&timestamp, seq),
            speaker,
            text: text.into(),
            input_type,
            timestamp,
        }
    }

    pub fn is_assistant(&self) -> bool {
        self.speaker == Speaker::Assistant
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_type_display() {
        assert_eq!(InputType::Text.to_string(), "text");
        assert_eq!(InputType::Voice.to_string(), "voice");
        assert_eq!(InputType::File.to_string(), "file");
    }

    #[test]
    fn test_input_type_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&InputType::Voice).unwrap(), "\"voice\"");
        assert_eq!(serde_json::to_string(&Speaker::Assistant).unwrap(), "\"assistant\"");
    }

    #[test]
    fn test_message_ids_unique_within_same_millisecond() {
        let now = Local::now();
        let a = MessageId::new(&now, 1);
        let b = MessageId::new(&now, 2);
        assert_ne!(a, b);
        assert!(a.as_str().ends_with("-1"));
    }

    #[test]
    fn test_message_new() {
        let msg = Message::new(3, Speaker::User, "Hello", InputType::Text);
        assert_eq!(msg.text, "Hello");
        assert!(!msg.is_assistant());
        assert!(msg.id.to_string().ends_with("-3"));
    }
}
