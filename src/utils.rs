use crossterm::style::{Color, Stylize};
use std::hash::{Hash, Hasher};

use crate::types::{StreamMessage, StreamTarget};

/// Generate a color for a string based on hash.
pub fn get_color(s: &str) -> Color {
    let colors = [
        Color::Red,
        Color::Green,
        Color::Blue,
        Color::Yellow,
        Color::Magenta,
        Color::Cyan,
        Color::White,
        Color::Grey,
        Color::AnsiValue(91), // Bright Red
        Color::AnsiValue(92), // Bright Green
        Color::AnsiValue(94), // Bright Blue
        Color::AnsiValue(93), // Bright Yellow
        Color::AnsiValue(95), // Bright Magenta
        Color::AnsiValue(96), // Bright Cyan
    ];
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    s.hash(&mut hasher);
    let hash = hasher.finish() as u32;
    colors[(hash % colors.len() as u32) as usize]
}

/// `[namespace/pod/container]`, colored per pod.
pub fn format_prefix(target: &StreamTarget) -> String {
    let color_key = format!("{}/{}", target.pod_namespace, target.pod_name);
    format!("[{}]", target).with(get_color(&color_key)).to_string()
}

/// One printable line for a stream message.
pub fn format_message(message: &StreamMessage) -> String {
    let prefix = format_prefix(message.target());
    match message {
        StreamMessage::LogEntry(entry) => format!("{} {}", prefix, entry.line),
        StreamMessage::Error(err) => format!("{} <log stream failed: {}>", prefix, err.cause),
        StreamMessage::EndOfStream(_) => format!("{} <end of log>", prefix),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::types::{EndOfStream, ErrorNotification, LogEntry};

    #[test]
    fn test_color_is_stable() {
        assert_eq!(get_color("default/web-1"), get_color("default/web-1"));
    }

    #[test]
    fn test_format_message_variants() {
        let target = StreamTarget::new("web-1", "default").with_container("nginx");

        let entry = format_message(&StreamMessage::LogEntry(LogEntry {
            target: target.clone(),
            line: "GET /".to_string(),
            received_at: chrono::Utc::now(),
        }));
        assert!(entry.contains("[default/web-1/nginx]"));
        assert!(entry.ends_with("GET /"));

        let error = format_message(&StreamMessage::Error(ErrorNotification {
            target: target.clone(),
            cause: SourceError::Other("timeout".to_string()),
        }));
        assert!(error.ends_with("<log stream failed: timeout>"));

        let end = format_message(&StreamMessage::EndOfStream(EndOfStream { target }));
        assert!(end.ends_with("<end of log>"));
    }
}
