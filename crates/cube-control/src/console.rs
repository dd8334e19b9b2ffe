use serde::Serialize;
use time::OffsetDateTime;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Sent,
    Received,
    Error,
    Info,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConsoleEntry {
    pub sequence: u64,
    pub kind: EntryKind,
    pub text: String,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

impl ConsoleEntry {
    /// The entry as a console shows it: carriage returns and the trailing
    /// newline removed, outbound text prefixed with `>>> `.
    pub fn display_line(&self) -> String {
        let text = self.text.replace('\r', "");
        let text = text.trim_end_matches('\n');
        match self.kind {
            EntryKind::Sent => format!(">>> {text}"),
            _ => text.to_string(),
        }
    }
}

/// Result of an append that was not filtered out.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Appended {
    pub sequence: u64,
    pub kind: EntryKind,
    /// Whether the display should scroll to the new entry.
    pub scroll: bool,
}

/// Ordered log of outbound, inbound and informational entries.
#[derive(Debug, Clone)]
pub struct Console {
    entries: Vec<ConsoleEntry>,
    next_sequence: u64,
    show_all: bool,
    auto_scroll: bool,
}

impl Default for Console {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            next_sequence: 0,
            show_all: false,
            auto_scroll: true,
        }
    }
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `text`. Received entries are subject to the noise filter and are
    /// re-tagged `Error` when they mention an error; `None` means suppressed.
    pub fn append(&mut self, text: impl Into<String>, kind: EntryKind) -> Option<Appended> {
        let text = text.into();
        let kind = match kind {
            EntryKind::Received => {
                if self.is_noise(&text) {
                    tracing::trace!(text = %text.trim_end(), "console suppressed device chatter");
                    return None;
                }
                if text.to_lowercase().contains("error") {
                    EntryKind::Error
                } else {
                    EntryKind::Received
                }
            }
            other => other,
        };
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.push(ConsoleEntry {
            sequence,
            kind,
            text,
            at: OffsetDateTime::now_utc(),
        });
        Some(Appended {
            sequence,
            kind,
            scroll: self.auto_scroll,
        })
    }

    // Device-internal diagnostics end in CRLF; parser replies mention "parse".
    fn is_noise(&self, text: &str) -> bool {
        !self.show_all && text.contains("\r\n") && !text.contains("parse")
    }

    /// Empty the log. Filter and scroll settings are kept; sequence numbers keep
    /// increasing across clears.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &[ConsoleEntry] {
        &self.entries
    }

    /// Entries with a sequence number of at least `sequence`.
    pub fn since(&self, sequence: u64) -> &[ConsoleEntry] {
        let start = self.entries.partition_point(|e| e.sequence < sequence);
        self.entries.get(start..).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sequence number the next recorded entry will get.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn show_all(&self) -> bool {
        self.show_all
    }

    pub fn set_show_all(&mut self, show_all: bool) {
        self.show_all = show_all;
    }

    pub fn auto_scroll(&self) -> bool {
        self.auto_scroll
    }

    pub fn set_auto_scroll(&mut self, auto_scroll: bool) {
        self.auto_scroll = auto_scroll;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noise_is_suppressed() {
        let mut console = Console::new();
        assert_eq!(console.append("noise\r\n", EntryKind::Received), None);
        assert!(console.is_empty());
    }

    #[test]
    fn test_parse_errors_pass_and_are_tagged() {
        let mut console = Console::new();
        let appended = console.append("ERROR: parse failed\r\n", EntryKind::Received);
        assert_eq!(
            appended,
            Some(Appended {
                sequence: 0,
                kind: EntryKind::Error,
                scroll: true
            })
        );
        assert_eq!(console.entries()[0].kind, EntryKind::Error);
    }

    #[test]
    fn test_show_all_disables_filter() {
        let mut console = Console::new();
        console.set_show_all(true);
        let appended = console.append("noise\r\n", EntryKind::Received);
        assert_eq!(appended.map(|a| a.kind), Some(EntryKind::Received));
    }

    #[test]
    fn test_plain_lines_are_received() {
        let mut console = Console::new();
        let appended = console.append("homing complete\n", EntryKind::Received);
        assert_eq!(appended.map(|a| a.kind), Some(EntryKind::Received));
        let appended = console.append("Endstop Error\n", EntryKind::Received);
        assert_eq!(appended.map(|a| a.kind), Some(EntryKind::Error));
    }

    #[test]
    fn test_sent_and_info_never_filtered() {
        let mut console = Console::new();
        assert!(console.append("M0 ;restart\r\n", EntryKind::Sent).is_some());
        assert!(console.append("error-free\r\n", EntryKind::Info).is_some());
        assert_eq!(console.entries()[1].kind, EntryKind::Info);
    }

    #[test]
    fn test_clear_keeps_settings_and_order() {
        let mut console = Console::new();
        console.set_show_all(true);
        console.set_auto_scroll(false);
        console.append("a", EntryKind::Info);
        console.append("b", EntryKind::Info);
        console.clear();
        assert!(console.is_empty());
        assert!(console.show_all());
        assert!(!console.auto_scroll());
        let appended = console.append("c", EntryKind::Info);
        assert_eq!(
            appended,
            Some(Appended {
                sequence: 2,
                kind: EntryKind::Info,
                scroll: false
            })
        );
    }

    #[test]
    fn test_since_and_display() {
        let mut console = Console::new();
        console.append("G28 ;home\n", EntryKind::Sent);
        console.append("homing complete\r\n", EntryKind::Info);
        let tail = console.since(1);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].display_line(), "homing complete");
        assert_eq!(console.entries()[0].display_line(), ">>> G28 ;home");
        assert!(console.since(5).is_empty());
    }
}
