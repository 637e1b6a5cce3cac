//! Forensic reasoning: the typed explanation attached to every stress point.
//!
//! The scorer emits [`ForensicVerdictEntry`] lists directly. The glyph-prefixed
//! text form is still rendered for consumers that only take a string, and
//! [`format_reasoning`] turns such text back into entries.

use serde::{Deserialize, Serialize};

pub const SECTION_MARKER: char = '▓';
pub const BULLET_MARKER: char = '•';
pub const WARNING_MARKER: char = '⚠';
pub const SUCCESS_MARKER: char = '✓';
pub const DETAIL_MARKER: char = '└';
/// Lines starting with this are layout only and are dropped when parsing.
pub const SEPARATOR_MARKER: char = '═';

const SEPARATOR_WIDTH: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Section,
    Bullet,
    Warning,
    Success,
    Detail,
    Verdict,
}

impl EntryKind {
    fn marker(self) -> Option<char> {
        match self {
            Self::Section => Some(SECTION_MARKER),
            Self::Bullet => Some(BULLET_MARKER),
            Self::Warning => Some(WARNING_MARKER),
            Self::Success => Some(SUCCESS_MARKER),
            Self::Detail => Some(DETAIL_MARKER),
            Self::Verdict => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForensicVerdictEntry {
    pub kind: EntryKind,
    pub text: String,
}

impl ForensicVerdictEntry {
    pub fn new(kind: EntryKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn section(text: impl Into<String>) -> Self {
        Self::new(EntryKind::Section, text)
    }

    pub fn bullet(text: impl Into<String>) -> Self {
        Self::new(EntryKind::Bullet, text)
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(EntryKind::Warning, text)
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self::new(EntryKind::Success, text)
    }

    pub fn detail(text: impl Into<String>) -> Self {
        Self::new(EntryKind::Detail, text)
    }

    pub fn verdict(text: impl Into<String>) -> Self {
        Self::new(EntryKind::Verdict, text)
    }
}

/// Render entries as glyph-prefixed text, one entry per line, with a
/// separator rule before every section after the first.
pub fn render_reasoning(entries: &[ForensicVerdictEntry]) -> String {
    let mut out = String::new();
    let mut seen_section = false;

    for entry in entries {
        if entry.kind == EntryKind::Section {
            if seen_section {
                out.extend(std::iter::repeat_n(SEPARATOR_MARKER, SEPARATOR_WIDTH));
                out.push('\n');
            }
            seen_section = true;
        }
        if let Some(marker) = entry.kind.marker() {
            out.push(marker);
            out.push(' ');
        }
        out.push_str(&entry.text);
        out.push('\n');
    }

    out
}

/// Parse glyph-prefixed reasoning text into typed entries.
///
/// Never fails: blank lines and separator lines are skipped, and anything
/// without a recognized marker is a Verdict inside a VERDICT section and a
/// Bullet everywhere else.
pub fn format_reasoning(raw: &str) -> Vec<ForensicVerdictEntry> {
    let mut entries = Vec::new();
    let mut in_verdict = false;

    for line in raw.lines() {
        let trimmed = line.trim();
        let Some(first) = trimmed.chars().next() else {
            continue;
        };

        let kind = match first {
            SECTION_MARKER => Some(EntryKind::Section),
            BULLET_MARKER => Some(EntryKind::Bullet),
            WARNING_MARKER => Some(EntryKind::Warning),
            SUCCESS_MARKER => Some(EntryKind::Success),
            DETAIL_MARKER => Some(EntryKind::Detail),
            SEPARATOR_MARKER => continue,
            _ => None,
        };

        match kind {
            Some(kind) => {
                let text = trimmed[first.len_utf8()..]
                    .trim_start_matches('\u{FE0F}')
                    .trim();
                if text.is_empty() {
                    continue;
                }
                if kind == EntryKind::Section && text.contains("VERDICT") {
                    in_verdict = true;
                }
                entries.push(ForensicVerdictEntry::new(kind, text));
            }
            None => {
                let kind = if in_verdict {
                    EntryKind::Verdict
                } else {
                    EntryKind::Bullet
                };
                entries.push(ForensicVerdictEntry::new(kind, trimmed));
            }
        }
    }

    entries
}
