//! Line-oriented proxy (stunnel) configuration
//!
//! Only two fields matter: `cert = <path>` and the optional `key = <path>`,
//! which may be disabled by a leading `;`. Fields are located by the first
//! occurrence of their marker; every other byte of the file is preserved.

use std::path::Path;

use crate::error::{ConfiguratorError, Result};
use crate::fsutil;

pub const CERT_MARKER: &str = "\ncert = ";
pub const KEY_MARKER: &str = "\nkey = ";
pub const COMMENTED_KEY_MARKER: &str = "\n;key = ";

/// Byte range of a field value (excluding the marker and the newline)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// State of the key field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyField {
    /// No key line at all
    Absent,
    /// `key = <path>` is in effect
    Active(Span),
    /// `;key = <path>` is present but disabled
    Commented(Span),
}

/// Proxy configuration text with its located fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfigText {
    text: String,
    cert: Span,
    key: KeyField,
}

fn value_span(text: &str, marker: &str) -> Option<Span> {
    let start = text.find(marker)? + marker.len();
    let end = text[start..]
        .find('\n')
        .map_or(text.len(), |offset| start + offset);
    Some(Span { start, end })
}

impl ProxyConfigText {
    /// Locate the fields in `text`; `None` when there is no certificate field
    pub fn parse(text: String) -> Option<Self> {
        let cert = value_span(&text, CERT_MARKER)?;
        let key = match value_span(&text, KEY_MARKER) {
            Some(span) => KeyField::Active(span),
            None => value_span(&text, COMMENTED_KEY_MARKER)
                .map_or(KeyField::Absent, KeyField::Commented),
        };
        Some(Self { text, cert, key })
    }

    /// The raw text
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn cert_span(&self) -> Span {
        self.cert
    }

    pub fn key_field(&self) -> KeyField {
        self.key
    }

    /// Configured certificate path
    pub fn cert_path(&self) -> &str {
        &self.text[self.cert.start..self.cert.end]
    }

    /// Configured key path, only when the key line is active
    pub fn key_path(&self) -> Option<&str> {
        match self.key {
            KeyField::Active(span) => Some(&self.text[span.start..span.end]),
            KeyField::Absent | KeyField::Commented(_) => None,
        }
    }

    /// Render the text with new field values.
    ///
    /// | key line  | requested | result                                   |
    /// |-----------|-----------|------------------------------------------|
    /// | absent    | none      | unchanged                                |
    /// | absent    | some      | `key = ` line inserted after `cert`      |
    /// | active    | none      | line disabled with `;`                   |
    /// | active    | some      | value replaced                           |
    /// | commented | some      | `;` removed and value replaced           |
    /// | commented | none      | unchanged                                |
    pub fn with_fields(&self, cert: &str, key: Option<&str>) -> String {
        // A new key line is part of the cert edit; never a second edit at the same offset
        let cert_value = match (self.key, key) {
            (KeyField::Absent, Some(key)) => format!("{}{}{}", cert, KEY_MARKER, key),
            _ => cert.to_string(),
        };
        let mut edits: Vec<(usize, usize, String)> =
            vec![(self.cert.start, self.cert.end, cert_value)];

        match (self.key, key) {
            (KeyField::Active(span), None) => {
                let line = span.start - (KEY_MARKER.len() - 1);
                edits.push((line, line, ";".to_string()));
            }
            (KeyField::Active(span), Some(key)) => {
                edits.push((span.start, span.end, key.to_string()));
            }
            (KeyField::Commented(span), Some(key)) => {
                let semicolon = span.start - (COMMENTED_KEY_MARKER.len() - 1);
                edits.push((semicolon, semicolon + 1, String::new()));
                edits.push((span.start, span.end, key.to_string()));
            }
            (KeyField::Absent, _) | (KeyField::Commented(_), None) => {}
        }

        // Back to front so earlier offsets stay valid
        edits.sort_by(|a, b| b.0.cmp(&a.0));
        let mut text = self.text.clone();
        for (start, end, replacement) in edits {
            text.replace_range(start..end, &replacement);
        }
        text
    }
}

/// Read the proxy configuration, failing with `Corrupt` when it defines no
/// certificate
pub fn read_fields(path: &Path) -> Result<ProxyConfigText> {
    let text = fsutil::read_to_string(path)?;
    ProxyConfigText::parse(text)
        .ok_or_else(|| ConfiguratorError::corrupt(path, "no server certificate specified"))
}

/// Rewrite the certificate and key fields of the proxy configuration.
///
/// The file is re-read first so that spans always match the bytes being
/// replaced. No lock is taken: an edit made by someone else between the
/// read and the rename is lost.
pub fn write_fields(path: &Path, cert: &str, key: Option<&str>) -> Result<()> {
    let current = read_fields(path)?;
    fsutil::write_atomic(path, current.with_fields(cert, key).as_bytes())
}
