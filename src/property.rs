use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a property comes from. Only `Note` properties live in the
/// record's own frontmatter and can be written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertySource {
    Note,
    File,
    Formula,
}

impl PropertySource {
    fn prefix(self) -> &'static str {
        match self {
            PropertySource::Note => "note",
            PropertySource::File => "file",
            PropertySource::Formula => "formula",
        }
    }
}

/// A namespaced property identifier such as `note.status` or `file.name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyId {
    source: PropertySource,
    name: String,
}

impl PropertyId {
    pub fn note(name: impl Into<String>) -> Self {
        Self {
            source: PropertySource::Note,
            name: name.into(),
        }
    }

    pub fn file(name: impl Into<String>) -> Self {
        Self {
            source: PropertySource::File,
            name: name.into(),
        }
    }

    /// Parses `source.name`; a bare name is taken as a note property.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        let (source, name) = match trimmed.split_once('.') {
            Some(("note", rest)) => (PropertySource::Note, rest),
            Some(("file", rest)) => (PropertySource::File, rest),
            Some(("formula", rest)) => (PropertySource::Formula, rest),
            _ => (PropertySource::Note, trimmed),
        };
        if name.is_empty() {
            return None;
        }
        Some(Self {
            source,
            name: name.to_string(),
        })
    }

    pub fn source(&self) -> PropertySource {
        self.source
    }

    /// The bare key inside its namespace (`note.status` -> `status`).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_writable(&self) -> bool {
        self.source == PropertySource::Note
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.source.prefix(), self.name)
    }
}
