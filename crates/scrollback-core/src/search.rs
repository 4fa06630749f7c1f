//! Search across every archive in a directory.
//!
//! Query syntax (case-insensitive, terms combine with AND):
//! - `from:alice` or `from:(alice smith)` - author contains the text
//! - `contains:rust` or `contains:(async rust)` - message contains the text
//! - `has:image_true` / `has:image_false` - attachment present or not
//! - anything else - phrase found in the author or the message

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::Result;
use crate::record::MessageRecord;
use crate::store::archive_order;

/// Most results a single search returns.
pub const MAX_RESULTS: usize = 200;

static TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?P<op>from|contains):(?:\((?P<paren>[^)]*)\)|(?P<word>\S+))|has:image_(?P<has>true|false)\b|(?P<bare>\S+)",
    )
    .expect("static regex")
});

/// A record together with the archive it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexedRecord {
    #[serde(flatten)]
    pub record: MessageRecord,
    /// File stem of the source archive.
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Term {
    Text(String),
    From(String),
    Contains(String),
    HasImage(bool),
}

/// Parsed search query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    terms: Vec<Term>,
}

impl Query {
    pub fn parse(input: &str) -> Self {
        let mut terms = Vec::new();
        let mut phrase: Vec<&str> = Vec::new();

        for caps in TOKEN.captures_iter(input) {
            if let Some(bare) = caps.name("bare") {
                phrase.push(bare.as_str());
            } else if let Some(has) = caps.name("has") {
                terms.push(Term::HasImage(has.as_str().eq_ignore_ascii_case("true")));
            } else if let Some(op) = caps.name("op") {
                let value = caps
                    .name("paren")
                    .or_else(|| caps.name("word"))
                    .map(|m| m.as_str().trim().to_lowercase())
                    .unwrap_or_default();
                if value.is_empty() {
                    continue;
                }
                if op.as_str().eq_ignore_ascii_case("from") {
                    terms.push(Term::From(value));
                } else {
                    terms.push(Term::Contains(value));
                }
            }
        }

        if !phrase.is_empty() {
            terms.push(Term::Text(phrase.join(" ").to_lowercase()));
        }
        Self { terms }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn matches(&self, record: &MessageRecord) -> bool {
        let author = record.author.to_lowercase();
        let body = record.body.to_lowercase();
        self.terms.iter().all(|term| match term {
            Term::Text(text) => author.contains(text.as_str()) || body.contains(text.as_str()),
            Term::From(name) => author.contains(name.as_str()),
            Term::Contains(text) => body.contains(text.as_str()),
            Term::HasImage(wanted) => record.has_attachment() == *wanted,
        })
    }
}

/// In-memory view of all archives in one directory.
#[derive(Debug, Default)]
pub struct ArchiveIndex {
    records: Vec<IndexedRecord>,
    files: Vec<PathBuf>,
}

impl ArchiveIndex {
    /// Load every `*.json` archive in `dir`.
    ///
    /// Files are read in name order; a record id seen in an earlier file wins.
    /// Files that are not archives are skipped with a warning.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut archives = Vec::new();
        let mut files = Vec::new();
        for path in paths {
            match read_archive(&path) {
                Ok(records) => {
                    let source = path
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    archives.push((source, records));
                    files.push(path);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable archive"),
            }
        }

        let mut index = Self::from_archives(archives);
        index.files = files;
        debug!(dir = %dir.display(), files = index.files.len(), records = index.len(), "archive index loaded");
        Ok(index)
    }

    /// Build from `(source, records)` pairs, in priority order.
    pub fn from_archives<I>(archives: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<MessageRecord>)>,
    {
        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for (source, archive) in archives {
            for record in archive {
                if seen.insert(record.id) {
                    records.push(IndexedRecord {
                        record,
                        source: source.clone(),
                    });
                }
            }
        }
        records.sort_by(|a, b| archive_order(&a.record, &b.record));
        Self {
            records,
            files: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[IndexedRecord] {
        &self.records
    }

    /// Archive files that were loaded.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Matches for `query` in time order, at most [`MAX_RESULTS`].
    pub fn search(&self, query: &str) -> Vec<&IndexedRecord> {
        self.search_with_limit(query, MAX_RESULTS)
    }

    pub fn search_with_limit(&self, query: &str, limit: usize) -> Vec<&IndexedRecord> {
        let query = Query::parse(query);
        self.records
            .iter()
            .filter(|r| query.matches(&r.record))
            .take(limit)
            .collect()
    }
}

fn read_archive(path: &Path) -> Result<Vec<MessageRecord>> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}
