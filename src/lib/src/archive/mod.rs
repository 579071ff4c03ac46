//! In-memory plugin archives.
//!
//! An [`Archive`] is an ordered set of [`Entry`] values, unique by path. Order is
//! the order entries were read from the source container and is preserved all the
//! way to the signed output so that the same input always yields the same layout.

mod reader;
mod writer;

pub use reader::*;
pub use writer::*;

use crate::error::PSError;
use std::collections::HashSet;

/// One named unit of content inside an archive.
#[derive(Clone, PartialEq, Eq)]
pub struct Entry {
    pub path: String,
    pub content: Vec<u8>,
}

impl Entry {
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Entry {
            path: path.into(),
            content: content.into(),
        }
    }
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Entry {{ {:?} - {} bytes }}", self.path, self.content.len())
    }
}

/// An ordered set of entries, unique by path.
#[derive(Debug, Clone, Default)]
pub struct Archive {
    entries: Vec<Entry>,
    paths: HashSet<String>,
}

impl Archive {
    /// Create an empty archive.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, rejecting a path that is already present.
    pub fn push(&mut self, entry: Entry) -> Result<(), PSError> {
        if !self.paths.insert(entry.path.clone()) {
            return Err(PSError::DuplicateEntry(entry.path));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Return the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Return true if the archive has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return the entry stored at `path`, if any.
    pub fn get(&self, path: &str) -> Option<&Entry> {
        if !self.paths.contains(path) {
            return None;
        }
        self.entries.iter().find(|entry| entry.path == path)
    }

    /// Iterate over entries in source order.
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    /// Entry paths in source order.
    pub fn paths(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.path.as_str()).collect()
    }

    /// Total size of all entry contents.
    pub fn content_size(&self) -> u64 {
        self.entries
            .iter()
            .map(|entry| entry.content.len() as u64)
            .sum()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Entry> {
        self.entries
    }
}

impl TryFrom<Vec<Entry>> for Archive {
    type Error = PSError;

    fn try_from(entries: Vec<Entry>) -> Result<Self, Self::Error> {
        let mut archive = Archive::new();
        for entry in entries {
            archive.push(entry)?;
        }
        Ok(archive)
    }
}
