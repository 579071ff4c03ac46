use super::{Archive, Entry};
use crate::config::{SignConfig, DEFAULT_MAX_ARCHIVE_SIZE, DEFAULT_MAX_ENTRIES};
use crate::error::PSError;

use log::*;
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::Path;

const CENTRAL_HEADER_SIGNATURE: u32 = 0x02014b50;
const CENTRAL_HEADER_LEN: usize = 46;

/// Upper bound on the buffer reserved from an entry's declared size.
const MAX_PREALLOCATION: u64 = 1 << 20;

/// Bounds applied while decoding an untrusted archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    pub max_entries: usize,
    pub max_total_size: u64,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        DecodeLimits {
            max_entries: DEFAULT_MAX_ENTRIES,
            max_total_size: DEFAULT_MAX_ARCHIVE_SIZE,
        }
    }
}

impl From<&SignConfig> for DecodeLimits {
    fn from(config: &SignConfig) -> Self {
        DecodeLimits {
            max_entries: config.max_entries,
            max_total_size: config.max_archive_size,
        }
    }
}

impl Archive {
    /// Decode a zip container held in memory, with default limits.
    pub fn decode(bytes: &[u8]) -> Result<Self, PSError> {
        Self::decode_with_limits(bytes, &DecodeLimits::default())
    }

    /// Decode a zip container held in memory.
    ///
    /// Every entry, directories included, is fully extracted. Entry names are
    /// kept verbatim so that the signed archive has exactly the same path set.
    /// An archive whose central directory lists the same name twice is
    /// rejected instead of silently keeping only one of the entries.
    pub fn decode_with_limits(bytes: &[u8], limits: &DecodeLimits) -> Result<Self, PSError> {
        let mut zip = zip::ZipArchive::new(Cursor::new(bytes))?;
        let names = central_directory_names(bytes, zip.central_directory_start());
        let records = names.len().max(zip.len());
        if records > limits.max_entries {
            return Err(PSError::ArchiveDecodeError(format!(
                "too many entries ({} > {})",
                records,
                limits.max_entries
            )));
        }
        let mut seen = HashSet::with_capacity(names.len());
        for name in &names {
            if !seen.insert(*name) {
                return Err(PSError::ArchiveDecodeError(format!(
                    "duplicate entry '{}'",
                    String::from_utf8_lossy(name)
                )));
            }
        }
        // Distinct raw names can still decode to the same entry name.
        if records != zip.len() {
            return Err(PSError::ArchiveDecodeError(format!(
                "duplicate entry names ({} records, {} distinct)",
                records,
                zip.len()
            )));
        }

        let mut archive = Archive::new();
        let mut total: u64 = 0;
        for i in 0..zip.len() {
            let mut file = zip.by_index(i)?;
            let path = file.name().to_string();
            let budget = limits.max_total_size.saturating_sub(total);
            if file.size() > budget {
                debug!("Entry '{}' exceeds the remaining size budget", path);
                return Err(PSError::ArchiveTooLarge);
            }
            let mut content = Vec::with_capacity(file.size().min(MAX_PREALLOCATION) as usize);
            file.by_ref()
                .take(budget.saturating_add(1))
                .read_to_end(&mut content)
                .map_err(|e| {
                    PSError::ArchiveDecodeError(format!("unable to extract '{}': {}", path, e))
                })?;
            if content.len() as u64 > budget {
                return Err(PSError::ArchiveTooLarge);
            }
            total += content.len() as u64;
            drop(file);

            archive.push(Entry { path, content })?;
        }
        debug!(
            "Decoded archive: {} entries, {} bytes of content",
            archive.len(),
            total
        );
        Ok(archive)
    }

    /// Decode a zip container from a reader (for example, standard input).
    pub fn from_reader(reader: &mut impl Read, limits: &DecodeLimits) -> Result<Self, PSError> {
        let bytes = read_all(reader)?;
        Self::decode_with_limits(&bytes, limits)
    }

    /// Decode a zip container from a file.
    pub fn from_file(file: impl AsRef<Path>, limits: &DecodeLimits) -> Result<Self, PSError> {
        let mut fp = File::open(file)?;
        Self::from_reader(&mut fp, limits)
    }
}

/// Raw entry names in central directory order, one per record.
///
/// `ZipArchive` keys entries by name, so this is the only view that still
/// shows repeated names.
fn central_directory_names(bytes: &[u8], start: u64) -> Vec<&[u8]> {
    let mut names = vec![];
    let mut pos = usize::try_from(start).unwrap_or(usize::MAX);
    while let Some(header) = bytes.get(pos..pos.saturating_add(CENTRAL_HEADER_LEN)) {
        let signature = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if signature != CENTRAL_HEADER_SIGNATURE {
            break;
        }
        let field = |at: usize| u16::from_le_bytes([header[at], header[at + 1]]) as usize;
        let name_start = pos + CENTRAL_HEADER_LEN;
        let name_end = name_start + field(28);
        match bytes.get(name_start..name_end) {
            Some(name) => names.push(name),
            None => break,
        }
        pos = name_end + field(30) + field(32);
    }
    names
}

/// Read a source archive into memory.
pub fn read_all(reader: &mut impl Read) -> Result<Vec<u8>, io::Error> {
    let mut bytes = vec![];
    reader.read_to_end(&mut bytes)?;
    Ok(bytes)
}
