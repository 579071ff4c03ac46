//! Fuzz target for the streaming zip writer
//!
//! Splits the input into (name, content) pairs and pushes them through
//! `ZipStreamWriter`. Whatever the writer accepts must decode back to the
//! same entries.

#![no_main]

use libfuzzer_sys::fuzz_target;
use plugsign::{Archive, ChunkCollector, Compression, ZipStreamWriter};

fuzz_target!(|data: &[u8]| {
    let compression = match data.first() {
        Some(b) if b & 1 == 1 => Compression::Deflated,
        _ => Compression::Stored,
    };
    let mut writer = ZipStreamWriter::new(ChunkCollector::new(), compression);
    let mut expected = Vec::new();
    for chunk in data.get(1..).unwrap_or_default().split(|b| *b == 0) {
        let (name, content) = chunk.split_at(chunk.len().min(16));
        let name = String::from_utf8_lossy(name).into_owned();
        if name.is_empty() || (name.ends_with('/') && !content.is_empty()) {
            continue;
        }
        if writer.add(&name, content, "sig").is_err() {
            continue;
        }
        expected.push((name, content.to_vec()));
    }
    if writer.end().is_err() {
        return;
    }
    let Ok(bytes) = writer.into_sink().finish() else {
        return;
    };
    let archive = Archive::decode(&bytes).expect("written archive does not decode");
    assert_eq!(archive.len(), expected.len());
    for (entry, (name, content)) in archive.iter().zip(&expected) {
        assert_eq!(&entry.path, name);
        assert_eq!(&entry.content, content);
    }
});
