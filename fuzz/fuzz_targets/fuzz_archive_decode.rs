//! Fuzz target for plugin archive decoding
//!
//! Feeds arbitrary bytes to `Archive::decode_with_limits()`, which walks the
//! central directory of an untrusted zip file.
//!
//! Security concerns:
//! - Panics on truncated or overlapping local headers
//! - Memory exhaustion via inflated entry sizes
//! - Duplicate or non UTF-8 entry names

#![no_main]

use libfuzzer_sys::fuzz_target;
use plugsign::{Archive, ChunkCollector, Compression, DecodeLimits, ZipStreamWriter};

fuzz_target!(|data: &[u8]| {
    let limits = DecodeLimits {
        max_entries: 256,
        max_total_size: 1 << 20,
    };
    let Ok(archive) = Archive::decode_with_limits(data, &limits) else {
        return;
    };

    // A decoded archive must always be writable again with the same path set
    let mut writer = ZipStreamWriter::new(ChunkCollector::new(), Compression::Stored);
    for entry in archive.iter() {
        writer
            .add(&entry.path, &entry.content, "")
            .expect("decoded entry rejected by writer");
    }
    writer.end().expect("writer failed on decoded archive");
    let bytes = writer
        .into_sink()
        .finish()
        .expect("writer failed on decoded archive");
    let reread = Archive::decode(&bytes).expect("written archive does not decode");
    assert_eq!(reread.paths(), archive.paths());
});
