//! Configuration for a signing run

use std::path::{Path, PathBuf};

/// Default output file, relative to the working directory.
pub const DEFAULT_OUTPUT_FILE: &str = "signed.zip";

/// Zip32 can't address more entries than this.
pub const DEFAULT_MAX_ENTRIES: usize = 0xffff;

/// Upper bound on the total uncompressed size of a source archive (1 GiB).
pub const DEFAULT_MAX_ARCHIVE_SIZE: u64 = 1 << 30;

/// How entry content is stored in the signed archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Content is copied as-is (method 0)
    #[default]
    Stored,
    /// Content is deflated (method 8)
    Deflated,
}

/// Configuration for a signing run
#[derive(Debug, Clone)]
pub struct SignConfig {
    /// Where the signed archive is written
    pub output_path: PathBuf,

    /// Storage method for entries in the signed archive
    pub compression: Compression,

    /// Number of signing workers
    ///
    /// `1` signs entries one after the other. Larger values sign on a bounded
    /// pool of threads; the writer still receives entries in source order.
    pub jobs: usize,

    /// Maximum number of entries accepted from the source archive
    pub max_entries: usize,

    /// Maximum total uncompressed size accepted from the source archive
    pub max_archive_size: u64,
}

impl Default for SignConfig {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from(DEFAULT_OUTPUT_FILE),
            compression: Compression::Stored,
            jobs: 1,
            max_entries: DEFAULT_MAX_ENTRIES,
            max_archive_size: DEFAULT_MAX_ARCHIVE_SIZE,
        }
    }
}

impl SignConfig {
    /// Config that signs on one worker per available CPU
    pub fn parallel() -> Self {
        let jobs = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            jobs,
            ..Self::default()
        }
    }

    pub fn with_output_path(mut self, path: impl AsRef<Path>) -> Self {
        self.output_path = path.as_ref().to_path_buf();
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Set the worker count. Zero is clamped to one.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_max_archive_size(mut self, max_archive_size: u64) -> Self {
        self.max_archive_size = max_archive_size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SignConfig::default();
        assert_eq!(config.output_path, PathBuf::from("signed.zip"));
        assert_eq!(config.compression, Compression::Stored);
        assert_eq!(config.jobs, 1);
        assert_eq!(config.max_entries, 0xffff);
    }

    #[test]
    fn test_parallel_config() {
        let config = SignConfig::parallel();
        assert!(config.jobs >= 1);
        assert_eq!(config.output_path, PathBuf::from(DEFAULT_OUTPUT_FILE));
    }

    #[test]
    fn test_builder_methods() {
        let config = SignConfig::default()
            .with_output_path("out/plugin-signed.zip")
            .with_compression(Compression::Deflated)
            .with_jobs(0)
            .with_max_entries(10)
            .with_max_archive_size(1024);
        assert_eq!(config.output_path, PathBuf::from("out/plugin-signed.zip"));
        assert_eq!(config.compression, Compression::Deflated);
        assert_eq!(config.jobs, 1);
        assert_eq!(config.max_entries, 10);
        assert_eq!(config.max_archive_size, 1024);
    }
}
