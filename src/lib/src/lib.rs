//! Per-entry OpenPGP signing of plugin archives.
//!
//! Given a zip archive and an armored OpenPGP secret key, [`SigningPipeline`]
//! produces a new archive with the same entries, byte for byte, where each entry's
//! zip comment holds the base64 encoding of a detached binary signature over its
//! content.
//!
//! ```no_run
//! use plugsign::{KeySource, SignConfig, SigningPipeline};
//!
//! let archive = std::fs::read("plugin.zip")?;
//! let armored = KeySource::parse("signing.asc").read_armored()?;
//! let pipeline = SigningPipeline::new(SignConfig::default());
//! let signed = pipeline.run_to_file(&archive, &armored, "passphrase")?;
//! println!("Signed {} entries", signed.len());
//! # Ok::<(), plugsign::PSError>(())
//! ```

#![forbid(unsafe_code)]

mod archive;
mod config;
mod error;
mod pipeline;
mod signature;

/// Atomic output and key file handling
pub mod secure_file;

/// Structured audit events for signing runs
pub mod audit;

pub use archive::*;
pub use config::*;
pub use error::*;
pub use pipeline::*;
pub use signature::*;

pub mod reexports {
    pub use {base64, log, pgp, thiserror, zeroize};
}
