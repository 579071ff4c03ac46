use crate::pipeline::PipelineStage;

/// The plugsign error type.
#[derive(Debug, thiserror::Error)]
pub enum PSError {
    #[error("Internal error: [{0}]")]
    InternalError(String),

    #[error("I/O error")]
    IOError(#[from] std::io::Error),

    #[error("Unable to decode archive: {0}")]
    ArchiveDecodeError(String),

    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    #[error("Invalid passphrase for the signing key")]
    InvalidPassphrase,

    #[error("Unable to sign entry '{path}': {reason}")]
    SigningError { path: String, reason: String },

    #[error("Unable to write archive: {0}")]
    ArchiveWriteError(String),

    #[error("Duplicate entry in archive: '{0}'")]
    DuplicateEntry(String),

    #[error("Entry name too long: '{0}'")]
    EntryNameTooLong(String),

    #[error("Archive too large")]
    ArchiveTooLarge,

    #[error("Invalid argument")]
    InvalidArgument,

    #[error("Usage error: {0}")]
    UsageError(&'static str),
}

impl PSError {
    /// The pipeline stage this error is reported from.
    pub fn stage(&self) -> PipelineStage {
        match self {
            PSError::ArchiveDecodeError(_)
            | PSError::DuplicateEntry(_)
            | PSError::ArchiveTooLarge => PipelineStage::ArchiveRead,
            PSError::InvalidKeyFormat(_) | PSError::InvalidPassphrase => PipelineStage::KeyLoad,
            PSError::SigningError { .. } => PipelineStage::Signing,
            PSError::ArchiveWriteError(_) | PSError::EntryNameTooLong(_) => {
                PipelineStage::Finalizing
            }
            PSError::IOError(_) => PipelineStage::Output,
            PSError::InternalError(_) | PSError::InvalidArgument | PSError::UsageError(_) => {
                PipelineStage::Init
            }
        }
    }

    /// Short machine-readable name, used in audit events.
    pub fn kind(&self) -> &'static str {
        match self {
            PSError::InternalError(_) => "internal",
            PSError::IOError(_) => "io",
            PSError::ArchiveDecodeError(_) => "archive_decode",
            PSError::InvalidKeyFormat(_) => "invalid_key_format",
            PSError::InvalidPassphrase => "invalid_passphrase",
            PSError::SigningError { .. } => "signing",
            PSError::ArchiveWriteError(_) => "archive_write",
            PSError::DuplicateEntry(_) => "duplicate_entry",
            PSError::EntryNameTooLong(_) => "entry_name_too_long",
            PSError::ArchiveTooLarge => "archive_too_large",
            PSError::InvalidArgument => "invalid_argument",
            PSError::UsageError(_) => "usage",
        }
    }
}

impl From<zip::result::ZipError> for PSError {
    fn from(err: zip::result::ZipError) -> Self {
        PSError::ArchiveDecodeError(err.to_string())
    }
}
