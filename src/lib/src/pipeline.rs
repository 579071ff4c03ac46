//! Signing pipeline.
//!
//! A run moves through
//! `Init -> ArchiveRead -> KeyLoaded -> Signing(k of N) -> Finalizing -> Done`,
//! and any error moves it to the absorbing `Failed` state. Every failure is
//! terminal: nothing is retried, and no output is produced for a failed run.
//!
//! Entries are handed to the writer in source order. With `jobs > 1` the
//! signatures themselves are computed on a bounded pool of scoped threads and
//! re-sequenced by index before anything is written.

use crate::archive::{Archive, ChunkCollector, DecodeLimits, Entry, ZipStreamWriter};
use crate::audit;
use crate::config::SignConfig;
use crate::error::PSError;
use crate::secure_file;
use crate::signature::*;

use log::*;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;

/// The part of the pipeline an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Init,
    ArchiveRead,
    KeyLoad,
    Signing,
    Finalizing,
    Output,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Init => "init",
            PipelineStage::ArchiveRead => "archive_read",
            PipelineStage::KeyLoad => "key_load",
            PipelineStage::Signing => "signing",
            PipelineStage::Finalizing => "finalizing",
            PipelineStage::Output => "output",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a signing run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    ArchiveRead { entries: usize },
    KeyLoaded,
    Signing { done: usize, total: usize },
    Finalizing,
    Done,
    Failed { stage: PipelineStage },
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed { .. })
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Init => write!(f, "init"),
            PipelineState::ArchiveRead { entries } => {
                write!(f, "archive read ({} entries)", entries)
            }
            PipelineState::KeyLoaded => write!(f, "key loaded"),
            PipelineState::Signing { done, total } => write!(f, "signing ({} of {})", done, total),
            PipelineState::Finalizing => write!(f, "finalizing"),
            PipelineState::Done => write!(f, "done"),
            PipelineState::Failed { stage } => write!(f, "failed during {}", stage),
        }
    }
}

/// One entry of a signed archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedEntryInfo {
    pub path: String,
    pub size: usize,
    pub signature: SignatureMetadata,
}

/// The assembled output of a successful run.
#[derive(Debug, Clone)]
pub struct SignedArchive {
    pub bytes: Vec<u8>,
    /// Entries in output order
    pub entries: Vec<SignedEntryInfo>,
}

impl SignedArchive {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

type Observer = dyn Fn(&PipelineState) + Send + Sync;

/// Signs every entry of a plugin archive.
pub struct SigningPipeline {
    config: SignConfig,
    observer: Option<Box<Observer>>,
}

impl fmt::Debug for SigningPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningPipeline")
            .field("config", &self.config)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl SigningPipeline {
    pub fn new(config: SignConfig) -> Self {
        SigningPipeline {
            config,
            observer: None,
        }
    }

    /// Call `observer` on every state transition.
    pub fn with_observer(
        mut self,
        observer: impl Fn(&PipelineState) + Send + Sync + 'static,
    ) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn config(&self) -> &SignConfig {
        &self.config
    }

    /// Decode `archive_bytes`, unlock the key and sign every entry.
    ///
    /// Returns the signed archive in memory; nothing is written to disk.
    pub fn run(
        &self,
        archive_bytes: &[u8],
        armored_key: &str,
        passphrase: &str,
    ) -> Result<SignedArchive, PSError> {
        let mut run = Run::new(self.observer.as_deref(), content_digest(archive_bytes));
        let signed = self.sign_archive_bytes(&mut run, archive_bytes, armored_key, passphrase)?;
        run.complete(&signed);
        Ok(signed)
    }

    /// Like [`Self::run`], then atomically write the result to the configured output path.
    pub fn run_to_file(
        &self,
        archive_bytes: &[u8],
        armored_key: &str,
        passphrase: &str,
    ) -> Result<SignedArchive, PSError> {
        let mut run = Run::new(self.observer.as_deref(), content_digest(archive_bytes));
        let signed = self.sign_archive_bytes(&mut run, archive_bytes, armored_key, passphrase)?;
        secure_file::write_atomic(&self.config.output_path, &signed.bytes)
            .map_err(|e| run.fail(e))?;
        run.complete(&signed);
        Ok(signed)
    }

    /// Sign an already decoded archive with an already loaded signer.
    ///
    /// The signer is consumed and dropped as soon as the last entry is signed.
    pub fn run_with_signer<S: EntrySigner + Sync>(
        &self,
        archive: Archive,
        signer: S,
    ) -> Result<SignedArchive, PSError> {
        let mut run = Run::new(self.observer.as_deref(), "n/a".to_string());
        run.transition(PipelineState::ArchiveRead {
            entries: archive.len(),
        });
        run.transition(PipelineState::KeyLoaded);
        let signed = self.sign_and_write(&mut run, archive, signer)?;
        run.complete(&signed);
        Ok(signed)
    }

    fn sign_archive_bytes(
        &self,
        run: &mut Run<'_>,
        archive_bytes: &[u8],
        armored_key: &str,
        passphrase: &str,
    ) -> Result<SignedArchive, PSError> {
        let limits = DecodeLimits::from(&self.config);
        let archive = Archive::decode_with_limits(archive_bytes, &limits).map_err(|e| run.fail(e))?;
        run.transition(PipelineState::ArchiveRead {
            entries: archive.len(),
        });

        let key = KeyMaterial::load(armored_key, passphrase).map_err(|e| run.fail(e))?;
        audit::log_key_loaded(
            &run.correlation_id,
            &key.key_id_hex(),
            &key.signing_key_id_hex(),
        );
        run.transition(PipelineState::KeyLoaded);

        self.sign_and_write(run, archive, key)
    }

    fn sign_and_write<S: EntrySigner + Sync>(
        &self,
        run: &mut Run<'_>,
        archive: Archive,
        signer: S,
    ) -> Result<SignedArchive, PSError> {
        let entries = archive.into_entries();
        let total = entries.len();
        run.transition(PipelineState::Signing { done: 0, total });

        let mut writer = ZipStreamWriter::new(ChunkCollector::new(), self.config.compression);
        let mut infos = Vec::with_capacity(total);

        if self.config.jobs > 1 && total > 1 {
            let signatures = sign_parallel(&entries, &signer, self.config.jobs);
            drop(signer);
            let signatures = signatures.map_err(|e| run.fail(e))?;
            for (done, (entry, signature)) in entries.iter().zip(signatures).enumerate() {
                let info = write_entry(&mut writer, entry, &signature).map_err(|e| run.fail(e))?;
                let content_hash = content_digest(&entry.content);
                audit::log_entry_signed(&run.correlation_id, &entry.path, &content_hash);
                infos.push(info);
                run.transition(PipelineState::Signing { done: done + 1, total });
            }
        } else {
            for (done, entry) in entries.iter().enumerate() {
                let signature = signer
                    .sign_entry(&entry.path, &entry.content)
                    .map_err(|e| run.fail(e))?;
                let info = write_entry(&mut writer, entry, &signature).map_err(|e| run.fail(e))?;
                let content_hash = content_digest(&entry.content);
                audit::log_entry_signed(&run.correlation_id, &entry.path, &content_hash);
                infos.push(info);
                run.transition(PipelineState::Signing { done: done + 1, total });
            }
            drop(signer);
        }

        run.transition(PipelineState::Finalizing);
        writer.end().map_err(|e| run.fail(e))?;
        let bytes = writer.into_sink().finish().map_err(|e| run.fail(e))?;
        Ok(SignedArchive {
            bytes,
            entries: infos,
        })
    }
}

fn write_entry(
    writer: &mut ZipStreamWriter<ChunkCollector>,
    entry: &Entry,
    signature: &DetachedSignature,
) -> Result<SignedEntryInfo, PSError> {
    let metadata = signature.metadata();
    writer.add(&entry.path, &entry.content, &metadata.signature_base64)?;
    Ok(SignedEntryInfo {
        path: entry.path.clone(),
        size: entry.content.len(),
        signature: metadata,
    })
}

/// Sign all entries on up to `jobs` scoped threads.
///
/// Results are re-sequenced into entry order. Workers stop picking up new
/// entries after the first failure; the failure with the lowest index is returned.
fn sign_parallel<S: EntrySigner + Sync>(
    entries: &[Entry],
    signer: &S,
    jobs: usize,
) -> Result<Vec<DetachedSignature>, PSError> {
    let workers = jobs.min(entries.len());
    let next = AtomicUsize::new(0);
    let abort = AtomicBool::new(false);
    debug!("Signing {} entries on {} workers", entries.len(), workers);

    std::thread::scope(|scope| {
        let (result_tx, result_rx) = mpsc::channel::<(usize, Result<DetachedSignature, PSError>)>();
        for _ in 0..workers {
            let result_tx = result_tx.clone();
            let next = &next;
            let abort = &abort;
            scope.spawn(move || {
                while !abort.load(Ordering::Acquire) {
                    let index = next.fetch_add(1, Ordering::AcqRel);
                    let Some(entry) = entries.get(index) else {
                        break;
                    };
                    let result = signer.sign_entry(&entry.path, &entry.content);
                    if result.is_err() {
                        abort.store(true, Ordering::Release);
                    }
                    if result_tx.send((index, result)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        let mut slots: Vec<Option<DetachedSignature>> = entries.iter().map(|_| None).collect();
        let mut first_error: Option<(usize, PSError)> = None;
        for (index, result) in result_rx {
            match result {
                Ok(signature) => slots[index] = Some(signature),
                Err(e) => {
                    if first_error.as_ref().map_or(true, |(i, _)| index < *i) {
                        first_error = Some((index, e));
                    }
                }
            }
        }
        if let Some((_, e)) = first_error {
            return Err(e);
        }
        slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.ok_or_else(|| {
                    PSError::InternalError(format!("no signature produced for entry {}", i))
                })
            })
            .collect()
    })
}

/// Bookkeeping for one run: current state, observer and audit context.
struct Run<'a> {
    observer: Option<&'a Observer>,
    state: PipelineState,
    correlation_id: String,
    artifact_hash: String,
}

impl<'a> Run<'a> {
    fn new(observer: Option<&'a Observer>, artifact_hash: String) -> Self {
        let correlation_id = audit::new_correlation_id();
        audit::log_signing_attempt(&correlation_id, &artifact_hash);
        let run = Run {
            observer,
            state: PipelineState::Init,
            correlation_id,
            artifact_hash,
        };
        run.notify();
        run
    }

    fn transition(&mut self, next: PipelineState) {
        debug_assert!(!self.state.is_terminal());
        debug!("Pipeline: {} -> {}", self.state, next);
        self.state = next;
        self.notify();
    }

    fn fail(&mut self, err: PSError) -> PSError {
        let stage = err.stage();
        debug!("Pipeline failed in state [{}]: {}", self.state, err);
        audit::log_signing_failure(
            &self.correlation_id,
            &self.artifact_hash,
            stage.as_str(),
            err.kind(),
            &err.to_string(),
        );
        self.transition(PipelineState::Failed { stage });
        err
    }

    fn complete(&mut self, signed: &SignedArchive) {
        audit::log_signing_success(
            &self.correlation_id,
            &self.artifact_hash,
            &content_digest(&signed.bytes),
            signed.len(),
        );
        self.transition(PipelineState::Done);
    }

    fn notify(&self) {
        if let Some(observer) = self.observer {
            observer(&self.state);
        }
    }
}
