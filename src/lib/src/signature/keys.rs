use crate::error::PSError;
use crate::secure_file;

use ct_codecs::{Encoder, Hex};
use log::*;
use pgp::composed::{
    Deserializable, Message, SignedSecretKey, SignedSecretSubKey, StandaloneSignature,
};
use pgp::crypto::hash::HashAlgorithm;
use pgp::packet::{KeyFlags, Signature, SignatureType};
use pgp::types::{PublicKeyTrait, SecretKeyTrait};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use std::{fmt, str};
use zeroize::Zeroizing;

/// Digest used for every entry signature.
pub const SIGNATURE_HASH_ALGORITHM: HashAlgorithm = HashAlgorithm::SHA2_256;

/// Marker meaning "read the key from standard input".
pub const STDIN_MARKER: &str = "-";

/// Which key of the certificate produces entry signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SigningKey {
    Primary,
    Subkey(usize),
}

/// An unlocked OpenPGP signing key.
///
/// Holds the parsed secret key together with the passphrase that unlocks it.
/// The passphrase is wiped from memory when the value is dropped, and neither
/// it nor any secret parameter ever appears in `Debug` output or logs.
///
/// Signatures are made with the newest valid subkey flagged for signing. The
/// primary key is used only when no such subkey exists and its own
/// self-signature allows signing.
pub struct KeyMaterial {
    key: SignedSecretKey,
    signing_key: SigningKey,
    passphrase: Zeroizing<String>,
}

impl KeyMaterial {
    /// Parse an armored secret key and check that `passphrase` unlocks it.
    ///
    /// A passphrase that does not decrypt the signing key is reported as
    /// [`PSError::InvalidPassphrase`]. Any other problem with the key,
    /// including a key that has nothing able to sign, is
    /// [`PSError::InvalidKeyFormat`].
    pub fn load(armored: &str, passphrase: &str) -> Result<Self, PSError> {
        let (key, _headers) = SignedSecretKey::from_string(armored)
            .map_err(|e| PSError::InvalidKeyFormat(e.to_string()))?;
        key.verify()
            .map_err(|e| PSError::InvalidKeyFormat(format!("invalid self-signature: {}", e)))?;
        let signing_key = select_signing_key(&key, unix_now()).ok_or_else(|| {
            PSError::InvalidKeyFormat("key has no valid signing-capable key".to_string())
        })?;

        let material = KeyMaterial {
            key,
            signing_key,
            passphrase: Zeroizing::new(passphrase.to_string()),
        };
        material.unlock().map_err(|e| {
            debug!(
                "Unable to unlock key {}: {}",
                material.signing_key_id_hex(),
                e
            );
            unlock_error(e)
        })?;
        material.sign_detached("", &[]).map_err(|e| {
            PSError::InvalidKeyFormat(format!("key is unable to sign: {}", e))
        })?;
        debug!(
            "Loaded key {}, signing with {}",
            material.key_id_hex(),
            material.signing_key_id_hex()
        );
        Ok(material)
    }

    /// Load a key from a [`KeySource`].
    pub fn from_source(source: &KeySource, passphrase: &str) -> Result<Self, PSError> {
        let armored = source.read_armored()?;
        Self::load(&armored, passphrase)
    }

    /// The 8-byte OpenPGP key identifier of the primary key.
    pub fn key_id(&self) -> Vec<u8> {
        self.key.key_id().as_ref().to_vec()
    }

    /// The primary key identifier as upper-case hex.
    pub fn key_id_hex(&self) -> String {
        hex_id(self.key.key_id().as_ref())
    }

    /// The identifier of the key that issues entry signatures.
    ///
    /// Equal to [`KeyMaterial::key_id`] unless a signing subkey is used.
    pub fn signing_key_id(&self) -> Vec<u8> {
        match self.signing_key {
            SigningKey::Primary => self.key_id(),
            SigningKey::Subkey(i) => self.key.secret_subkeys[i].key_id().as_ref().to_vec(),
        }
    }

    pub fn signing_key_id_hex(&self) -> String {
        hex_id(&self.signing_key_id())
    }

    fn unlock(&self) -> Result<(), pgp::errors::Error> {
        let pw = || self.passphrase.as_str().to_owned();
        match self.signing_key {
            SigningKey::Primary => self.key.unlock(pw, |_| Ok(())),
            SigningKey::Subkey(i) => self.key.secret_subkeys[i].unlock(pw, |_| Ok(())),
        }
    }

    /// Sign `content` as a binary literal named `file_name`, detached.
    pub(crate) fn sign_detached(
        &self,
        file_name: &str,
        content: &[u8],
    ) -> Result<StandaloneSignature, pgp::errors::Error> {
        match self.signing_key {
            SigningKey::Primary => self.sign_with(&self.key, file_name, content),
            SigningKey::Subkey(i) => {
                self.sign_with(&self.key.secret_subkeys[i], file_name, content)
            }
        }
    }

    fn sign_with(
        &self,
        key: &impl SecretKeyTrait,
        file_name: &str,
        content: &[u8],
    ) -> Result<StandaloneSignature, pgp::errors::Error> {
        let message = Message::new_literal_bytes(file_name, content);
        let signed = message.sign(
            rand::thread_rng(),
            key,
            || self.passphrase.as_str().to_owned(),
            SIGNATURE_HASH_ALGORITHM,
        )?;
        Ok(signed.into_signature())
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "KeyMaterial {{ key_id: {}, signing_key_id: {} }}",
            self.key_id_hex(),
            self.signing_key_id_hex()
        )
    }
}

fn hex_id(id: &[u8]) -> String {
    Hex::encode_to_string(id).unwrap_or_default().to_uppercase()
}

/// Only a failed decryption of the secret material means the passphrase is wrong.
fn unlock_error(e: pgp::errors::Error) -> PSError {
    match e {
        pgp::errors::Error::InvalidInput
        | pgp::errors::Error::Gcm
        | pgp::errors::Error::Eax
        | pgp::errors::Error::Ocb => PSError::InvalidPassphrase,
        other => PSError::InvalidKeyFormat(format!("unable to unlock key: {}", other)),
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn created_ts(signature: &Signature) -> i64 {
    signature.created().map(|c| c.timestamp()).unwrap_or(i64::MIN)
}

/// A key expires `key_expiration_time` seconds after its creation; zero means never.
fn expired(key_created: i64, self_signature: &Signature, now: i64) -> bool {
    match self_signature.key_expiration_time() {
        Some(validity) if validity.num_seconds() > 0 => {
            key_created.saturating_add(validity.num_seconds()) <= now
        }
        _ => false,
    }
}

fn subkey_can_sign(subkey: &SignedSecretSubKey, now: i64) -> bool {
    if subkey
        .signatures
        .iter()
        .any(|s| s.typ() == SignatureType::SubkeyRevocation)
    {
        return false;
    }
    let binding = subkey
        .signatures
        .iter()
        .filter(|s| s.typ() == SignatureType::SubkeyBinding)
        .max_by_key(|s| created_ts(s));
    match binding {
        Some(binding) => {
            binding.key_flags().sign() && !expired(subkey.created_at().timestamp(), binding, now)
        }
        None => false,
    }
}

/// A self-signature without a key flags subpacket places no usage restriction.
fn primary_can_sign(key: &SignedSecretKey, now: i64) -> bool {
    let latest = key
        .details
        .users
        .iter()
        .flat_map(|user| user.signatures.iter())
        .chain(key.details.direct_signatures.iter())
        .max_by_key(|s| created_ts(s));
    match latest {
        Some(sig) => {
            let flags = sig.key_flags();
            (flags.sign() || flags == KeyFlags::default())
                && !expired(key.created_at().timestamp(), sig, now)
        }
        None => false,
    }
}

fn select_signing_key(key: &SignedSecretKey, now: i64) -> Option<SigningKey> {
    if !key.details.revocation_signatures.is_empty() {
        return None;
    }
    key.secret_subkeys
        .iter()
        .enumerate()
        .filter(|(_, subkey)| subkey_can_sign(subkey, now))
        .max_by_key(|(_, subkey)| subkey.created_at().timestamp())
        .map(|(i, _)| SigningKey::Subkey(i))
        .or_else(|| primary_can_sign(key, now).then_some(SigningKey::Primary))
}

/// Where the armored secret key comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    File(PathBuf),
    Stdin,
}

impl KeySource {
    /// Interpret a command-line argument: `-` is standard input, anything else a path.
    pub fn parse(arg: &str) -> Self {
        if arg == STDIN_MARKER {
            KeySource::Stdin
        } else {
            KeySource::File(PathBuf::from(arg))
        }
    }

    pub fn is_stdin(&self) -> bool {
        matches!(self, KeySource::Stdin)
    }

    /// Read the armored key text.
    pub fn read_armored(&self) -> Result<String, PSError> {
        match self {
            KeySource::File(path) => read_armored_file(path),
            KeySource::Stdin => read_armored_from(&mut io::stdin().lock()),
        }
    }
}

fn read_armored_file(path: &Path) -> Result<String, PSError> {
    let bytes = Zeroizing::new(secure_file::read_secure(path)?);
    armored_text(&bytes)
}

/// Read armored key text from a reader.
pub fn read_armored_from(reader: &mut impl Read) -> Result<String, PSError> {
    let mut bytes = Zeroizing::new(vec![]);
    reader.read_to_end(&mut bytes)?;
    armored_text(&bytes)
}

fn armored_text(bytes: &[u8]) -> Result<String, PSError> {
    let text = str::from_utf8(bytes)
        .map_err(|_| PSError::InvalidKeyFormat("key is not valid UTF-8 text".to_string()))?;
    if text.trim().is_empty() {
        return Err(PSError::InvalidKeyFormat("key is empty".to_string()));
    }
    Ok(text.to_string())
}
