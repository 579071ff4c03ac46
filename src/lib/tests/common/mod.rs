//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use plugsign::reexports::base64::engine::general_purpose::STANDARD;
use plugsign::reexports::base64::Engine;
use plugsign::reexports::pgp::composed::{
    Deserializable, KeyType, SecretKeyParamsBuilder, SignedSecretKey, StandaloneSignature,
};
use std::io::{Cursor, Read, Write};
use std::sync::OnceLock;
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;

pub const PASSPHRASE: &str = "plugin-signing-passphrase";

pub struct KeyFixture {
    pub key: SignedSecretKey,
    pub armored: String,
}

static SIGNER: OnceLock<KeyFixture> = OnceLock::new();
static STRANGER: OnceLock<KeyFixture> = OnceLock::new();

pub fn signer_key() -> &'static KeyFixture {
    SIGNER.get_or_init(|| generate("Plugin Author <author@example.com>"))
}

pub fn stranger_key() -> &'static KeyFixture {
    STRANGER.get_or_init(|| generate("Stranger <stranger@example.com>"))
}

fn generate(user_id: &str) -> KeyFixture {
    let params = SecretKeyParamsBuilder::default()
        .key_type(KeyType::Rsa(2048))
        .can_sign(true)
        .primary_user_id(user_id.into())
        .passphrase(Some(PASSPHRASE.to_string()))
        .build()
        .unwrap();
    let key = params.generate(rand::thread_rng()).unwrap();
    let key = key
        .sign(rand::thread_rng(), || PASSPHRASE.to_string())
        .unwrap();
    let armored = key.to_armored_string(Default::default()).unwrap();
    KeyFixture { key, armored }
}

/// The demo plugin: a manifest and a script.
pub fn demo_plugin() -> Vec<u8> {
    build_zip(
        &[
            ("manifest.json", br#"{"name":"demo","version":"1.0.0"}"#),
            ("index.js", b"console.log(1)"),
        ],
        CompressionMethod::Deflated,
    )
}

pub fn build_zip(entries: &[(&str, &[u8])], method: CompressionMethod) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(method);
    for (name, data) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// An entry read back from a signed archive.
pub struct ReadEntry {
    pub path: String,
    pub content: Vec<u8>,
    pub comment: String,
}

pub fn read_entries(bytes: &[u8]) -> Vec<ReadEntry> {
    let mut zip = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    (0..zip.len())
        .map(|i| {
            let mut file = zip.by_index(i).unwrap();
            let mut content = vec![];
            file.read_to_end(&mut content).unwrap();
            ReadEntry {
                path: file.name().to_string(),
                content,
                comment: file.comment().to_string(),
            }
        })
        .collect()
}

/// Check a base64 detached signature against `content` and `key`.
pub fn verifies(key: &SignedSecretKey, content: &[u8], signature_base64: &str) -> bool {
    let Ok(bytes) = STANDARD.decode(signature_base64) else {
        return false;
    };
    let Ok(signature) = StandaloneSignature::from_bytes(&bytes[..]) else {
        return false;
    };
    signature.verify(key, content).is_ok()
}
