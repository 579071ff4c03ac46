//! Generated OpenPGP keys shared by unit tests.
//!
//! Key generation is slow, so each key is generated once per test binary.

use pgp::composed::{KeyType, SecretKeyParamsBuilder, SignedSecretKey, SubkeyParamsBuilder};
use std::sync::OnceLock;

pub(crate) const PASSPHRASE: &str = "correct horse battery staple";

pub(crate) struct KeyFixture {
    pub key: SignedSecretKey,
    pub armored: String,
}

static PRIMARY: OnceLock<KeyFixture> = OnceLock::new();
static OTHER: OnceLock<KeyFixture> = OnceLock::new();
static SUBKEY_SIGNER: OnceLock<KeyFixture> = OnceLock::new();
static CERTIFY_ONLY: OnceLock<KeyFixture> = OnceLock::new();

/// The key most tests sign with.
pub(crate) fn primary() -> &'static KeyFixture {
    PRIMARY.get_or_init(|| generate("Plugin Signer <signer@example.com>"))
}

/// An unrelated key, for negative verification tests.
pub(crate) fn other() -> &'static KeyFixture {
    OTHER.get_or_init(|| generate("Someone Else <else@example.com>"))
}

/// A certify-only primary with a separate signing subkey, the layout
/// `gpg --full-generate-key` produces.
pub(crate) fn subkey_signer() -> &'static KeyFixture {
    SUBKEY_SIGNER.get_or_init(|| {
        let subkey = SubkeyParamsBuilder::default()
            .key_type(KeyType::Rsa(2048))
            .can_sign(true)
            .passphrase(Some(PASSPHRASE.to_string()))
            .build()
            .unwrap();
        let mut params = SecretKeyParamsBuilder::default();
        params
            .key_type(KeyType::Rsa(2048))
            .can_certify(true)
            .can_sign(false)
            .primary_user_id("Release Signer <release@example.com>".into())
            .passphrase(Some(PASSPHRASE.to_string()))
            .subkey(subkey);
        finish(params)
    })
}

/// A key without any signing-capable key.
pub(crate) fn certify_only() -> &'static KeyFixture {
    CERTIFY_ONLY.get_or_init(|| {
        let mut params = SecretKeyParamsBuilder::default();
        params
            .key_type(KeyType::Rsa(2048))
            .can_certify(true)
            .can_sign(false)
            .primary_user_id("Certifier <certify@example.com>".into())
            .passphrase(Some(PASSPHRASE.to_string()));
        finish(params)
    })
}

fn generate(user_id: &str) -> KeyFixture {
    let mut params = SecretKeyParamsBuilder::default();
    params
        .key_type(KeyType::Rsa(2048))
        .can_sign(true)
        .primary_user_id(user_id.into())
        .passphrase(Some(PASSPHRASE.to_string()));
    finish(params)
}

fn finish(params: SecretKeyParamsBuilder) -> KeyFixture {
    let key = params.build().unwrap().generate(rand::thread_rng()).unwrap();
    let key = key
        .sign(rand::thread_rng(), || PASSPHRASE.to_string())
        .unwrap();
    let armored = key.to_armored_string(Default::default()).unwrap();
    KeyFixture { key, armored }
}
