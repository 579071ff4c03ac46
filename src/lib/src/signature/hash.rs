use ct_codecs::{Encoder, Hex};

#[derive(Clone, Copy)]
pub(crate) struct Hash {
    hash: hmac_sha256::Hash,
}

impl Hash {
    pub fn new() -> Self {
        Hash {
            hash: hmac_sha256::Hash::new(),
        }
    }

    pub fn update<T: AsRef<[u8]>>(&mut self, data: T) {
        self.hash.update(data);
    }

    pub fn finalize(&self) -> [u8; 32] {
        self.hash.finalize()
    }
}

/// `sha256:<hex>` digest of `data`, as reported in audit events.
pub(crate) fn content_digest(data: &[u8]) -> String {
    let mut hasher = Hash::new();
    hasher.update(data);
    let hex = Hex::encode_to_string(hasher.finalize()).unwrap_or_default();
    format!("sha256:{}", hex)
}
