mod hash;
mod keys;
mod signer;

#[cfg(test)]
pub(crate) mod test_keys;

pub use keys::*;
pub use signer::*;

pub(crate) use hash::*;
