//! Network identity and transaction hashing.

use sha2::{Digest, Sha256};

use super::tx::Transaction;
use super::xdr::XdrEncode;

const ENVELOPE_TYPE_TX: u32 = 2;

/// The network id is the SHA-256 of the network passphrase. Signing a
/// transaction hash binds the signature to one network's chain.
pub fn network_id(passphrase: &str) -> [u8; 32] {
    Sha256::digest(passphrase.as_bytes()).into()
}

/// The signing hash of a transaction on the given network:
/// SHA-256 over the network id, the envelope-type discriminant, and the
/// serialized transaction.
pub fn transaction_hash(tx: &Transaction, passphrase: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(network_id(passphrase));
    hasher.update(ENVELOPE_TYPE_TX.to_be_bytes());
    hasher.update(tx.to_xdr());
    hasher.finalize().into()
}
