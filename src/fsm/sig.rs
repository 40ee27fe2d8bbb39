//! Detached-signature protocol.
//!
//! Transactions are signed over their network-bound hash with keys
//! derived from the wallet seed, and verified against the public key of
//! whichever on-channel account the counterparty controls. Signatures
//! travel detached from the transaction itself: each side reconstructs
//! the transaction locally and never signs bytes it did not build.

use crate::key::{self, KeyPair};
use crate::stellar::network::transaction_hash;
use crate::stellar::tx::{AccountId, DecoratedSignature, Transaction, TransactionEnvelope};

use super::error::ProtocolError;

/// Signs the transaction hash with the key at derivation index `index`.
pub fn detached_sig(
    tx: &Transaction,
    seed: &[u8],
    passphrase: &str,
    index: u32,
) -> DecoratedSignature {
    let hash = transaction_hash(tx, passphrase);
    KeyPair::derive(seed, index).sign_decorated(&hash)
}

/// Verifies a detached signature on a locally-reconstructed transaction
/// against the expected signer account. `what` names the transaction
/// kind for the error message.
pub fn verify_sig(
    tx: &Transaction,
    passphrase: &str,
    signer: &AccountId,
    sig: &DecoratedSignature,
    what: &'static str,
) -> Result<(), ProtocolError> {
    let hash = transaction_hash(tx, passphrase);
    key::verify(signer, &hash, &sig.signature)
        .map_err(|_| ProtocolError::InvalidSignature(what))
}

/// Wraps a transaction in an envelope signed by the derived keys at the
/// given indices, in order.
pub fn sign_tx(
    tx: Transaction,
    seed: &[u8],
    passphrase: &str,
    indices: &[u32],
) -> TransactionEnvelope {
    let hash = transaction_hash(&tx, passphrase);
    let signatures = indices
        .iter()
        .map(|&i| KeyPair::derive(seed, i).sign_decorated(&hash))
        .collect();
    TransactionEnvelope { tx, signatures }
}
