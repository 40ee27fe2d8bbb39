//! Hierarchical key derivation and signing.
//!
//! Every account a party uses is derived from one wallet seed along the
//! hardened path m/44'/148'/i' (SLIP-0010 over ed25519), so a channel
//! record only needs to store the key index of its derived accounts.

use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use hmac::{Hmac, Mac};
use sha2::Sha512;
use thiserror::Error;

use crate::stellar::tx::{AccountId, DecoratedSignature};
use crate::stellar::strkey;

type HmacSha512 = Hmac<Sha512>;

/// Key index of the party's primary (wallet) account.
pub const PRIMARY_ACCOUNT_INDEX: u32 = 0;

const PURPOSE: u32 = 44;
const COIN_TYPE: u32 = 148;
const HARDENED: u32 = 0x8000_0000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("signature verification failed")]
    BadSignature,
    #[error("malformed public key")]
    BadPublicKey,
}

struct ExtendedKey {
    key: [u8; 32],
    chain_code: [u8; 32],
}

impl ExtendedKey {
    fn master(seed: &[u8]) -> Self {
        let mut mac = HmacSha512::new_from_slice(b"ed25519 seed").unwrap();
        mac.update(seed);
        Self::from_digest(&mac.finalize().into_bytes())
    }

    /// Hardened child derivation. Ed25519 SLIP-0010 supports only
    /// hardened children, so the index is forced hardened.
    fn child(&self, index: u32) -> Self {
        let mut mac = HmacSha512::new_from_slice(&self.chain_code).unwrap();
        mac.update(&[0u8]);
        mac.update(&self.key);
        mac.update(&(index | HARDENED).to_be_bytes());
        Self::from_digest(&mac.finalize().into_bytes())
    }

    fn from_digest(digest: &[u8]) -> Self {
        let mut key = [0u8; 32];
        let mut chain_code = [0u8; 32];
        key.copy_from_slice(&digest[..32]);
        chain_code.copy_from_slice(&digest[32..]);
        ExtendedKey { key, chain_code }
    }
}

/// A derived signing key together with its account id.
pub struct KeyPair {
    signing: SigningKey,
}

impl KeyPair {
    /// Derives the account key at m/44'/148'/index' from the wallet seed.
    pub fn derive(seed: &[u8], index: u32) -> Self {
        let node = ExtendedKey::master(seed)
            .child(PURPOSE)
            .child(COIN_TYPE)
            .child(index);
        KeyPair {
            signing: SigningKey::from_bytes(&node.key),
        }
    }

    pub fn account_id(&self) -> AccountId {
        AccountId::from_ed25519(self.signing.verifying_key().to_bytes())
    }

    pub fn address(&self) -> String {
        self.account_id().address()
    }

    /// The secret seed string for this key, for operator export.
    pub fn seed_str(&self) -> String {
        strkey::encode_seed(&self.signing.to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }

    pub fn sign_decorated(&self, message: &[u8]) -> DecoratedSignature {
        DecoratedSignature {
            hint: self.account_id().hint(),
            signature: self.sign(message).to_vec(),
        }
    }
}

/// Verifies a detached ed25519 signature made by `account` over `message`.
pub fn verify(account: &AccountId, message: &[u8], signature: &[u8]) -> Result<(), KeyError> {
    let key =
        VerifyingKey::from_bytes(account.as_bytes()).map_err(|_| KeyError::BadPublicKey)?;
    let sig = Signature::from_slice(signature).map_err(|_| KeyError::BadSignature)?;
    key.verify(message, &sig)
        .map_err(|_| KeyError::BadSignature)
}
