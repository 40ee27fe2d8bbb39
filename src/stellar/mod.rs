//! A minimal self-contained model of the ledger the channel protocol
//! runs on: native-asset amounts, checksummed address strings, the
//! transaction schema with its deterministic wire encoding, and
//! network-bound transaction hashing.

pub mod amount;
pub mod network;
pub mod strkey;
pub mod tx;
pub mod xdr;

pub use amount::Amount;
pub use network::{network_id, transaction_hash};
pub use tx::{
    AccountId, DecoratedSignature, Operation, OperationBody, OpResult, SequenceNumber, SetOptions,
    Signer, TimeBounds, Transaction, TransactionEnvelope, TxResult, TxResultCode,
};
pub use xdr::XdrEncode;
