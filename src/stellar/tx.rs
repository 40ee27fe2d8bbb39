//! Ledger transaction model.
//!
//! These types mirror the ledger's transaction-envelope schema closely
//! enough to reproduce its signing bytes, while staying plain Rust data:
//! the classifier compares transactions structurally with `PartialEq`
//! instead of comparing re-marshaled bytes. Only the operation kinds the
//! channel protocol emits are modeled.

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::fmt;

use super::amount::Amount;
use super::strkey::{self, StrkeyError};
use super::xdr::{Writer, XdrEncode};

/// A ledger account sequence number.
pub type SequenceNumber = i64;

// XDR discriminants from the ledger schema.
const KEY_TYPE_ED25519: u32 = 0;
const ASSET_TYPE_NATIVE: u32 = 0;
const MEMO_NONE: u32 = 0;
const OP_CREATE_ACCOUNT: u32 = 0;
const OP_PAYMENT: u32 = 1;
const OP_SET_OPTIONS: u32 = 5;
const OP_ACCOUNT_MERGE: u32 = 8;
const OP_BUMP_SEQUENCE: u32 = 11;

/// An ed25519 account identifier.
///
/// The all-zero value stands for "no account" and serializes to the
/// empty string, so persisted channels round-trip unset account fields
/// exactly.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId([u8; 32]);

impl AccountId {
    pub fn from_ed25519(key: [u8; 32]) -> Self {
        AccountId(key)
    }

    pub fn from_address(address: &str) -> Result<Self, StrkeyError> {
        if address.is_empty() {
            return Ok(AccountId::default());
        }
        strkey::decode_account_id(address).map(AccountId)
    }

    /// The checksummed address string, or `""` for the zero account.
    pub fn address(&self) -> String {
        if self.is_zero() {
            return String::new();
        }
        strkey::encode_account_id(&self.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The signature hint: the last four bytes of the public key.
    pub fn hint(&self) -> [u8; 4] {
        let mut hint = [0u8; 4];
        hint.copy_from_slice(&self.0[28..]);
        hint
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "AccountId({})", self.address())
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.address())
    }
}

impl Serialize for AccountId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.address())
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        AccountId::from_address(&s).map_err(serde::de::Error::custom)
    }
}

impl XdrEncode for AccountId {
    fn encode(&self, w: &mut Writer) {
        w.put_u32(KEY_TYPE_ED25519);
        w.put_opaque_fixed(&self.0);
    }
}

/// An additional signer installed on an account by a set-options
/// operation. Only ed25519 signer keys are used by this protocol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signer {
    pub key: AccountId,
    pub weight: u32,
}

impl XdrEncode for Signer {
    fn encode(&self, w: &mut Writer) {
        self.key.encode(w);
        w.put_u32(self.weight);
    }
}

/// The subset of set-options fields the channel protocol writes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetOptions {
    pub master_weight: Option<u32>,
    pub low_threshold: Option<u32>,
    pub med_threshold: Option<u32>,
    pub high_threshold: Option<u32>,
    pub signer: Option<Signer>,
}

impl XdrEncode for SetOptions {
    fn encode(&self, w: &mut Writer) {
        w.put_option(None::<&AccountId>, |w, v: &AccountId| v.encode(w)); // inflation dest
        w.put_option(None::<&u32>, |w, v| w.put_u32(*v)); // clear flags
        w.put_option(None::<&u32>, |w, v| w.put_u32(*v)); // set flags
        w.put_option(self.master_weight.as_ref(), |w, v| w.put_u32(*v));
        w.put_option(self.low_threshold.as_ref(), |w, v| w.put_u32(*v));
        w.put_option(self.med_threshold.as_ref(), |w, v| w.put_u32(*v));
        w.put_option(self.high_threshold.as_ref(), |w, v| w.put_u32(*v));
        w.put_option(None::<&String>, |w, v| w.put_string(v)); // home domain
        w.put_option(self.signer.as_ref(), |w, v| v.encode(w));
    }
}

/// The body of a single ledger operation. All payments are in the
/// native asset; the protocol never touches issued assets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationBody {
    CreateAccount {
        destination: AccountId,
        starting_balance: Amount,
    },
    Payment {
        destination: AccountId,
        amount: Amount,
    },
    SetOptions(SetOptions),
    AccountMerge {
        destination: AccountId,
    },
    BumpSequence {
        bump_to: SequenceNumber,
    },
}

impl XdrEncode for OperationBody {
    fn encode(&self, w: &mut Writer) {
        match self {
            OperationBody::CreateAccount {
                destination,
                starting_balance,
            } => {
                w.put_u32(OP_CREATE_ACCOUNT);
                destination.encode(w);
                w.put_i64(starting_balance.as_stroops());
            }
            OperationBody::Payment {
                destination,
                amount,
            } => {
                w.put_u32(OP_PAYMENT);
                destination.encode(w);
                w.put_u32(ASSET_TYPE_NATIVE);
                w.put_i64(amount.as_stroops());
            }
            OperationBody::SetOptions(opts) => {
                w.put_u32(OP_SET_OPTIONS);
                opts.encode(w);
            }
            OperationBody::AccountMerge { destination } => {
                w.put_u32(OP_ACCOUNT_MERGE);
                destination.encode(w);
            }
            OperationBody::BumpSequence { bump_to } => {
                w.put_u32(OP_BUMP_SEQUENCE);
                w.put_i64(*bump_to);
            }
        }
    }
}

/// One ledger operation, optionally sourced from an account other than
/// the transaction's source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub source: Option<AccountId>,
    pub body: OperationBody,
}

impl Operation {
    /// The account this operation acts for, defaulting to the
    /// transaction source when no explicit source is set.
    pub fn effective_source(&self, tx: &Transaction) -> AccountId {
        self.source.unwrap_or(tx.source)
    }
}

impl XdrEncode for Operation {
    fn encode(&self, w: &mut Writer) {
        w.put_option(self.source.as_ref(), |w, v| v.encode(w));
        self.body.encode(w);
    }
}

/// Ledger close-time bounds on transaction validity. A zero bound means
/// unbounded on that side.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBounds {
    pub min_time: u64,
    pub max_time: u64,
}

impl XdrEncode for TimeBounds {
    fn encode(&self, w: &mut Writer) {
        w.put_u64(self.min_time);
        w.put_u64(self.max_time);
    }
}

/// An unsigned ledger transaction. The memo is always empty in this
/// protocol and is encoded as memo-none.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub source: AccountId,
    pub fee: u32,
    pub seq_num: SequenceNumber,
    pub time_bounds: Option<TimeBounds>,
    pub operations: Vec<Operation>,
}

impl XdrEncode for Transaction {
    fn encode(&self, w: &mut Writer) {
        self.source.encode(w);
        w.put_u32(self.fee);
        w.put_i64(self.seq_num);
        w.put_option(self.time_bounds.as_ref(), |w, v| v.encode(w));
        w.put_u32(MEMO_NONE);
        w.put_u32(self.operations.len() as u32);
        for op in &self.operations {
            op.encode(w);
        }
        w.put_u32(0); // ext
    }
}

/// A signature over a transaction hash, decorated with the hint
/// identifying which key produced it.
#[serde_as]
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoratedSignature {
    #[serde_as(as = "serde_with::hex::Hex")]
    pub hint: [u8; 4],
    #[serde_as(as = "serde_with::hex::Hex")]
    pub signature: Vec<u8>,
}

impl fmt::Debug for DecoratedSignature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "DecoratedSignature({}..., hint {})",
            hex::encode(&self.signature[..self.signature.len().min(8)]),
            hex::encode(self.hint)
        )
    }
}

impl XdrEncode for DecoratedSignature {
    fn encode(&self, w: &mut Writer) {
        w.put_opaque_fixed(&self.hint);
        w.put_opaque(&self.signature);
    }
}

/// A transaction together with the signatures authorizing it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEnvelope {
    pub tx: Transaction,
    pub signatures: Vec<DecoratedSignature>,
}

impl XdrEncode for TransactionEnvelope {
    fn encode(&self, w: &mut Writer) {
        self.tx.encode(w);
        w.put_u32(self.signatures.len() as u32);
        for sig in &self.signatures {
            sig.encode(w);
        }
    }
}

/// Result code of a transaction as reported by the ledger.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxResultCode {
    Success,
    Failed,
    TooEarly,
    TooLate,
    InsufficientBalance,
    BadSeq,
    InsufficientFee,
    Other,
}

/// Per-operation result data the protocol consumes. Only account-merge
/// results carry information the engine needs (the merged balance, for
/// top-up accounting); everything else is opaque.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpResult {
    AccountMerge { source_account_balance: Amount },
    Other,
}

/// The ledger's verdict on a submitted transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxResult {
    pub code: TxResultCode,
    pub op_results: Vec<OpResult>,
}

impl TxResult {
    pub fn success() -> Self {
        TxResult {
            code: TxResultCode::Success,
            op_results: Vec::new(),
        }
    }

    pub fn failed(code: TxResultCode) -> Self {
        TxResult {
            code,
            op_results: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == TxResultCode::Success
    }
}
