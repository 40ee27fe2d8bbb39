use thiserror::Error;

use crate::stellar::amount::Amount;
use crate::stellar::strkey::StrkeyError;

use super::channel::ChannelState;

/// Errors surfaced by the channel state machine. The driver must treat
/// any error as "discard the mutated channel and wallet", since a
/// failed transition may leave them partially updated.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unexpected state: got {got}, want {want}")]
    UnexpectedState {
        got: ChannelState,
        want: &'static str,
    },

    #[error("unexpected role")]
    UnexpectedRole,

    #[error("insufficient funds: balance {balance}")]
    InsufficientFunds { balance: Amount },

    #[error("top-up currently being submitted")]
    TopUpInProgress,

    #[error("received channel propose message for channel that already exists")]
    ChannelExists,

    /// The channel exists but is being torn down; the counterparty
    /// should retry its proposal once cleanup completes.
    #[error("channel exists, retry after cleanup")]
    ChannelExistsRetriable,

    #[error("invalid version number")]
    InvalidVersion,

    #[error("invalid signature on {0}")]
    InvalidSignature(&'static str),

    #[error("unused settle with guest sig")]
    UnusedSettleWithGuestSig,

    #[error("arithmetic overflow")]
    Overflow,

    #[error("did not recognize transaction")]
    NoMatch,

    #[error("seed required")]
    NoSeed,

    #[error("no cached {0} transaction")]
    NoCachedTx(&'static str),

    /// A ratchet transaction we ourselves published came back failed.
    /// That can only happen if the engine or the ledger client is
    /// broken, so it is not recoverable in-protocol.
    #[error("submitted ratchet tx failed")]
    RatchetTxFailed,

    #[error("message encoding: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error(transparent)]
    Strkey(#[from] StrkeyError),
}
