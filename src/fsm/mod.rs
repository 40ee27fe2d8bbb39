//! The channel protocol engine: the state machine that drives a
//! bilateral payment channel through its lifecycle, the transaction
//! templates both parties must reconstruct byte-for-byte, the detached
//! signature and message protocols that authorize them, and the
//! classifier that recognizes confirmed ledger transactions as
//! state-machine inputs.
//!
//! Transactions are never passed around on the wire to be inspected and
//! signed. Each party only ever signs transactions it reconstructed
//! itself from channel state, so a flaw in inspection logic can never
//! be exploited to sneak in an extra operation.

pub mod channel;
pub mod command;
pub mod error;
pub mod msg;
pub mod output;
pub mod sig;
pub mod templates;
pub mod timer;
pub mod tx;
pub mod updater;

#[cfg(test)]
mod tests;

pub use channel::{Channel, ChannelState, HostChannelConfig, Role, WalletAcct};
pub use command::Command;
pub use error::ProtocolError;
pub use msg::{
    resolve_propose_conflict, ChannelMessage, MessageBody, ProposeConflict, PROTOCOL_VERSION,
};
pub use output::{MemoryOutputter, NullOutputter, Outputter};
pub use tx::{matches_funding_tx, LedgerTx};
pub use updater::{Input, Updater};
