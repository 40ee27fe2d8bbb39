//! Starlight: a bilateral payment-channel protocol engine for a
//! Stellar-style account ledger.
//!
//! Two parties, host and guest, escrow funds in a shared account and
//! exchange signed but unsubmitted ratchet and settlement transactions,
//! updating a private balance split an unbounded number of times while
//! submitting only a handful of transactions to the ledger.
//!
//! This crate is the protocol core: the channel state machine, the
//! transaction templates, the detached-signature and peer-message
//! protocols, and the ledger-transaction classifier. Durable storage,
//! the ledger client, the retry queue, and the RPC surface are the
//! embedding driver's concern; the engine communicates with them only
//! through the [`fsm::Outputter`] sink and the updater's input/output
//! contract.

pub mod errors;
pub mod fsm;
pub mod key;
pub mod stellar;

pub use errors::{Error, Result};
