//! Ledger-transaction classification.
//!
//! Confirmed or failed transactions from the ledger stream are matched
//! structurally against locally-reconstructed templates; the ledger's
//! copy is never trusted beyond "this occurred/failed". Matchers run in
//! a fixed order and the first structural match wins. An unmatched
//! transaction is a protocol violation or a bug, never silently
//! ignored.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::stellar::amount::{Amount, LUMEN, MILLILUMEN};
use crate::stellar::tx::{
    AccountId, Operation, OperationBody, OpResult, SequenceNumber, Signer, SetOptions,
    Transaction, TransactionEnvelope, TxResult,
};

use super::channel::{Channel, ChannelState, Role};
use super::error::ProtocolError;
use super::output::Outputter;
use super::updater::Updater;

/// A transaction as it appeared on the ledger, with its result and
/// stream metadata. The metadata fields may be absent for failed
/// transactions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerTx {
    pub env: TransactionEnvelope,
    pub result: TxResult,
    /// Paging token, the driver's cursor into the ledger stream.
    pub paging_token: String,
    pub ledger_num: u32,
    /// Ledger close time, unix seconds.
    pub ledger_time: u64,
}

fn create_account_op(src: AccountId, dest: AccountId, balance: Amount) -> Operation {
    Operation {
        source: Some(src),
        body: OperationBody::CreateAccount {
            destination: dest,
            starting_balance: balance,
        },
    }
}

fn payment_op(src: AccountId, dest: AccountId, amount: Amount) -> Operation {
    Operation {
        source: Some(src),
        body: OperationBody::Payment {
            destination: dest,
            amount,
        },
    }
}

fn merge_op(src: AccountId, dest: AccountId) -> Operation {
    Operation {
        source: Some(src),
        body: OperationBody::AccountMerge { destination: dest },
    }
}

fn op_has_src(tx: &Transaction, op: &Operation, want: AccountId) -> bool {
    op.effective_source(tx) == want
}

/// Structural comparison of an incoming transaction against an expected
/// source account and operation list. Expected operation sources are
/// compared with effective-source resolution, so an omitted source on
/// the wire still matches when it resolves to the expected account.
fn tx_matches(tx: &Transaction, src: AccountId, ops: &[Operation]) -> bool {
    if tx.operations.len() != ops.len() {
        return false;
    }
    if tx.source != src {
        return false;
    }
    tx.operations.iter().zip(ops).all(|(got, want)| {
        if let Some(want_src) = want.source {
            if !op_has_src(tx, got, want_src) {
                return false;
            }
        }
        got.body == want.body
    })
}

/// Whether `tx` is the funding transaction for the channel.
pub fn matches_funding_tx(ch: &Channel, tx: &Transaction) -> bool {
    tx_matches(
        tx,
        ch.host_acct,
        &[
            payment_op(
                ch.host_acct,
                ch.escrow_acct,
                ch.host_amount + MILLILUMEN * 500 + ch.channel_feerate * 8,
            ),
            Operation {
                source: Some(ch.escrow_acct),
                body: OperationBody::SetOptions(SetOptions {
                    master_weight: None,
                    low_threshold: Some(2),
                    med_threshold: Some(2),
                    high_threshold: Some(2),
                    signer: Some(Signer {
                        key: ch.guest_acct,
                        weight: 1,
                    }),
                }),
            },
            payment_op(ch.host_acct, ch.guest_ratchet_acct, LUMEN + ch.channel_feerate),
            Operation {
                source: Some(ch.guest_ratchet_acct),
                body: OperationBody::SetOptions(SetOptions {
                    master_weight: Some(0),
                    low_threshold: Some(2),
                    med_threshold: Some(2),
                    high_threshold: Some(2),
                    signer: Some(Signer {
                        key: ch.guest_acct,
                        weight: 1,
                    }),
                }),
            },
            Operation {
                source: Some(ch.guest_ratchet_acct),
                body: OperationBody::SetOptions(SetOptions {
                    signer: Some(Signer {
                        key: ch.escrow_acct,
                        weight: 1,
                    }),
                    ..SetOptions::default()
                }),
            },
            payment_op(
                ch.host_acct,
                ch.host_ratchet_acct,
                MILLILUMEN * 500 + ch.channel_feerate,
            ),
            Operation {
                source: Some(ch.host_ratchet_acct),
                body: OperationBody::SetOptions(SetOptions {
                    master_weight: Some(0),
                    signer: Some(Signer {
                        key: ch.escrow_acct,
                        weight: 1,
                    }),
                    ..SetOptions::default()
                }),
            },
        ],
    )
}

impl<'a, O: Outputter> Updater<'a, O> {
    /// Runs the incoming transaction through the classifier chain.
    /// Returns `NoMatch` if no handler recognizes it.
    pub(super) fn apply_tx(&mut self, tx: &LedgerTx) -> Result<(), ProtocolError> {
        info!(
            channel_id = %self.channel.id,
            source = %tx.env.tx.source,
            seq_num = tx.env.tx.seq_num,
            success = tx.result.is_success(),
            "received ledger tx"
        );
        let success = tx.result.is_success();
        if !tx.paging_token.is_empty() {
            self.channel.cursor = tx.paging_token.clone();
        }

        let handlers: [fn(&mut Self, &LedgerTx, bool) -> Result<bool, ProtocolError>; 8] = [
            Self::handle_coop_close_tx,
            Self::handle_settle_cleanup_tx,
            Self::handle_funding_tx,
            Self::handle_ratchet_tx,
            Self::handle_settle_with_guest_tx,
            Self::handle_settle_with_host_tx,
            Self::handle_setup_account_tx,
            Self::handle_top_up_tx,
        ];
        for handler in handlers {
            if handler(self, tx, success)? {
                return Ok(());
            }
        }
        Err(ProtocolError::NoMatch)
    }

    fn handle_coop_close_tx(
        &mut self,
        tx: &LedgerTx,
        success: bool,
    ) -> Result<bool, ProtocolError> {
        // A coop close with a zero guest balance has no payment op and
        // is matched by the settle-with-host handler instead.
        if !tx_matches(
            &tx.env.tx,
            self.channel.escrow_acct,
            &[
                payment_op(
                    self.channel.escrow_acct,
                    self.channel.guest_acct,
                    self.channel.guest_amount,
                ),
                merge_op(self.channel.escrow_acct, self.channel.host_acct),
                merge_op(self.channel.guest_ratchet_acct, self.channel.host_acct),
                merge_op(self.channel.host_ratchet_acct, self.channel.host_acct),
            ],
        ) {
            return Ok(false);
        }
        if self.channel.state != ChannelState::AwaitingClose {
            return Err(ProtocolError::UnexpectedState {
                got: self.channel.state,
                want: "AwaitingClose",
            });
        }
        if !success {
            self.set_force_close_state()?;
            return Ok(true);
        }
        self.transition_to(ChannelState::Closed)?;
        Ok(true)
    }

    fn handle_settle_cleanup_tx(
        &mut self,
        tx: &LedgerTx,
        _success: bool,
    ) -> Result<bool, ProtocolError> {
        if !tx_matches(
            &tx.env.tx,
            self.channel.host_acct,
            &[
                merge_op(self.channel.escrow_acct, self.channel.host_acct),
                merge_op(self.channel.host_ratchet_acct, self.channel.host_acct),
                merge_op(self.channel.guest_ratchet_acct, self.channel.host_acct),
            ],
        ) {
            return Ok(false);
        }
        self.transition_to(ChannelState::Closed)?;
        Ok(true)
    }

    fn handle_funding_tx(&mut self, tx: &LedgerTx, success: bool) -> Result<bool, ProtocolError> {
        if !matches_funding_tx(self.channel, &tx.env.tx) {
            return Ok(false);
        }
        if self.channel.state != ChannelState::AwaitingFunding {
            return Err(ProtocolError::UnexpectedState {
                got: self.channel.state,
                want: "AwaitingFunding",
            });
        }
        if !success {
            if self.channel.role == Role::Host {
                // Host gets back the total funding tx-related amount.
                self.wallet.balance += self.channel.total_funding_tx_amount();
                self.wallet.seqnum += 1;
                self.transition_to(ChannelState::AwaitingCleanup)?;
                return Ok(true);
            }
            self.transition_to(ChannelState::Closed)?;
            return Ok(true);
        }
        self.transition_to(ChannelState::Open)?;
        Ok(true)
    }

    fn handle_ratchet_tx(&mut self, tx: &LedgerTx, success: bool) -> Result<bool, ProtocolError> {
        let t = &tx.env.tx;
        for role in [Role::Host, Role::Guest] {
            let ratchet_acct = match role {
                Role::Host => self.channel.host_ratchet_acct,
                Role::Guest => self.channel.guest_ratchet_acct,
            };
            if t.source != ratchet_acct {
                continue;
            }
            if t.operations.len() != 1 {
                continue;
            }
            let op = &t.operations[0];
            let bump_to = match op.body {
                OperationBody::BumpSequence { bump_to } => bump_to,
                _ => continue,
            };
            if !op_has_src(t, op, self.channel.escrow_acct) {
                continue;
            }

            // It's a ratchet tx.
            if self.channel.role == role {
                // Ours. Failure here means the engine or the ledger
                // client misbehaved; there is no in-protocol recovery.
                if !success {
                    return Err(ProtocolError::RatchetTxFailed);
                }
                self.transition_to(ChannelState::AwaitingSettlementMintime)?;
                return Ok(true);
            }

            // The counterparty's ratchet tx.
            if !success {
                // Theirs failed; publish ours.
                self.set_force_close_state()?;
                return Ok(true);
            }
            let expected = self.channel.round_seq_num() + 1;
            if bump_to < expected {
                // Outdated; our cached pair still wins.
                warn!(bump_to, expected, "counterparty published an outdated ratchet tx");
                self.set_force_close_state()?;
                return Ok(true);
            }
            if bump_to > expected {
                // Newer than expected: adopt the settlement pair they
                // can enforce.
                self.channel.current_settle_with_guest_tx = self
                    .channel
                    .counterparty_latest_settle_with_guest_tx
                    .clone();
                self.channel.current_settle_with_host_tx = self
                    .channel
                    .counterparty_latest_settle_with_host_tx
                    .clone();
                if self.channel.state == ChannelState::AwaitingSettlement {
                    self.transition_to(ChannelState::AwaitingSettlementMintime)?;
                }
                return Ok(true);
            }
            if self.channel.role == Role::Guest && self.channel.guest_amount.is_zero() {
                self.set_force_close_state()?;
                return Ok(true);
            }
            // Exactly the current round's ratchet.
            self.transition_to(ChannelState::AwaitingSettlementMintime)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn handle_settle_with_guest_tx(
        &mut self,
        tx: &LedgerTx,
        _success: bool,
    ) -> Result<bool, ProtocolError> {
        let t = &tx.env.tx;
        if t.source != self.channel.escrow_acct {
            return Ok(false);
        }
        if t.operations.len() != 1 {
            return Ok(false);
        }
        let op = &t.operations[0];
        let destination = match op.body {
            // The amount is deliberately not checked: any escrow
            // payment to the guest at this point is a settlement.
            OperationBody::Payment { destination, .. } => destination,
            _ => return Ok(false),
        };
        if !op_has_src(t, op, self.channel.escrow_acct) {
            return Ok(false);
        }
        if destination != self.channel.guest_acct {
            return Ok(false);
        }
        if self.channel.state != ChannelState::AwaitingSettlement {
            return Err(ProtocolError::UnexpectedState {
                got: self.channel.state,
                want: "AwaitingSettlement",
            });
        }
        // Stay in AwaitingSettlement until settle-with-host lands.
        Ok(true)
    }

    /// Also matches the round-1 settle-only-with-host transaction.
    fn handle_settle_with_host_tx(
        &mut self,
        tx: &LedgerTx,
        _success: bool,
    ) -> Result<bool, ProtocolError> {
        if !tx_matches(
            &tx.env.tx,
            self.channel.escrow_acct,
            &[
                merge_op(self.channel.escrow_acct, self.channel.host_acct),
                merge_op(self.channel.guest_ratchet_acct, self.channel.host_acct),
                merge_op(self.channel.host_ratchet_acct, self.channel.host_acct),
            ],
        ) {
            return Ok(false);
        }
        self.transition_to(ChannelState::Closed)?;
        Ok(true)
    }

    fn handle_setup_account_tx(
        &mut self,
        tx: &LedgerTx,
        success: bool,
    ) -> Result<bool, ProtocolError> {
        let t = &tx.env.tx;
        // The two ratchet-account setups need no state change.
        if tx_matches(
            t,
            self.channel.host_acct,
            &[create_account_op(
                self.channel.host_acct,
                self.channel.host_ratchet_acct,
                LUMEN,
            )],
        ) || tx_matches(
            t,
            self.channel.host_acct,
            &[create_account_op(
                self.channel.host_acct,
                self.channel.guest_ratchet_acct,
                LUMEN,
            )],
        ) {
            return Ok(true);
        }
        if !tx_matches(
            t,
            self.channel.host_acct,
            &[create_account_op(
                self.channel.host_acct,
                self.channel.escrow_acct,
                LUMEN,
            )],
        ) {
            return Ok(false);
        }

        if !success {
            // Unreserve the escrow account's lumen.
            self.wallet.balance += LUMEN;
        }

        if self.channel.role == Role::Guest && self.channel.state == ChannelState::AwaitingFunding
        {
            return Ok(true);
        }
        if self.channel.state != ChannelState::SettingUp {
            return Err(ProtocolError::UnexpectedState {
                got: self.channel.state,
                want: "SettingUp",
            });
        }

        // The account's starting sequence number is the ledger number
        // of the transaction that created it, shifted left 32 bits.
        self.channel.base_sequence_number = (tx.ledger_num as SequenceNumber) << 32;
        self.channel.funding_time = tx.ledger_time;
        self.channel.payment_time = tx.ledger_time;
        self.transition_to(ChannelState::ChannelProposed)?;
        Ok(true)
    }

    /// The only fuzzy matcher: any payment or merge crediting the
    /// escrow account counts toward the top-up amount, regardless of
    /// transaction shape.
    fn handle_top_up_tx(&mut self, tx: &LedgerTx, success: bool) -> Result<bool, ProtocolError> {
        let t = &tx.env.tx;
        let mut amount: i64 = 0;
        for (index, op) in t.operations.iter().enumerate() {
            match op.body {
                OperationBody::Payment {
                    destination,
                    amount: paid,
                } => {
                    if destination != self.channel.escrow_acct {
                        continue;
                    }
                    amount = amount
                        .checked_add(paid.as_stroops())
                        .ok_or(ProtocolError::Overflow)?;
                }
                OperationBody::AccountMerge { destination } => {
                    if destination != self.channel.escrow_acct {
                        continue;
                    }
                    let merged = match tx.result.op_results.get(index) {
                        Some(OpResult::AccountMerge {
                            source_account_balance,
                        }) => *source_account_balance,
                        _ => continue,
                    };
                    amount = amount
                        .checked_add(merged.as_stroops())
                        .ok_or(ProtocolError::Overflow)?;
                }
                _ => continue,
            }
        }
        if amount <= 0 {
            return Ok(false);
        }
        if !success {
            return Ok(true);
        }
        self.channel.host_amount = self
            .channel
            .host_amount
            .checked_add(Amount::from_stroops(amount))
            .ok_or(ProtocolError::Overflow)?;
        self.channel.top_up_amount = Amount::ZERO;
        Ok(true)
    }
}
