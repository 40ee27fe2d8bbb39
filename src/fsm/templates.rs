//! Transaction template builders.
//!
//! Each builder is a pure function of the channel (plus the wallet
//! where host-account sequence numbers matter) producing the exact
//! unsigned transaction both parties must independently reconstruct.
//! Neither party ever signs or trusts a transaction it received on the
//! wire; it always rebuilds the template from channel state and
//! compares, so any drift in operation order, fees, sequence numbers,
//! or time bounds here is a protocol break.

use crate::stellar::amount::{Amount, LUMEN, MILLILUMEN};
use crate::stellar::tx::{
    AccountId, Operation, OperationBody, SequenceNumber, SetOptions, Signer, TimeBounds,
    Transaction,
};

use super::channel::{Channel, WalletAcct};
use super::error::ProtocolError;

fn base_fee(rate: Amount, op_count: usize) -> Result<u32, ProtocolError> {
    let total = rate
        .as_stroops()
        .checked_mul(op_count as i64)
        .ok_or(ProtocolError::Overflow)?;
    u32::try_from(total).map_err(|_| ProtocolError::Overflow)
}

fn deadline(start: u64, delays: &[u64]) -> Result<u64, ProtocolError> {
    delays.iter().try_fold(start, |acc, d| {
        acc.checked_add(*d).ok_or(ProtocolError::Overflow)
    })
}

fn payment(source: AccountId, destination: AccountId, amount: Amount) -> Operation {
    Operation {
        source: Some(source),
        body: OperationBody::Payment {
            destination,
            amount,
        },
    }
}

fn merge(source: AccountId, destination: AccountId) -> Operation {
    Operation {
        source: Some(source),
        body: OperationBody::AccountMerge { destination },
    }
}

fn set_options(source: AccountId, opts: SetOptions) -> Operation {
    Operation {
        source: Some(source),
        body: OperationBody::SetOptions(opts),
    }
}

fn wallet_tx(
    ch: &Channel,
    seqnum: SequenceNumber,
    time_bounds: Option<TimeBounds>,
    operations: Vec<Operation>,
) -> Result<Transaction, ProtocolError> {
    Ok(Transaction {
        source: ch.host_acct,
        fee: base_fee(ch.host_feerate, operations.len())?,
        seq_num: seqnum,
        time_bounds,
        operations,
    })
}

fn escrow_tx(
    ch: &Channel,
    seqnum: SequenceNumber,
    time_bounds: Option<TimeBounds>,
    operations: Vec<Operation>,
) -> Result<Transaction, ProtocolError> {
    Ok(Transaction {
        source: ch.escrow_acct,
        fee: base_fee(ch.channel_feerate, operations.len())?,
        seq_num: seqnum,
        time_bounds,
        operations,
    })
}

/// One create-account operation funding `account` with 1 XLM,
/// fee-paid by the host.
pub fn build_setup_account_tx(
    ch: &Channel,
    account: AccountId,
    seqnum: SequenceNumber,
) -> Result<Transaction, ProtocolError> {
    wallet_tx(
        ch,
        seqnum,
        None,
        vec![Operation {
            source: None,
            body: OperationBody::CreateAccount {
                destination: account,
                starting_balance: LUMEN,
            },
        }],
    )
}

/// The settlement used when the guest's balance is zero: merge all
/// three channel accounts back into the host.
pub fn build_settle_only_with_host_tx(
    ch: &Channel,
    payment_time: u64,
) -> Result<Transaction, ProtocolError> {
    let min_time = deadline(
        payment_time,
        &[ch.finality_delay, ch.finality_delay, ch.max_round_duration],
    )?;
    escrow_tx(
        ch,
        ch.round_seq_num() + 2,
        Some(TimeBounds {
            min_time,
            max_time: 0,
        }),
        vec![
            merge(ch.escrow_acct, ch.host_acct),
            merge(ch.guest_ratchet_acct, ch.host_acct),
            merge(ch.host_ratchet_acct, ch.host_acct),
        ],
    )
}

/// A single bump-sequence on the escrow account, sourced from the
/// ratchet account being advanced. Confirming it invalidates all
/// settlement transactions from earlier rounds.
pub fn build_ratchet_tx(
    ch: &Channel,
    ledger_time: u64,
    account: AccountId,
    seqnum: SequenceNumber,
) -> Result<Transaction, ProtocolError> {
    let max_time = deadline(ledger_time, &[ch.finality_delay, ch.max_round_duration])?;
    Ok(Transaction {
        source: account,
        fee: base_fee(ch.channel_feerate, 1)?,
        seq_num: seqnum + 1,
        time_bounds: Some(TimeBounds {
            min_time: 0,
            max_time,
        }),
        operations: vec![Operation {
            source: Some(ch.escrow_acct),
            body: OperationBody::BumpSequence {
                bump_to: ch.round_seq_num() + 1,
            },
        }],
    })
}

/// The funding transaction: pays the escrow its balance plus reserve
/// and round fees, raises its thresholds to 2-of-2 with the guest as
/// co-signer, and funds and configures both ratchet accounts.
pub fn build_funding_tx(ch: &Channel, w: &WalletAcct) -> Result<Transaction, ProtocolError> {
    let max_time = deadline(
        ch.funding_time,
        &[ch.max_round_duration, ch.finality_delay],
    )?;
    wallet_tx(
        ch,
        w.seqnum,
        Some(TimeBounds {
            min_time: 0,
            max_time,
        }),
        vec![
            payment(
                ch.host_acct,
                ch.escrow_acct,
                ch.host_amount + MILLILUMEN * 500 + ch.channel_feerate * 8,
            ),
            set_options(
                ch.escrow_acct,
                SetOptions {
                    master_weight: None,
                    low_threshold: Some(2),
                    med_threshold: Some(2),
                    high_threshold: Some(2),
                    signer: Some(Signer {
                        key: ch.guest_acct,
                        weight: 1,
                    }),
                },
            ),
            payment(
                ch.host_acct,
                ch.guest_ratchet_acct,
                LUMEN + ch.channel_feerate,
            ),
            set_options(
                ch.guest_ratchet_acct,
                SetOptions {
                    master_weight: Some(0),
                    low_threshold: Some(2),
                    med_threshold: Some(2),
                    high_threshold: Some(2),
                    signer: Some(Signer {
                        key: ch.guest_acct,
                        weight: 1,
                    }),
                },
            ),
            set_options(
                ch.guest_ratchet_acct,
                SetOptions {
                    signer: Some(Signer {
                        key: ch.escrow_acct,
                        weight: 1,
                    }),
                    ..SetOptions::default()
                },
            ),
            payment(
                ch.host_acct,
                ch.host_ratchet_acct,
                MILLILUMEN * 500 + ch.channel_feerate,
            ),
            set_options(
                ch.host_ratchet_acct,
                SetOptions {
                    master_weight: Some(0),
                    signer: Some(Signer {
                        key: ch.escrow_acct,
                        weight: 1,
                    }),
                    ..SetOptions::default()
                },
            ),
        ],
    )
}

/// Pays the guest its balance out of escrow; the host's tail is merged
/// by the paired settle-with-host transaction one sequence later.
pub fn build_settle_with_guest_tx(
    ch: &Channel,
    payment_time: u64,
) -> Result<Transaction, ProtocolError> {
    let min_time = deadline(
        payment_time,
        &[ch.finality_delay, ch.finality_delay, ch.max_round_duration],
    )?;
    escrow_tx(
        ch,
        ch.round_seq_num() + 2,
        Some(TimeBounds {
            min_time,
            max_time: 0,
        }),
        vec![payment(ch.escrow_acct, ch.guest_acct, ch.guest_amount)],
    )
}

/// Merges all three channel accounts into the host, closing the
/// channel's remainder after settle-with-guest.
pub fn build_settle_with_host_tx(
    ch: &Channel,
    payment_time: u64,
) -> Result<Transaction, ProtocolError> {
    let min_time = deadline(
        payment_time,
        &[ch.finality_delay, ch.finality_delay, ch.max_round_duration],
    )?;
    escrow_tx(
        ch,
        ch.round_seq_num() + 3,
        Some(TimeBounds {
            min_time,
            max_time: 0,
        }),
        vec![
            merge(ch.escrow_acct, ch.host_acct),
            merge(ch.guest_ratchet_acct, ch.host_acct),
            merge(ch.host_ratchet_acct, ch.host_acct),
        ],
    )
}

/// The cooperative close: pays the guest (when it has a balance) and
/// merges everything into the host, at the sequence number right after
/// the base. Requires both parties' live signatures.
pub fn build_cooperative_close_tx(ch: &Channel) -> Result<Transaction, ProtocolError> {
    let mut operations = Vec::new();
    if ch.guest_amount > Amount::ZERO {
        operations.push(payment(ch.escrow_acct, ch.guest_acct, ch.guest_amount));
    }
    operations.push(merge(ch.escrow_acct, ch.host_acct));
    operations.push(merge(ch.guest_ratchet_acct, ch.host_acct));
    operations.push(merge(ch.host_ratchet_acct, ch.host_acct));
    escrow_tx(ch, ch.base_sequence_number + 1, None, operations)
}

/// Recovers setup/funding funds after a failed or timed-out open. When
/// funding timed out, the wallet's live sequence number has moved on,
/// so the recorded funding-tx sequence number is reused.
pub fn build_cleanup_tx(ch: &Channel, w: &WalletAcct) -> Result<Transaction, ProtocolError> {
    let seqnum = if ch.funding_timed_out {
        ch.funding_tx_seqnum
    } else {
        w.seqnum
    };
    wallet_tx(
        ch,
        seqnum,
        None,
        vec![
            merge(ch.escrow_acct, ch.host_acct),
            merge(ch.host_ratchet_acct, ch.host_acct),
            merge(ch.guest_ratchet_acct, ch.host_acct),
        ],
    )
}

/// A single wallet payment of the in-flight top-up amount into escrow.
pub fn build_top_up_tx(ch: &Channel, w: &WalletAcct) -> Result<Transaction, ProtocolError> {
    wallet_tx(
        ch,
        w.seqnum,
        None,
        vec![payment(ch.host_acct, ch.escrow_acct, ch.top_up_amount)],
    )
}
