//! Side-effect accumulation.
//!
//! The state machine never performs I/O. Messages to the peer and
//! transactions for the ledger are appended to an [`Outputter`]; the
//! driver drains them into its retry queue after persisting the
//! mutated channel.

use tracing::debug;

use crate::key::PRIMARY_ACCOUNT_INDEX;
use crate::stellar::tx::{SequenceNumber, TransactionEnvelope};

use super::channel::{Channel, Role, WalletAcct};
use super::error::ProtocolError;
use super::msg::{
    ChannelAcceptPayload, ChannelMessage, ChannelProposePayload, ClosePayload, MessageBody,
    PaymentAcceptPayload, PaymentCompletePayload, PaymentProposePayload,
};
use super::sig::{detached_sig, sign_tx};
use super::templates::{
    build_cleanup_tx, build_cooperative_close_tx, build_funding_tx, build_ratchet_tx,
    build_settle_only_with_host_tx, build_settle_with_guest_tx, build_settle_with_host_tx,
    build_setup_account_tx, build_top_up_tx,
};

/// Accumulates side effects to be executed by the driver: messages to
/// send to the peer and transactions to publish to the ledger.
pub trait Outputter {
    fn output_msg(&mut self, msg: ChannelMessage);
    fn output_tx(&mut self, env: TransactionEnvelope);
}

/// Queues effects in memory for the driver to drain.
#[derive(Debug, Default)]
pub struct MemoryOutputter {
    pub msgs: Vec<ChannelMessage>,
    pub txs: Vec<TransactionEnvelope>,
}

impl MemoryOutputter {
    pub fn new() -> Self {
        MemoryOutputter::default()
    }
}

impl Outputter for MemoryOutputter {
    fn output_msg(&mut self, msg: ChannelMessage) {
        debug!(channel_id = %msg.channel_id, "queued outgoing message");
        self.msgs.push(msg);
    }

    fn output_tx(&mut self, env: TransactionEnvelope) {
        debug!(source = %env.tx.source, seq_num = env.tx.seq_num, "queued outgoing tx");
        self.txs.push(env);
    }
}

/// Discards all effects.
#[derive(Debug, Default)]
pub struct NullOutputter;

impl Outputter for NullOutputter {
    fn output_msg(&mut self, _msg: ChannelMessage) {}
    fn output_tx(&mut self, _env: TransactionEnvelope) {}
}

pub(super) fn publish_funding_tx<O: Outputter>(
    seed: &[u8],
    ch: &mut Channel,
    o: &mut O,
    w: &WalletAcct,
) -> Result<(), ProtocolError> {
    let tx = build_funding_tx(ch, w)?;
    ch.funding_tx_seqnum = w.seqnum;
    let env = sign_tx(
        tx,
        seed,
        &ch.passphrase,
        &[
            PRIMARY_ACCOUNT_INDEX,
            ch.key_index,
            ch.key_index + 1,
            ch.key_index + 2,
        ],
    );
    o.output_tx(env);
    Ok(())
}

pub(super) fn publish_cleanup_tx<O: Outputter>(
    seed: &[u8],
    ch: &Channel,
    o: &mut O,
    w: &WalletAcct,
) -> Result<(), ProtocolError> {
    let tx = build_cleanup_tx(ch, w)?;
    let env = sign_tx(
        tx,
        seed,
        &ch.passphrase,
        &[
            PRIMARY_ACCOUNT_INDEX,
            ch.key_index,
            ch.key_index + 1,
            ch.key_index + 2,
        ],
    );
    o.output_tx(env);
    Ok(())
}

pub(super) fn publish_coop_close_tx<O: Outputter>(
    seed: &[u8],
    ch: &Channel,
    o: &mut O,
) -> Result<(), ProtocolError> {
    let tx = build_cooperative_close_tx(ch)?;
    let my_sig = detached_sig(&tx, seed, &ch.passphrase, ch.key_index);
    let counterparty_sig = ch
        .counterparty_coop_close_sig
        .clone()
        .ok_or(ProtocolError::NoCachedTx("cooperative close"))?;
    o.output_tx(TransactionEnvelope {
        tx,
        signatures: vec![my_sig, counterparty_sig],
    });
    Ok(())
}

pub(super) fn publish_top_up_tx<O: Outputter>(
    seed: &[u8],
    ch: &Channel,
    o: &mut O,
    w: &WalletAcct,
) -> Result<(), ProtocolError> {
    let tx = build_top_up_tx(ch, w)?;
    let env = sign_tx(tx, seed, &ch.passphrase, &[PRIMARY_ACCOUNT_INDEX]);
    o.output_tx(env);
    Ok(())
}

/// Publishes the three account-creation transactions against the
/// wallet's three reserved sequence numbers: host ratchet, guest
/// ratchet, escrow.
pub(super) fn publish_setup_account_txs<O: Outputter>(
    seed: &[u8],
    ch: &Channel,
    o: &mut O,
    w: &WalletAcct,
) -> Result<(), ProtocolError> {
    let accounts = [
        (ch.host_ratchet_acct, w.seqnum - 2),
        (ch.guest_ratchet_acct, w.seqnum - 1),
        (ch.escrow_acct, w.seqnum),
    ];
    for (account, seqnum) in accounts {
        let tx = build_setup_account_tx(ch, account, seqnum)?;
        o.output_tx(sign_tx(tx, seed, &ch.passphrase, &[PRIMARY_ACCOUNT_INDEX]));
    }
    Ok(())
}

fn ratchet_source(ch: &Channel) -> (crate::stellar::tx::AccountId, SequenceNumber) {
    match ch.role {
        Role::Guest => (ch.guest_ratchet_acct, ch.guest_ratchet_acct_seq_num),
        Role::Host => (ch.host_ratchet_acct, ch.host_ratchet_acct_seq_num),
    }
}

pub(super) fn create_channel_propose_msg(
    seed: &[u8],
    ch: &Channel,
    w: &WalletAcct,
) -> Result<ChannelMessage, ProtocolError> {
    let body = MessageBody::ChannelPropose(ChannelProposePayload {
        host_acct: ch.host_acct,
        guest_acct: ch.guest_acct,
        host_ratchet_acct: ch.host_ratchet_acct,
        guest_ratchet_acct: ch.guest_ratchet_acct,
        max_round_duration: ch.max_round_duration,
        finality_delay: ch.finality_delay,
        base_sequence_number: ch.base_sequence_number,
        host_amount: ch.host_amount,
        feerate: ch.channel_feerate,
        funding_time: ch.funding_time,
        counterparty_address: w.address.clone(),
    });
    ChannelMessage::sign(ch.id.clone(), body, seed, ch.key_index)
}

pub(super) fn send_channel_propose_msg<O: Outputter>(
    seed: &[u8],
    ch: &Channel,
    o: &mut O,
    w: &WalletAcct,
) -> Result<(), ProtocolError> {
    o.output_msg(create_channel_propose_msg(seed, ch, w)?);
    Ok(())
}

pub(super) fn create_channel_accept_msg(
    seed: &[u8],
    ch: &Channel,
) -> Result<ChannelMessage, ProtocolError> {
    let settle_only_with_host_tx = build_settle_only_with_host_tx(ch, ch.funding_time)?;
    let settle_sig = detached_sig(&settle_only_with_host_tx, seed, &ch.passphrase, ch.key_index);
    let ratchet_tx = build_ratchet_tx(
        ch,
        ch.funding_time,
        ch.host_ratchet_acct,
        ch.host_ratchet_acct_seq_num,
    )?;
    let ratchet_sig = detached_sig(&ratchet_tx, seed, &ch.passphrase, ch.key_index);
    let body = MessageBody::ChannelAccept(ChannelAcceptPayload {
        guest_ratchet_round1_sig: ratchet_sig,
        guest_settle_only_with_host_sig: settle_sig,
    });
    ChannelMessage::sign(ch.id.clone(), body, seed, ch.key_index)
}

pub(super) fn send_channel_accept_msg<O: Outputter>(
    seed: &[u8],
    ch: &Channel,
    o: &mut O,
) -> Result<(), ProtocolError> {
    o.output_msg(create_channel_accept_msg(seed, ch)?);
    Ok(())
}

/// Builds the sender's half of a new round: signatures over the
/// settlement pair reflecting the post-payment balance split.
pub(super) fn create_payment_propose_msg(
    seed: &[u8],
    ch: &Channel,
) -> Result<ChannelMessage, ProtocolError> {
    // Shift the balances on a scratch copy so the settlement templates
    // reflect the proposed split.
    let mut ch2 = ch.clone();
    match ch.role {
        Role::Guest => {
            ch2.guest_amount = ch.guest_amount - ch.pending_amount_sent;
            ch2.host_amount = ch.host_amount + ch.pending_amount_sent;
        }
        Role::Host => {
            ch2.host_amount = ch.host_amount - ch.pending_amount_sent;
            ch2.guest_amount = ch.guest_amount + ch.pending_amount_sent;
        }
    }

    let (settle_with_guest_sig, settle_with_host_sig) = if ch2.guest_amount.is_zero() {
        let tx = build_settle_only_with_host_tx(&ch2, ch2.pending_payment_time)?;
        (
            None,
            detached_sig(&tx, seed, &ch2.passphrase, ch2.key_index),
        )
    } else {
        let guest_tx = build_settle_with_guest_tx(&ch2, ch2.pending_payment_time)?;
        let host_tx = build_settle_with_host_tx(&ch2, ch2.pending_payment_time)?;
        (
            Some(detached_sig(&guest_tx, seed, &ch2.passphrase, ch2.key_index)),
            detached_sig(&host_tx, seed, &ch2.passphrase, ch2.key_index),
        )
    };

    let body = MessageBody::PaymentPropose(PaymentProposePayload {
        round_number: ch2.round_number,
        payment_time: ch2.pending_payment_time,
        payment_amount: ch2.pending_amount_sent,
        sender_settle_with_guest_sig: settle_with_guest_sig,
        sender_settle_with_host_sig: settle_with_host_sig,
    });
    ChannelMessage::sign(ch2.id, body, seed, ch.key_index)
}

pub(super) fn send_payment_propose_msg<O: Outputter>(
    seed: &[u8],
    ch: &Channel,
    o: &mut O,
) -> Result<(), ProtocolError> {
    o.output_msg(create_payment_propose_msg(seed, ch)?);
    Ok(())
}

/// Builds the recipient's half of a round: signatures over the new
/// ratchet transaction and the sender's settlement pair.
pub(super) fn create_payment_accept_msg(
    seed: &[u8],
    ch: &Channel,
) -> Result<ChannelMessage, ProtocolError> {
    let (ratchet_acct, ratchet_seqnum) = ratchet_source(ch);
    let ratchet_tx = build_ratchet_tx(ch, ch.pending_payment_time, ratchet_acct, ratchet_seqnum)?;
    let ratchet_sig = detached_sig(&ratchet_tx, seed, &ch.passphrase, ch.key_index);

    let new_guest_amount = match ch.role {
        Role::Guest => ch.guest_amount + ch.pending_amount_received,
        Role::Host => ch.guest_amount - ch.pending_amount_received,
    };

    let settle_with_guest_sig = if new_guest_amount.is_zero() {
        None
    } else {
        let env = ch
            .counterparty_latest_settle_with_guest_tx
            .as_ref()
            .ok_or(ProtocolError::NoCachedTx("settle with guest"))?;
        Some(detached_sig(&env.tx, seed, &ch.passphrase, ch.key_index))
    };
    let host_env = ch
        .counterparty_latest_settle_with_host_tx
        .as_ref()
        .ok_or(ProtocolError::NoCachedTx("settle with host"))?;
    let settle_with_host_sig = detached_sig(&host_env.tx, seed, &ch.passphrase, ch.key_index);

    let body = MessageBody::PaymentAccept(PaymentAcceptPayload {
        round_number: ch.round_number,
        recipient_ratchet_sig: ratchet_sig,
        recipient_settle_with_guest_sig: settle_with_guest_sig,
        recipient_settle_with_host_sig: settle_with_host_sig,
    });
    ChannelMessage::sign(ch.id.clone(), body, seed, ch.key_index)
}

pub(super) fn send_payment_accept_msg<O: Outputter>(
    seed: &[u8],
    ch: &Channel,
    o: &mut O,
) -> Result<(), ProtocolError> {
    o.output_msg(create_payment_accept_msg(seed, ch)?);
    Ok(())
}

/// The sender's final signature on the now fully-agreed ratchet tx.
pub(super) fn create_payment_complete_msg(
    seed: &[u8],
    ch: &Channel,
) -> Result<ChannelMessage, ProtocolError> {
    let (ratchet_acct, ratchet_seqnum) = ratchet_source(ch);
    let ratchet_tx = build_ratchet_tx(ch, ch.pending_payment_time, ratchet_acct, ratchet_seqnum)?;
    let ratchet_sig = detached_sig(&ratchet_tx, seed, &ch.passphrase, ch.key_index);
    let body = MessageBody::PaymentComplete(PaymentCompletePayload {
        round_number: ch.round_number,
        sender_ratchet_sig: ratchet_sig,
    });
    ChannelMessage::sign(ch.id.clone(), body, seed, ch.key_index)
}

pub(super) fn send_payment_complete_msg<O: Outputter>(
    seed: &[u8],
    ch: &Channel,
    o: &mut O,
) -> Result<(), ProtocolError> {
    o.output_msg(create_payment_complete_msg(seed, ch)?);
    Ok(())
}

pub(super) fn create_close_msg(
    seed: &[u8],
    ch: &Channel,
) -> Result<ChannelMessage, ProtocolError> {
    let coop_close_tx = build_cooperative_close_tx(ch)?;
    let sig = detached_sig(&coop_close_tx, seed, &ch.passphrase, ch.key_index);
    let body = MessageBody::Close(ClosePayload {
        cooperative_close_sig: sig,
    });
    ChannelMessage::sign(ch.id.clone(), body, seed, ch.key_index)
}

pub(super) fn send_close_msg<O: Outputter>(
    seed: &[u8],
    ch: &Channel,
    o: &mut O,
) -> Result<(), ProtocolError> {
    o.output_msg(create_close_msg(seed, ch)?);
    Ok(())
}
