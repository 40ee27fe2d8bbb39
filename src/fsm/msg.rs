//! The peer message protocol: six authenticated message variants and
//! the handlers that consume them.
//!
//! Every handler re-derives the transaction templates it expects from
//! current channel state and verifies each supplied signature against
//! the counterparty's key before mutating anything. Stale or duplicate
//! messages that are expected under normal retransmission are dropped
//! with a log line; actual protocol violations return typed errors.

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use tracing::{debug, warn};

use crate::key::KeyPair;
use crate::stellar::amount::Amount;
use crate::stellar::tx::{AccountId, DecoratedSignature, SequenceNumber};

use super::channel::{Channel, ChannelState, Role};
use super::error::ProtocolError;
use super::output::Outputter;
use super::sig::verify_sig;
use super::templates::{
    build_cooperative_close_tx, build_ratchet_tx, build_settle_only_with_host_tx,
    build_settle_with_guest_tx, build_settle_with_host_tx,
};
use super::updater::Updater;

/// Wire protocol version; mismatched messages are rejected outright.
pub const PROTOCOL_VERSION: u32 = 1;

/// Terms of a proposed channel, sent by the prospective host.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelProposePayload {
    pub host_acct: AccountId,
    pub guest_acct: AccountId,
    pub host_ratchet_acct: AccountId,
    pub guest_ratchet_acct: AccountId,
    pub max_round_duration: u64,
    pub finality_delay: u64,
    pub base_sequence_number: SequenceNumber,
    pub host_amount: Amount,
    pub feerate: Amount,
    pub funding_time: u64,
    pub counterparty_address: String,
}

/// The guest's co-signatures on the round-1 ratchet and settlement
/// templates, accepting a proposal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelAcceptPayload {
    pub guest_ratchet_round1_sig: DecoratedSignature,
    pub guest_settle_only_with_host_sig: DecoratedSignature,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentProposePayload {
    pub round_number: u64,
    pub payment_time: u64,
    pub payment_amount: Amount,
    pub sender_settle_with_guest_sig: Option<DecoratedSignature>,
    pub sender_settle_with_host_sig: DecoratedSignature,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentAcceptPayload {
    pub round_number: u64,
    pub recipient_ratchet_sig: DecoratedSignature,
    pub recipient_settle_with_guest_sig: Option<DecoratedSignature>,
    pub recipient_settle_with_host_sig: DecoratedSignature,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentCompletePayload {
    pub round_number: u64,
    pub sender_ratchet_sig: DecoratedSignature,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClosePayload {
    pub cooperative_close_sig: DecoratedSignature,
}

/// Exactly one payload per message; "more than one payload set" is
/// unrepresentable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MessageBody {
    ChannelPropose(ChannelProposePayload),
    ChannelAccept(ChannelAcceptPayload),
    PaymentPropose(PaymentProposePayload),
    PaymentAccept(PaymentAcceptPayload),
    PaymentComplete(PaymentCompletePayload),
    Close(ClosePayload),
}

impl MessageBody {
    /// The bytes the message signature covers: the JSON encoding of the
    /// active payload alone.
    pub fn to_sign_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            MessageBody::ChannelPropose(p) => serde_json::to_vec(p),
            MessageBody::ChannelAccept(p) => serde_json::to_vec(p),
            MessageBody::PaymentPropose(p) => serde_json::to_vec(p),
            MessageBody::PaymentAccept(p) => serde_json::to_vec(p),
            MessageBody::PaymentComplete(p) => serde_json::to_vec(p),
            MessageBody::Close(p) => serde_json::to_vec(p),
        }
    }
}

/// An authenticated protocol message between channel endpoints.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub channel_id: String,
    pub version: u32,
    pub body: MessageBody,
    /// Signature by the sender's channel key over the active payload.
    #[serde_as(as = "serde_with::hex::Hex")]
    pub signature: Vec<u8>,
}

impl ChannelMessage {
    /// Builds and signs a message with the derived key at `index`.
    pub fn sign(
        channel_id: String,
        body: MessageBody,
        seed: &[u8],
        index: u32,
    ) -> Result<ChannelMessage, ProtocolError> {
        let bytes = body.to_sign_bytes()?;
        let signature = KeyPair::derive(seed, index).sign(&bytes).to_vec();
        Ok(ChannelMessage {
            channel_id,
            version: PROTOCOL_VERSION,
            body,
            signature,
        })
    }
}

/// How a guest should handle a channel proposal that collides with a
/// channel it already tracks for the same pair of parties.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProposeConflict {
    /// Our side is mid-setup or mid-cleanup; the proposer should retry.
    Retry,
    /// The incoming proposal wins the tie-break; clean up our own
    /// proposed channel, then have the proposer retry.
    CleanUpAndRetry,
    /// Our channel takes precedence (or is already live); reject.
    Reject,
}

/// Arbitrates between an incoming channel proposal and an existing
/// channel for the same counterparty. Ties on amount are broken by
/// comparing host account addresses, so both sides pick the same winner
/// without force-closing anything.
pub fn resolve_propose_conflict(
    existing: &Channel,
    propose: &ChannelProposePayload,
) -> ProposeConflict {
    match existing.state {
        ChannelState::SettingUp => ProposeConflict::Retry,
        ChannelState::ChannelProposed => {
            if propose.host_amount < existing.host_amount {
                return ProposeConflict::Reject;
            }
            if propose.host_amount == existing.host_amount
                && propose.host_acct.address() < existing.host_acct.address()
            {
                return ProposeConflict::Reject;
            }
            ProposeConflict::CleanUpAndRetry
        }
        ChannelState::AwaitingCleanup => ProposeConflict::Retry,
        _ => ProposeConflict::Reject,
    }
}

impl<'a, O: Outputter> Updater<'a, O> {
    pub(super) fn handle_channel_propose_msg(
        &mut self,
        channel_id: &str,
        propose: &ChannelProposePayload,
    ) -> Result<(), ProtocolError> {
        if self.channel.state != ChannelState::Start {
            return Err(ProtocolError::ChannelExists);
        }

        if propose.guest_acct != self.channel.guest_acct {
            warn!(
                proposed = %propose.guest_acct,
                ours = %self.channel.guest_acct,
                "dropped message: proposed guest acct doesn't match"
            );
            return Ok(());
        }

        let escrow_acct = AccountId::from_address(channel_id)?;
        let prior = std::mem::take(self.channel);
        *self.channel = Channel {
            id: channel_id.to_owned(),
            role: Role::Guest,
            host_amount: propose.host_amount,
            max_round_duration: propose.max_round_duration,
            finality_delay: propose.finality_delay,
            funding_time: propose.funding_time,
            payment_time: propose.funding_time,
            host_acct: propose.host_acct,
            guest_acct: prior.guest_acct,
            escrow_acct,
            host_ratchet_acct: propose.host_ratchet_acct,
            guest_ratchet_acct: propose.guest_ratchet_acct,
            round_number: 1,
            base_sequence_number: prior.base_sequence_number,
            host_ratchet_acct_seq_num: prior.host_ratchet_acct_seq_num,
            guest_ratchet_acct_seq_num: prior.guest_ratchet_acct_seq_num,
            key_index: crate::key::PRIMARY_ACCOUNT_INDEX,
            passphrase: self.passphrase.to_owned(),
            counterparty_address: propose.counterparty_address.clone(),
            remote_url: prior.remote_url,
            channel_feerate: propose.feerate,
            ..Channel::default()
        };

        self.transition_to(ChannelState::AwaitingFunding)
    }

    pub(super) fn handle_channel_accept_msg(
        &mut self,
        accept: &ChannelAcceptPayload,
    ) -> Result<(), ProtocolError> {
        if self.channel.state != ChannelState::ChannelProposed {
            return Err(ProtocolError::UnexpectedState {
                got: self.channel.state,
                want: "ChannelProposed",
            });
        }
        if self.channel.role != Role::Host {
            warn!("dropped message: host cannot accept channel");
            return Ok(());
        }
        let deadline = self
            .channel
            .funding_time
            .checked_add(self.channel.max_round_duration)
            .ok_or(ProtocolError::Overflow)?;
        if self.ledger_time > deadline {
            warn!(
                ledger_time = self.ledger_time,
                funding_time = self.channel.funding_time,
                "dropped message: ledger time past funding window"
            );
            return Ok(());
        }
        let seed = self.seed()?;
        self.wallet.seqnum += 1;

        let guest_key = self.channel.guest_acct;

        let ratchet_tx = build_ratchet_tx(
            self.channel,
            self.channel.funding_time,
            self.channel.host_ratchet_acct,
            self.channel.host_ratchet_acct_seq_num,
        )?;
        verify_sig(
            &ratchet_tx,
            &self.channel.passphrase,
            &guest_key,
            &accept.guest_ratchet_round1_sig,
            "round 1 ratchet tx",
        )?;
        self.channel
            .sign_ratchet_tx(&ratchet_tx, &accept.guest_ratchet_round1_sig, seed);

        let settle_only_with_host_tx =
            build_settle_only_with_host_tx(self.channel, self.channel.funding_time)?;
        verify_sig(
            &settle_only_with_host_tx,
            &self.channel.passphrase,
            &guest_key,
            &accept.guest_settle_only_with_host_sig,
            "round 1 settlement tx",
        )?;
        self.channel.set_latest_settlement_txs(
            None,
            &settle_only_with_host_tx,
            None,
            &accept.guest_settle_only_with_host_sig,
            seed,
        );

        self.transition_to(ChannelState::AwaitingFunding)
    }

    pub(super) fn handle_payment_propose_msg(
        &mut self,
        payment: &PaymentProposePayload,
    ) -> Result<(), ProtocolError> {
        match self.channel.state {
            ChannelState::Open
            | ChannelState::PaymentProposed
            | ChannelState::AwaitingPaymentMerge => {}
            got => {
                return Err(ProtocolError::UnexpectedState {
                    got,
                    want: "Open, PaymentProposed, or AwaitingPaymentMerge",
                })
            }
        }
        if payment.payment_amount <= Amount::ZERO {
            warn!(amount = %payment.payment_amount, "dropped message: invalid payment amount");
            return Ok(());
        }
        let verify_key = match self.channel.role {
            Role::Guest => {
                if payment.payment_amount > self.channel.host_amount {
                    warn!(
                        amount = %payment.payment_amount,
                        balance = %self.channel.host_amount,
                        "dropped message: payment amount exceeds host balance"
                    );
                    return Ok(());
                }
                self.channel.escrow_acct
            }
            Role::Host => {
                if payment.payment_amount > self.channel.guest_amount {
                    warn!(
                        amount = %payment.payment_amount,
                        balance = %self.channel.guest_amount,
                        "dropped message: payment amount exceeds guest balance"
                    );
                    return Ok(());
                }
                self.channel.guest_acct
            }
        };

        // Reconstruct the proposed round's settlement templates on a
        // scratch copy reflecting the shifted balances.
        let mut ch2 = self.channel.clone();
        if matches!(
            self.channel.state,
            ChannelState::Open | ChannelState::AwaitingPaymentMerge
        ) {
            ch2.round_number += 1;
        }
        match ch2.role {
            Role::Guest => {
                ch2.guest_amount = ch2.guest_amount + payment.payment_amount;
                ch2.host_amount = ch2.host_amount - payment.payment_amount;
            }
            Role::Host => {
                ch2.host_amount = ch2.host_amount + payment.payment_amount;
                ch2.guest_amount = ch2.guest_amount - payment.payment_amount;
            }
        }

        let (settle_with_guest_tx, settle_with_host_tx) = if ch2.guest_amount.is_zero() {
            if payment.sender_settle_with_guest_sig.is_some() {
                return Err(ProtocolError::UnusedSettleWithGuestSig);
            }
            let host_tx = build_settle_only_with_host_tx(&ch2, payment.payment_time)?;
            (None, host_tx)
        } else {
            let guest_tx = build_settle_with_guest_tx(&ch2, payment.payment_time)?;
            let guest_sig = payment
                .sender_settle_with_guest_sig
                .as_ref()
                .ok_or(ProtocolError::InvalidSignature("settle with guest tx"))?;
            verify_sig(
                &guest_tx,
                &ch2.passphrase,
                &verify_key,
                guest_sig,
                "settle with guest tx",
            )?;
            let host_tx = build_settle_with_host_tx(&ch2, payment.payment_time)?;
            (Some(guest_tx), host_tx)
        };
        verify_sig(
            &settle_with_host_tx,
            &ch2.passphrase,
            &verify_key,
            &payment.sender_settle_with_host_sig,
            "settle with host tx",
        )?;

        match self.channel.state {
            ChannelState::Open | ChannelState::AwaitingPaymentMerge => {
                if self.channel.round_number >= payment.round_number {
                    warn!(
                        payment_round = payment.round_number,
                        channel_round = self.channel.round_number,
                        "dropped message: stale payment round"
                    );
                    return Ok(());
                }
                let window = self.channel.max_round_duration;
                if self.ledger_time > payment.payment_time.saturating_add(window)
                    || self.ledger_time < payment.payment_time.saturating_sub(window)
                {
                    warn!(
                        payment_time = payment.payment_time,
                        ledger_time = self.ledger_time,
                        "dropped message: payment time outside round window"
                    );
                    return Ok(());
                }
                if payment.payment_time < self.channel.payment_time {
                    warn!(
                        payment_time = payment.payment_time,
                        completed_payment_time = self.channel.payment_time,
                        "dropped message: payment time precedes completed round"
                    );
                    return Ok(());
                }
                if self.channel.state == ChannelState::AwaitingPaymentMerge {
                    let expected =
                        self.channel.pending_amount_received - self.channel.pending_amount_sent;
                    if payment.payment_amount != expected {
                        warn!(
                            amount = %payment.payment_amount,
                            expected = %expected,
                            "dropped message: invalid merge payment amount"
                        );
                        return Ok(());
                    }
                } else {
                    self.channel.pending_amount_received = payment.payment_amount;
                }
                let seed = self.seed()?;
                self.channel.set_counterparty_settlement_txs(
                    settle_with_guest_tx.as_ref(),
                    &settle_with_host_tx,
                    payment.sender_settle_with_guest_sig.as_ref(),
                    &payment.sender_settle_with_host_sig,
                    seed,
                );
                self.channel.pending_payment_time = payment.payment_time;
                self.channel.round_number += 1;
                self.transition_to(ChannelState::PaymentAccepted)
            }

            ChannelState::PaymentProposed => {
                if self.channel.round_number != payment.round_number {
                    warn!(
                        payment_round = payment.round_number,
                        channel_round = self.channel.round_number,
                        "dropped message: conflicting payment round"
                    );
                    return Ok(());
                }
                if self.channel.pending_amount_sent > payment.payment_amount
                    || (self.channel.pending_amount_sent == payment.payment_amount
                        && self.channel.role == Role::Host)
                {
                    // Our proposal wins; fold theirs into a merged one.
                    debug!("merging crossed payment proposals into a new round");
                    self.channel.round_number += 1;
                    self.channel.pending_amount_sent =
                        self.channel.pending_amount_sent - payment.payment_amount;
                    return self.transition_to(ChannelState::PaymentProposed);
                }
                // Theirs wins; wait for their merged proposal.
                self.channel.pending_amount_received = payment.payment_amount;
                self.transition_to(ChannelState::AwaitingPaymentMerge)
            }

            _ => unreachable!("state checked above"),
        }
    }

    pub(super) fn handle_payment_accept_msg(
        &mut self,
        accept: &PaymentAcceptPayload,
    ) -> Result<(), ProtocolError> {
        if self.channel.state != ChannelState::PaymentProposed {
            return Err(ProtocolError::UnexpectedState {
                got: self.channel.state,
                want: "PaymentProposed",
            });
        }
        let (recipient_acct, recipient_seqnum, recipient_key) = match self.channel.role {
            Role::Guest => {
                self.channel.guest_amount =
                    self.channel.guest_amount - self.channel.pending_amount_sent;
                self.channel.host_amount =
                    self.channel.host_amount + self.channel.pending_amount_sent;
                (
                    self.channel.host_ratchet_acct,
                    self.channel.host_ratchet_acct_seq_num,
                    self.channel.escrow_acct,
                )
            }
            Role::Host => {
                self.channel.host_amount =
                    self.channel.host_amount - self.channel.pending_amount_sent;
                self.channel.guest_amount =
                    self.channel.guest_amount + self.channel.pending_amount_sent;
                (
                    self.channel.guest_ratchet_acct,
                    self.channel.guest_ratchet_acct_seq_num,
                    self.channel.guest_acct,
                )
            }
        };

        let ratchet_tx = build_ratchet_tx(
            self.channel,
            self.channel.pending_payment_time,
            recipient_acct,
            recipient_seqnum,
        )?;
        verify_sig(
            &ratchet_tx,
            &self.channel.passphrase,
            &recipient_key,
            &accept.recipient_ratchet_sig,
            "ratchet tx",
        )?;

        let host_tx =
            build_settle_with_host_tx(self.channel, self.channel.pending_payment_time)?;
        verify_sig(
            &host_tx,
            &self.channel.passphrase,
            &recipient_key,
            &accept.recipient_settle_with_host_sig,
            "settle with host tx",
        )?;

        let guest_tx = if self.channel.guest_amount.is_zero() {
            if accept.recipient_settle_with_guest_sig.is_some() {
                return Err(ProtocolError::UnusedSettleWithGuestSig);
            }
            None
        } else {
            let tx = build_settle_with_guest_tx(self.channel, self.channel.pending_payment_time)?;
            let sig = accept
                .recipient_settle_with_guest_sig
                .as_ref()
                .ok_or(ProtocolError::InvalidSignature("settle with guest tx"))?;
            verify_sig(
                &tx,
                &self.channel.passphrase,
                &recipient_key,
                sig,
                "settle with guest tx",
            )?;
            Some(tx)
        };

        let seed = self.seed()?;
        self.channel.set_latest_settlement_txs(
            guest_tx.as_ref(),
            &host_tx,
            accept.recipient_settle_with_guest_sig.as_ref(),
            &accept.recipient_settle_with_host_sig,
            seed,
        );
        self.channel
            .sign_ratchet_tx(&ratchet_tx, &accept.recipient_ratchet_sig, seed);
        self.channel.payment_time = self.channel.pending_payment_time;
        self.channel.pending_amount_received = Amount::ZERO;
        self.channel.pending_amount_sent = Amount::ZERO;
        self.transition_to(ChannelState::Open)
    }

    pub(super) fn handle_payment_complete_msg(
        &mut self,
        complete: &PaymentCompletePayload,
    ) -> Result<(), ProtocolError> {
        if self.channel.state != ChannelState::PaymentAccepted {
            return Err(ProtocolError::UnexpectedState {
                got: self.channel.state,
                want: "PaymentAccepted",
            });
        }
        let delta = self.channel.pending_amount_received - self.channel.pending_amount_sent;
        let (sender_acct, sender_seqnum, sender_key) = match self.channel.role {
            Role::Guest => {
                self.channel.guest_amount = self.channel.guest_amount + delta;
                self.channel.host_amount = self.channel.host_amount - delta;
                (
                    self.channel.host_ratchet_acct,
                    self.channel.host_ratchet_acct_seq_num,
                    self.channel.escrow_acct,
                )
            }
            Role::Host => {
                self.channel.host_amount = self.channel.host_amount + delta;
                self.channel.guest_amount = self.channel.guest_amount - delta;
                (
                    self.channel.guest_ratchet_acct,
                    self.channel.guest_ratchet_acct_seq_num,
                    self.channel.guest_acct,
                )
            }
        };

        let ratchet_tx = build_ratchet_tx(
            self.channel,
            self.channel.pending_payment_time,
            sender_acct,
            sender_seqnum,
        )?;
        verify_sig(
            &ratchet_tx,
            &self.channel.passphrase,
            &sender_key,
            &complete.sender_ratchet_sig,
            "ratchet tx",
        )?;

        let seed = self.seed()?;
        self.channel.current_settle_with_guest_tx = self
            .channel
            .counterparty_latest_settle_with_guest_tx
            .clone();
        self.channel.current_settle_with_host_tx = self
            .channel
            .counterparty_latest_settle_with_host_tx
            .clone();
        self.channel
            .sign_ratchet_tx(&ratchet_tx, &complete.sender_ratchet_sig, seed);
        self.channel.payment_time = self.channel.pending_payment_time;
        self.channel.pending_amount_received = Amount::ZERO;
        self.channel.pending_amount_sent = Amount::ZERO;
        self.transition_to(ChannelState::Open)
    }

    pub(super) fn handle_close_msg(&mut self, close: &ClosePayload) -> Result<(), ProtocolError> {
        match self.channel.state {
            ChannelState::Open | ChannelState::PaymentProposed | ChannelState::AwaitingClose => {}
            got => {
                return Err(ProtocolError::UnexpectedState {
                    got,
                    want: "Open, PaymentProposed, or AwaitingClose",
                })
            }
        }
        let verify_key = match self.channel.role {
            Role::Guest => self.channel.escrow_acct,
            Role::Host => self.channel.guest_acct,
        };
        let coop_close_tx = build_cooperative_close_tx(self.channel)?;
        verify_sig(
            &coop_close_tx,
            &self.channel.passphrase,
            &verify_key,
            &close.cooperative_close_sig,
            "coop close tx",
        )?;
        self.channel.counterparty_coop_close_sig = Some(close.cooperative_close_sig.clone());
        self.transition_to(ChannelState::AwaitingClose)
    }
}
