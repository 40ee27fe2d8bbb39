//! The state machine core: one `Updater` invocation consumes exactly
//! one input against one channel and appends its side effects to the
//! outputter.
//!
//! The updater borrows the channel and wallet for the duration of one
//! invocation; the driver holds the only long-lived ownership and must
//! discard both on error, since a failed transition may leave them
//! partially mutated. The driver is also responsible for the
//! single-writer invariant per channel.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::channel::{Channel, ChannelState, Role, WalletAcct};
use super::command::Command;
use super::error::ProtocolError;
use super::msg::{ChannelMessage, MessageBody, PROTOCOL_VERSION};
use super::output::{
    publish_cleanup_tx, publish_coop_close_tx, publish_funding_tx, publish_setup_account_txs,
    publish_top_up_tx, send_channel_accept_msg, send_channel_propose_msg, send_close_msg,
    send_payment_accept_msg, send_payment_complete_msg, send_payment_propose_msg, Outputter,
};
use super::tx::LedgerTx;
use crate::key;
use crate::stellar::tx::AccountId;

/// One state-machine input: a user command, a peer message, a ledger
/// transaction, or a timer firing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Input {
    Command(Command),
    Message(ChannelMessage),
    Tx(LedgerTx),
    Time,
}

/// The context for one state transition.
pub struct Updater<'a, O: Outputter> {
    pub channel: &'a mut Channel,
    pub wallet: &'a mut WalletAcct,
    pub outputter: &'a mut O,
    /// Wallet seed; `None` while the account is locked, in which case
    /// any transition that must sign fails with `NoSeed` and can be
    /// retried after authentication.
    pub seed: Option<&'a [u8]>,
    /// Current ledger close time, unix seconds.
    pub ledger_time: u64,
    /// Network passphrase, adopted by channels created by an input.
    pub passphrase: &'a str,
}

impl<'a, O: Outputter> Updater<'a, O> {
    /// Consumes one input, mutating the channel and wallet and queueing
    /// side effects. On error the caller must discard both.
    pub fn apply(&mut self, input: &Input) -> Result<(), ProtocolError> {
        match input {
            Input::Command(c) => self.apply_command(c),
            Input::Message(m) => self.apply_msg(m),
            Input::Tx(tx) => self.apply_tx(tx),
            Input::Time => self.apply_time(),
        }
    }

    pub(super) fn seed(&self) -> Result<&'a [u8], ProtocolError> {
        self.seed.ok_or(ProtocolError::NoSeed)
    }

    fn apply_msg(&mut self, m: &ChannelMessage) -> Result<(), ProtocolError> {
        info!(channel_id = %m.channel_id, "received message");
        self.verify_msg(m)?;
        match &m.body {
            MessageBody::ChannelPropose(p) => self.handle_channel_propose_msg(&m.channel_id, p),
            MessageBody::ChannelAccept(p) => self.handle_channel_accept_msg(p),
            MessageBody::PaymentPropose(p) => self.handle_payment_propose_msg(p),
            MessageBody::PaymentAccept(p) => self.handle_payment_accept_msg(p),
            MessageBody::PaymentComplete(p) => self.handle_payment_complete_msg(p),
            MessageBody::Close(p) => self.handle_close_msg(p),
        }
    }

    /// Checks the message version and its signature against the key the
    /// sender is expected to hold: the guest verifies host messages
    /// against the escrow account's key, the host verifies guest
    /// messages against the guest account's key.
    fn verify_msg(&self, m: &ChannelMessage) -> Result<(), ProtocolError> {
        if m.version != PROTOCOL_VERSION {
            return Err(ProtocolError::InvalidVersion);
        }
        // Before a channel exists, the only acceptable message is a
        // proposal, whose sender proves control of the escrow account
        // named by the channel id.
        let signer = if self.channel.state == ChannelState::Start {
            AccountId::from_address(&m.channel_id)?
        } else {
            match self.channel.role {
                Role::Guest => self.channel.escrow_acct,
                Role::Host => self.channel.guest_acct,
            }
        };
        let bytes = m.body.to_sign_bytes()?;
        key::verify(&signer, &bytes, &m.signature)
            .map_err(|_| ProtocolError::InvalidSignature("message"))
    }

    /// Enters `new_state` and performs the side effect the new state
    /// demands, if any.
    pub(super) fn transition_to(&mut self, new_state: ChannelState) -> Result<(), ProtocolError> {
        info!(
            channel_id = %self.channel.id,
            from = %self.channel.state,
            to = %new_state,
            "state transition"
        );
        self.channel.prev_state = self.channel.state;
        self.channel.state = new_state;

        match new_state {
            ChannelState::AwaitingCleanup => {
                publish_cleanup_tx(self.seed()?, self.channel, self.outputter, self.wallet)
            }

            ChannelState::AwaitingClose => {
                if self.channel.counterparty_coop_close_sig.is_some() {
                    publish_coop_close_tx(self.seed()?, self.channel, self.outputter)
                } else {
                    send_close_msg(self.seed()?, self.channel, self.outputter)
                }
            }

            ChannelState::AwaitingFunding => match self.channel.role {
                Role::Guest => {
                    if self.channel.prev_state != ChannelState::Start {
                        return Err(ProtocolError::UnexpectedState {
                            got: self.channel.prev_state,
                            want: "Start",
                        });
                    }
                    send_channel_accept_msg(self.seed()?, self.channel, self.outputter)
                    // The funding timer gets set by the driver.
                }
                Role::Host => {
                    publish_funding_tx(self.seed()?, self.channel, self.outputter, self.wallet)
                }
            },

            ChannelState::AwaitingRatchet => {
                let env = self
                    .channel
                    .current_ratchet_tx
                    .clone()
                    .ok_or(ProtocolError::NoCachedTx("ratchet"))?;
                self.outputter.output_tx(env);
                Ok(())
            }

            ChannelState::AwaitingSettlement => {
                if let Some(env) = self.channel.current_settle_with_guest_tx.clone() {
                    self.outputter.output_tx(env);
                }
                let env = self
                    .channel
                    .current_settle_with_host_tx
                    .clone()
                    .ok_or(ProtocolError::NoCachedTx("settle with host"))?;
                self.outputter.output_tx(env);
                Ok(())
            }

            ChannelState::ChannelProposed => {
                send_channel_propose_msg(self.seed()?, self.channel, self.outputter, self.wallet)
            }

            ChannelState::Open => match self.channel.prev_state {
                ChannelState::Open => {
                    if !self.channel.top_up_amount.is_zero() && self.channel.role == Role::Host {
                        publish_top_up_tx(self.seed()?, self.channel, self.outputter, self.wallet)
                    } else {
                        Ok(())
                    }
                }
                ChannelState::PaymentProposed => {
                    send_payment_complete_msg(self.seed()?, self.channel, self.outputter)
                }
                _ => Ok(()),
            },

            ChannelState::PaymentAccepted => {
                send_payment_accept_msg(self.seed()?, self.channel, self.outputter)
            }

            ChannelState::PaymentProposed => {
                send_payment_propose_msg(self.seed()?, self.channel, self.outputter)
            }

            ChannelState::SettingUp => {
                publish_setup_account_txs(self.seed()?, self.channel, self.outputter, self.wallet)
            }

            // AwaitingSettlementMintime waits on its timer; Closed and
            // AwaitingPaymentMerge have nothing to do.
            ChannelState::AwaitingSettlementMintime
            | ChannelState::AwaitingPaymentMerge
            | ChannelState::Closed
            | ChannelState::Start => Ok(()),
        }
    }

    /// Enters the unilateral-close path, unless already on it. A guest
    /// with no balance has no settlement stake (and may not even hold a
    /// ratchet tx), so it closes outright.
    pub(super) fn set_force_close_state(&mut self) -> Result<(), ProtocolError> {
        match self.channel.state {
            ChannelState::AwaitingRatchet
            | ChannelState::AwaitingSettlement
            | ChannelState::AwaitingSettlementMintime
            | ChannelState::Closed => return Ok(()),
            _ => {}
        }
        info!(channel_id = %self.channel.id, "entering force close");
        if self.channel.role == Role::Guest && self.channel.guest_amount.is_zero() {
            return self.transition_to(ChannelState::Closed);
        }
        self.transition_to(ChannelState::AwaitingRatchet)
    }
}
