//! User commands and their handlers.

use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::info;

use crate::stellar::amount::Amount;

use super::channel::{ChannelState, Role};
use super::error::ProtocolError;
use super::output::Outputter;
use super::updater::Updater;

/// A user command against one channel. Commands are validated against
/// the channel's current state; each handles exactly one lifecycle
/// action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Display)]
pub enum Command {
    /// Reserve setup/funding funds and start creating channel accounts.
    CreateChannel,
    /// Recover funds from a proposed channel that will not be funded.
    CleanUp,
    /// Begin a cooperative close.
    CloseChannel,
    /// Move additional wallet funds into escrow (host only).
    TopUp { amount: Amount },
    /// Send a payment to the counterparty.
    ChannelPay { amount: Amount },
    /// Close unilaterally using cached, countersigned artifacts.
    ForceClose,
}

impl<'a, O: Outputter> Updater<'a, O> {
    pub(super) fn apply_command(&mut self, command: &Command) -> Result<(), ProtocolError> {
        info!(channel_id = %self.channel.id, %command, "received command");
        match command {
            Command::CreateChannel => self.create_channel(),
            Command::CleanUp => self.clean_up(),
            Command::CloseChannel => self.close_channel(),
            Command::TopUp { amount } => self.top_up(*amount),
            Command::ChannelPay { amount } => self.channel_pay(*amount),
            Command::ForceClose => self.force_close(),
        }
    }

    /// Debits the wallet by the exact setup-and-funding reserve and
    /// claims the three sequence numbers the setup transactions will
    /// consume, then starts account creation.
    fn create_channel(&mut self) -> Result<(), ProtocolError> {
        if self.channel.state != ChannelState::Start {
            return Err(ProtocolError::UnexpectedState {
                got: self.channel.state,
                want: "Start",
            });
        }
        let reserve = self.channel.setup_and_funding_reserve_amount();
        let remaining = self
            .wallet
            .balance
            .checked_sub(reserve)
            .ok_or(ProtocolError::Overflow)?;
        if remaining < Amount::ZERO {
            return Err(ProtocolError::InsufficientFunds {
                balance: self.wallet.balance,
            });
        }
        self.wallet.balance = remaining;
        self.wallet.seqnum += 3;
        self.transition_to(ChannelState::SettingUp)
    }

    /// Gets back the funds associated with the funding tx. Setup
    /// balances come back when the cleanup tx's merges confirm.
    fn clean_up(&mut self) -> Result<(), ProtocolError> {
        if self.channel.state != ChannelState::ChannelProposed {
            return Err(ProtocolError::UnexpectedState {
                got: self.channel.state,
                want: "ChannelProposed",
            });
        }
        self.wallet.balance += self.channel.total_funding_tx_amount();
        self.wallet.seqnum += 1;
        self.transition_to(ChannelState::AwaitingCleanup)
    }

    fn close_channel(&mut self) -> Result<(), ProtocolError> {
        if self.channel.state != ChannelState::Open {
            return Err(ProtocolError::UnexpectedState {
                got: self.channel.state,
                want: "Open",
            });
        }
        self.transition_to(ChannelState::AwaitingClose)
    }

    fn top_up(&mut self, amount: Amount) -> Result<(), ProtocolError> {
        if self.channel.state != ChannelState::Open {
            return Err(ProtocolError::UnexpectedState {
                got: self.channel.state,
                want: "Open",
            });
        }
        if self.channel.role != Role::Host {
            return Err(ProtocolError::UnexpectedRole);
        }
        if !self.channel.top_up_amount.is_zero() {
            return Err(ProtocolError::TopUpInProgress);
        }
        if amount > self.wallet.balance {
            return Err(ProtocolError::InsufficientFunds {
                balance: self.wallet.balance,
            });
        }
        self.channel.top_up_amount = amount;
        self.wallet.balance = self.wallet.balance - amount - self.channel.host_feerate;
        self.wallet.seqnum += 1;
        self.transition_to(ChannelState::Open)
    }

    fn channel_pay(&mut self, amount: Amount) -> Result<(), ProtocolError> {
        if self.channel.state != ChannelState::Open {
            return Err(ProtocolError::UnexpectedState {
                got: self.channel.state,
                want: "Open",
            });
        }
        let balance = match self.channel.role {
            Role::Guest => self.channel.guest_amount,
            Role::Host => self.channel.host_amount,
        };
        if balance < amount {
            return Err(ProtocolError::InsufficientFunds { balance });
        }
        self.channel.pending_amount_sent = amount;
        self.channel.pending_payment_time = self.channel.payment_time.max(self.ledger_time);
        self.channel.round_number += 1;
        self.transition_to(ChannelState::PaymentProposed)
    }

    fn force_close(&mut self) -> Result<(), ProtocolError> {
        if self.channel.state.is_setup_state() || self.channel.state.is_force_close_state() {
            return Err(ProtocolError::UnexpectedState {
                got: self.channel.state,
                want: "a funded, non-force-close state",
            });
        }
        self.set_force_close_state()
    }
}
