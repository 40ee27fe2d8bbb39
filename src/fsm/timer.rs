//! Deadline policy. Each state maps to at most one timer; the driver
//! schedules a callback at that time and feeds a `Time` input back in.

use tracing::info;

use super::channel::{Channel, ChannelState, Role};
use super::error::ProtocolError;
use super::output::Outputter;
use super::updater::Updater;

impl Channel {
    /// The ledger time at which a timer for the current state should
    /// fire, or `None` if the state has no deadline.
    pub fn timer_time(&self) -> Result<Option<u64>, ProtocolError> {
        let t = match self.state {
            ChannelState::AwaitingFunding => {
                if self.role == Role::Host {
                    return Ok(None);
                }
                self.funding_time
                    .checked_add(self.max_round_duration)
                    .and_then(|t| t.checked_add(self.finality_delay))
                    .ok_or(ProtocolError::Overflow)?
            }
            ChannelState::ChannelProposed => self
                .funding_time
                .checked_add(self.max_round_duration)
                .ok_or(ProtocolError::Overflow)?,
            ChannelState::Open
            | ChannelState::PaymentProposed
            | ChannelState::PaymentAccepted
            | ChannelState::AwaitingClose => self
                .payment_time
                .checked_add(self.max_round_duration)
                .ok_or(ProtocolError::Overflow)?,
            ChannelState::AwaitingSettlementMintime => self.settlement_min_time()?,
            _ => return Ok(None),
        };
        Ok(Some(t))
    }
}

impl<'a, O: Outputter> Updater<'a, O> {
    /// Applies the state-specific timeout policy if the current state's
    /// deadline has passed; does nothing otherwise.
    pub(super) fn apply_time(&mut self) -> Result<(), ProtocolError> {
        let deadline = match self.channel.timer_time()? {
            Some(t) if self.ledger_time >= t => t,
            _ => return Ok(()),
        };

        match self.channel.state {
            ChannelState::AwaitingFunding => {
                info!(channel_id = %self.channel.id, deadline, "funding deadline passed");
                if self.channel.role == Role::Guest {
                    return self.transition_to(ChannelState::Closed);
                }
                // Recover only the funding tx balance; the setup
                // balances come back when the cleanup merges confirm.
                self.wallet.balance += self.channel.funding_balance_amount();
                self.channel.funding_timed_out = true;
                self.transition_to(ChannelState::AwaitingCleanup)
            }

            ChannelState::ChannelProposed => {
                info!(channel_id = %self.channel.id, deadline, "channel proposal expired");
                if self.channel.role == Role::Host {
                    self.wallet.balance += self.channel.total_funding_tx_amount();
                    self.wallet.seqnum += 1;
                    return self.transition_to(ChannelState::AwaitingCleanup);
                }
                Ok(())
            }

            ChannelState::Open
            | ChannelState::PaymentProposed
            | ChannelState::PaymentAccepted
            | ChannelState::AwaitingClose => {
                info!(channel_id = %self.channel.id, deadline, "round deadline passed");
                self.set_force_close_state()
            }

            ChannelState::AwaitingSettlementMintime => {
                info!(channel_id = %self.channel.id, deadline, "settlement mintime reached");
                self.transition_to(ChannelState::AwaitingSettlement)
            }

            _ => Ok(()),
        }
    }
}
