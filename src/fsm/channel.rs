//! The channel entity: pure data describing one escrow relationship,
//! designed to round-trip through JSON so the driver can persist it
//! between invocations.

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use strum::{AsRefStr, Display, EnumString};

use crate::key::KeyPair;
use crate::stellar::amount::{Amount, LUMEN};
use crate::stellar::tx::{
    AccountId, DecoratedSignature, SequenceNumber, Transaction, TransactionEnvelope,
};

use super::error::ProtocolError;
use super::sig::detached_sig;

/// A participant is the channel's host if they created the channel, or
/// the guest if they accepted a channel proposal.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr,
)]
pub enum Role {
    #[default]
    Host,
    Guest,
}

/// Channel lifecycle states.
///
/// `Start` denotes a channel that does not (yet) exist. No transition
/// ever enters `Start`, so a channel left in it after an update is
/// invalid. `Closed` is terminal.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    EnumString,
)]
pub enum ChannelState {
    #[default]
    Start,
    SettingUp,
    ChannelProposed,
    AwaitingFunding,
    Open,
    PaymentProposed,
    PaymentAccepted,
    AwaitingPaymentMerge,
    AwaitingClose,
    AwaitingCleanup,
    AwaitingRatchet,
    AwaitingSettlementMintime,
    AwaitingSettlement,
    Closed,
}

impl ChannelState {
    /// States before the channel is funded and open.
    pub fn is_setup_state(self) -> bool {
        matches!(
            self,
            ChannelState::Start
                | ChannelState::SettingUp
                | ChannelState::ChannelProposed
                | ChannelState::AwaitingFunding
        )
    }

    /// States along the unilateral-close path.
    pub fn is_force_close_state(self) -> bool {
        matches!(
            self,
            ChannelState::AwaitingRatchet
                | ChannelState::AwaitingSettlementMintime
                | ChannelState::AwaitingSettlement
        )
    }
}

/// The point-in-time state of a single channel. Pure data; all
/// transitions happen through the [`Updater`](super::updater::Updater).
///
/// Durations and instants are unix seconds of ledger close time.
#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    /// Channel id, equal to the escrow account address.
    pub id: String,
    pub role: Role,
    pub state: ChannelState,
    /// Previous state, used to disambiguate same-state re-entry.
    pub prev_state: ChannelState,
    /// Federation-style address of the counterparty.
    pub counterparty_address: String,
    pub remote_url: String,
    pub passphrase: String,
    /// Position in the ledger stream of escrow-account transactions.
    pub cursor: String,
    /// Escrow account sequence number at channel creation.
    pub base_sequence_number: SequenceNumber,
    pub round_number: u64,
    pub max_round_duration: u64,
    pub finality_delay: u64,
    pub channel_feerate: Amount,
    pub host_feerate: Amount,
    pub funding_time: u64,
    pub funding_timed_out: bool,
    pub funding_tx_seqnum: SequenceNumber,
    pub host_amount: Amount,
    pub guest_amount: Amount,
    /// In-flight top-up amount, zero when no top-up is being submitted.
    pub top_up_amount: Amount,
    pub pending_amount_sent: Amount,
    pub pending_amount_received: Amount,
    pub payment_time: u64,
    pub pending_payment_time: u64,
    pub host_acct: AccountId,
    pub guest_acct: AccountId,
    pub escrow_acct: AccountId,
    pub host_ratchet_acct: AccountId,
    pub guest_ratchet_acct: AccountId,
    /// Offset into the key-derivation path for this channel's keys.
    pub key_index: u32,
    pub host_ratchet_acct_seq_num: SequenceNumber,
    pub guest_ratchet_acct_seq_num: SequenceNumber,

    /// Ratchet transaction from the last completed round, including the
    /// counterparty's signature.
    pub current_ratchet_tx: Option<TransactionEnvelope>,

    /// Latest settlement pair for which the counterparty holds a valid
    /// ratchet transaction and has provided their signature.
    pub counterparty_latest_settle_with_guest_tx: Option<TransactionEnvelope>,
    pub counterparty_latest_settle_with_host_tx: Option<TransactionEnvelope>,

    /// Settlement pair from the latest completed round. Differs from
    /// the counterparty-latest pair only between entering
    /// PaymentAccepted and receiving the counterparty's
    /// payment-complete message.
    pub current_settle_with_guest_tx: Option<TransactionEnvelope>,
    pub current_settle_with_host_tx: Option<TransactionEnvelope>,

    /// The counterparty's live signature on the cooperative-close
    /// transaction, kept so the fully-signed envelope can be submitted.
    pub counterparty_coop_close_sig: Option<DecoratedSignature>,
}

/// Parameters for creating the host side of a new channel.
pub struct HostChannelConfig {
    pub guest_acct: AccountId,
    pub host_acct: AccountId,
    pub counterparty_address: String,
    pub remote_url: String,
    pub passphrase: String,
    pub host_amount: Amount,
    pub channel_feerate: Amount,
    pub host_feerate: Amount,
    pub max_round_duration: u64,
    pub finality_delay: u64,
    pub funding_time: u64,
    /// First of three consecutive key indices reserved for this
    /// channel: escrow, host ratchet, guest ratchet.
    pub key_index: u32,
}

impl Channel {
    /// Creates the host side of a channel, deriving the escrow and
    /// ratchet accounts from the wallet seed at the reserved key
    /// indices. The channel starts in `Start` with round number 1; the
    /// driver follows up with the create-channel command.
    pub fn new_host(seed: &[u8], config: HostChannelConfig) -> Channel {
        let escrow = KeyPair::derive(seed, config.key_index).account_id();
        let host_ratchet = KeyPair::derive(seed, config.key_index + 1).account_id();
        let guest_ratchet = KeyPair::derive(seed, config.key_index + 2).account_id();
        Channel {
            id: escrow.address(),
            role: Role::Host,
            host_amount: config.host_amount,
            counterparty_address: config.counterparty_address,
            remote_url: config.remote_url,
            passphrase: config.passphrase,
            max_round_duration: config.max_round_duration,
            finality_delay: config.finality_delay,
            channel_feerate: config.channel_feerate,
            host_feerate: config.host_feerate,
            funding_time: config.funding_time,
            payment_time: config.funding_time,
            key_index: config.key_index,
            host_acct: config.host_acct,
            guest_acct: config.guest_acct,
            escrow_acct: escrow,
            host_ratchet_acct: host_ratchet,
            guest_ratchet_acct: guest_ratchet,
            round_number: 1,
            ..Channel::default()
        }
    }

    /// The escrow sequence number the current round's transactions are
    /// built against. Each round consumes four sequence numbers.
    pub fn round_seq_num(&self) -> SequenceNumber {
        self.base_sequence_number + (self.round_number * 4) as SequenceNumber
    }

    /// The amount that must be reserved from the wallet to set up and
    /// fund the channel. Gates channel creation and is used to compute
    /// unreserve amounts on timeout or failure.
    pub fn setup_and_funding_reserve_amount(&self) -> Amount {
        self.setup_min_balance_amount() + self.setup_fee_amount() + self.total_funding_tx_amount()
    }

    fn setup_min_balance_amount(&self) -> Amount {
        // Escrow, host ratchet, guest ratchet have a 1 XLM min balance.
        LUMEN * 3
    }

    fn setup_fee_amount(&self) -> Amount {
        // One setup tx per created account, all at the host fee rate.
        self.host_feerate * 3
    }

    /// Funding balance, funding fee, and pre-funded round fees for the
    /// three channel accounts.
    pub fn total_funding_tx_amount(&self) -> Amount {
        self.funding_balance_amount() + self.funding_fee_amount() + self.funded_accts_tx_fee_amount()
    }

    /// Guest ratchet has 2 additional signers, escrow and host ratchet
    /// 1 each. Each additional signer adds 0.5 XLM to the minimum
    /// reserve balance.
    pub fn funding_balance_amount(&self) -> Amount {
        self.host_amount + LUMEN * 2
    }

    /// The funding tx has 7 operations, paid by the host account.
    pub fn funding_fee_amount(&self) -> Amount {
        self.host_feerate * 7
    }

    /// Escrow fees are 8 fee units, the ratchet accounts 1 each.
    pub fn funded_accts_tx_fee_amount(&self) -> Amount {
        self.channel_feerate * 10
    }

    /// Records the settlement pair the counterparty can enforce,
    /// co-signing with our own key. Used while a round is still in
    /// flight, before both sides have fully agreed.
    pub fn set_counterparty_settlement_txs(
        &mut self,
        guest_tx: Option<&Transaction>,
        host_tx: &Transaction,
        guest_sig: Option<&DecoratedSignature>,
        host_sig: &DecoratedSignature,
        seed: &[u8],
    ) {
        self.counterparty_latest_settle_with_guest_tx = guest_tx.map(|tx| {
            let my_sig = detached_sig(tx, seed, &self.passphrase, self.key_index);
            let mut signatures = vec![my_sig];
            if let Some(sig) = guest_sig {
                signatures.insert(0, sig.clone());
            }
            TransactionEnvelope {
                tx: tx.clone(),
                signatures,
            }
        });
        let my_host_sig = detached_sig(host_tx, seed, &self.passphrase, self.key_index);
        self.counterparty_latest_settle_with_host_tx = Some(TransactionEnvelope {
            tx: host_tx.clone(),
            signatures: vec![host_sig.clone(), my_host_sig],
        });
    }

    /// Records a fully-agreed settlement pair as both the counterparty
    /// pair and our own current pair.
    pub fn set_latest_settlement_txs(
        &mut self,
        guest_tx: Option<&Transaction>,
        host_tx: &Transaction,
        guest_sig: Option<&DecoratedSignature>,
        host_sig: &DecoratedSignature,
        seed: &[u8],
    ) {
        let latest_guest = guest_tx.map(|tx| {
            let my_sig = detached_sig(tx, seed, &self.passphrase, self.key_index);
            let mut signatures = vec![my_sig];
            if let Some(sig) = guest_sig {
                signatures.push(sig.clone());
            }
            TransactionEnvelope {
                tx: tx.clone(),
                signatures,
            }
        });
        let my_host_sig = detached_sig(host_tx, seed, &self.passphrase, self.key_index);
        let latest_host = Some(TransactionEnvelope {
            tx: host_tx.clone(),
            signatures: vec![host_sig.clone(), my_host_sig],
        });

        self.counterparty_latest_settle_with_guest_tx = latest_guest.clone();
        self.current_settle_with_guest_tx = latest_guest;
        self.counterparty_latest_settle_with_host_tx = latest_host.clone();
        self.current_settle_with_host_tx = latest_host;
    }

    /// Caches the round's ratchet transaction with both signatures.
    pub fn sign_ratchet_tx(
        &mut self,
        ratchet_tx: &Transaction,
        counterparty_sig: &DecoratedSignature,
        seed: &[u8],
    ) {
        let my_sig = detached_sig(ratchet_tx, seed, &self.passphrase, self.key_index);
        self.current_ratchet_tx = Some(TransactionEnvelope {
            tx: ratchet_tx.clone(),
            signatures: vec![counterparty_sig.clone(), my_sig],
        });
    }

    /// The minimum-time bound of the current settle-with-host
    /// transaction, which gates when settlement may be submitted.
    pub fn settlement_min_time(&self) -> Result<u64, ProtocolError> {
        let env = self
            .current_settle_with_host_tx
            .as_ref()
            .ok_or(ProtocolError::NoCachedTx("settle with host"))?;
        let bounds = env.tx.time_bounds.ok_or(ProtocolError::Overflow)?;
        Ok(bounds.min_time)
    }
}

/// The host's general-purpose funding account. Mutated only by the
/// state machine while processing host commands and host-affecting
/// ledger transactions; the driver owns it between invocations.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WalletAcct {
    pub balance: Amount,
    pub seqnum: SequenceNumber,
    /// Federation-style address of the wallet owner.
    pub address: String,
    pub cursor: String,
}
