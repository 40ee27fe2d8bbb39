//! Engine tests. The harness here drives two real parties, host and
//! guest, against each other by feeding each side's queued messages and
//! transactions into the other, the way the surrounding agents would.

mod channel;
mod msg;

use crate::fsm::channel::{Channel, ChannelState, HostChannelConfig, Role, WalletAcct};
use crate::fsm::command::Command;
use crate::fsm::error::ProtocolError;
use crate::fsm::output::MemoryOutputter;
use crate::fsm::tx::LedgerTx;
use crate::fsm::updater::{Input, Updater};
use crate::key::KeyPair;
use crate::stellar::amount::{Amount, LUMEN};
use crate::stellar::tx::{SequenceNumber, TransactionEnvelope, TxResult, TxResultCode};

pub(crate) const PASSPHRASE: &str = "Starlight Test Network ; 2019";
pub(crate) const HOST_SEED: [u8; 32] = [0x11; 32];
pub(crate) const GUEST_SEED: [u8; 32] = [0x22; 32];

/// Key index of the host's channel accounts; 0 is the host's wallet.
pub(crate) const HOST_KEY_INDEX: u32 = 3;

pub(crate) const T0: u64 = 1_600_000_000;
pub(crate) const MAX_ROUND_DURATION: u64 = 3_600;
pub(crate) const FINALITY_DELAY: u64 = 60;
pub(crate) const SETUP_LEDGER_NUM: u32 = 42;

pub(crate) fn init_tracing() {
    use std::sync::Once;

    static INIT: Once = Once::new();

    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .pretty()
            .init();
    });
}

pub(crate) fn feerate() -> Amount {
    Amount::from_stroops(100)
}

pub(crate) fn base_seq() -> SequenceNumber {
    (SETUP_LEDGER_NUM as SequenceNumber) << 32
}

/// One side of a channel: its persistent state plus the seed the driver
/// would hold for it.
pub(crate) struct Party {
    pub channel: Channel,
    pub wallet: WalletAcct,
    pub seed: Vec<u8>,
}

impl Party {
    pub fn apply(
        &mut self,
        ledger_time: u64,
        input: Input,
    ) -> Result<MemoryOutputter, ProtocolError> {
        let mut out = MemoryOutputter::new();
        let mut updater = Updater {
            channel: &mut self.channel,
            wallet: &mut self.wallet,
            outputter: &mut out,
            seed: Some(self.seed.as_slice()),
            ledger_time,
            passphrase: PASSPHRASE,
        };
        updater.apply(&input)?;
        Ok(out)
    }

    pub fn state(&self) -> ChannelState {
        self.channel.state
    }
}

pub(crate) fn host_config() -> HostChannelConfig {
    HostChannelConfig {
        guest_acct: KeyPair::derive(&GUEST_SEED, 0).account_id(),
        host_acct: KeyPair::derive(&HOST_SEED, 0).account_id(),
        counterparty_address: "guest*example.org".into(),
        remote_url: "https://guest.example.org".into(),
        passphrase: PASSPHRASE.into(),
        host_amount: LUMEN * 20,
        channel_feerate: feerate(),
        host_feerate: feerate(),
        max_round_duration: MAX_ROUND_DURATION,
        finality_delay: FINALITY_DELAY,
        funding_time: T0,
        key_index: HOST_KEY_INDEX,
    }
}

pub(crate) fn new_host_party() -> Party {
    Party {
        channel: Channel::new_host(&HOST_SEED, host_config()),
        wallet: WalletAcct {
            balance: LUMEN * 1_000,
            seqnum: 100,
            address: "host*example.org".into(),
            cursor: String::new(),
        },
        seed: HOST_SEED.to_vec(),
    }
}

/// A guest channel as the driver would pre-fill it before handing a
/// channel-propose message to the engine: its own account, plus the
/// freshly-fetched sequence numbers of the channel accounts.
pub(crate) fn new_guest_party() -> Party {
    Party {
        channel: Channel {
            guest_acct: KeyPair::derive(&GUEST_SEED, 0).account_id(),
            base_sequence_number: base_seq(),
            host_ratchet_acct_seq_num: base_seq(),
            guest_ratchet_acct_seq_num: base_seq(),
            remote_url: "https://host.example.org".into(),
            ..Channel::default()
        },
        wallet: WalletAcct::default(),
        seed: GUEST_SEED.to_vec(),
    }
}

pub(crate) fn confirmed(env: TransactionEnvelope, ledger_time: u64) -> LedgerTx {
    LedgerTx {
        env,
        result: TxResult::success(),
        paging_token: "pt".into(),
        ledger_num: SETUP_LEDGER_NUM,
        ledger_time,
    }
}

pub(crate) fn failed(env: TransactionEnvelope, code: TxResultCode) -> LedgerTx {
    LedgerTx {
        env,
        result: TxResult::failed(code),
        paging_token: String::new(),
        ledger_num: 0,
        ledger_time: 0,
    }
}

/// Runs both parties through setup, proposal, acceptance, and funding.
/// Returns (host, guest), both in the Open state.
pub(crate) fn open_channel() -> (Party, Party) {
    init_tracing();
    let mut host = new_host_party();
    let mut guest = new_guest_party();

    let out = host.apply(T0, Input::Command(Command::CreateChannel)).unwrap();
    assert_eq!(host.state(), ChannelState::SettingUp);
    assert_eq!(out.txs.len(), 3);

    // The escrow account creation confirms; host proposes the channel.
    let escrow_setup = out.txs[2].clone();
    let out = host
        .apply(T0 + 10, Input::Tx(confirmed(escrow_setup, T0 + 10)))
        .unwrap();
    assert_eq!(host.state(), ChannelState::ChannelProposed);
    assert_eq!(out.msgs.len(), 1);
    let propose = out.msgs[0].clone();

    // The driver fills in the ratchet account sequence numbers once the
    // accounts exist on the ledger.
    host.channel.host_ratchet_acct_seq_num = base_seq();
    host.channel.guest_ratchet_acct_seq_num = base_seq();

    let out = guest.apply(T0 + 20, Input::Message(propose)).unwrap();
    assert_eq!(guest.state(), ChannelState::AwaitingFunding);
    assert_eq!(guest.channel.role, Role::Guest);
    assert_eq!(out.msgs.len(), 1);
    let accept = out.msgs[0].clone();

    let out = host.apply(T0 + 30, Input::Message(accept)).unwrap();
    assert_eq!(host.state(), ChannelState::AwaitingFunding);
    assert_eq!(out.txs.len(), 1);
    let funding = out.txs[0].clone();
    assert_eq!(funding.signatures.len(), 4);

    host.apply(T0 + 40, Input::Tx(confirmed(funding.clone(), T0 + 40)))
        .unwrap();
    guest
        .apply(T0 + 40, Input::Tx(confirmed(funding, T0 + 40)))
        .unwrap();
    assert_eq!(host.state(), ChannelState::Open);
    assert_eq!(guest.state(), ChannelState::Open);

    (host, guest)
}

/// Drives one full payment round from `sender` to `recipient`.
pub(crate) fn pay(
    sender: &mut Party,
    recipient: &mut Party,
    amount: Amount,
    ledger_time: u64,
) {
    let out = sender
        .apply(ledger_time, Input::Command(Command::ChannelPay { amount }))
        .unwrap();
    assert_eq!(sender.state(), ChannelState::PaymentProposed);
    let propose = out.msgs[0].clone();

    let out = recipient.apply(ledger_time, Input::Message(propose)).unwrap();
    assert_eq!(recipient.state(), ChannelState::PaymentAccepted);
    let accept = out.msgs[0].clone();

    let out = sender.apply(ledger_time, Input::Message(accept)).unwrap();
    assert_eq!(sender.state(), ChannelState::Open);
    let complete = out.msgs[0].clone();

    recipient
        .apply(ledger_time, Input::Message(complete))
        .unwrap();
    assert_eq!(recipient.state(), ChannelState::Open);
}

#[test]
fn channel_opens_and_pays() {
    let (mut host, mut guest) = open_channel();
    let total = host.channel.host_amount + host.channel.guest_amount;

    pay(&mut host, &mut guest, LUMEN * 5, T0 + 100);

    assert_eq!(host.channel.host_amount, LUMEN * 15);
    assert_eq!(host.channel.guest_amount, LUMEN * 5);
    assert_eq!(guest.channel.host_amount, LUMEN * 15);
    assert_eq!(guest.channel.guest_amount, LUMEN * 5);
    assert_eq!(host.channel.host_amount + host.channel.guest_amount, total);
    assert_eq!(host.channel.round_number, guest.channel.round_number);
}

#[test]
fn balances_conserved_across_rounds_in_both_directions() {
    let (mut host, mut guest) = open_channel();
    let total = host.channel.host_amount + host.channel.guest_amount;

    pay(&mut host, &mut guest, LUMEN * 7, T0 + 100);
    pay(&mut guest, &mut host, LUMEN * 2, T0 + 200);
    pay(&mut host, &mut guest, LUMEN, T0 + 300);

    assert_eq!(host.channel.host_amount, LUMEN * 14);
    assert_eq!(host.channel.guest_amount, LUMEN * 6);
    assert_eq!(host.channel.host_amount + host.channel.guest_amount, total);
    assert_eq!(guest.channel.host_amount, host.channel.host_amount);
    assert_eq!(guest.channel.guest_amount, host.channel.guest_amount);
}

#[test]
fn cooperative_close_pays_out_and_closes_both_sides() {
    let (mut host, mut guest) = open_channel();
    pay(&mut host, &mut guest, LUMEN * 5, T0 + 100);

    let out = host
        .apply(T0 + 200, Input::Command(Command::CloseChannel))
        .unwrap();
    assert_eq!(host.state(), ChannelState::AwaitingClose);
    assert_eq!(out.msgs.len(), 1);
    let close = out.msgs[0].clone();

    // The guest counter-signs and can immediately publish.
    let out = guest.apply(T0 + 210, Input::Message(close)).unwrap();
    assert_eq!(guest.state(), ChannelState::AwaitingClose);
    assert_eq!(out.txs.len(), 1);
    let coop_close = out.txs[0].clone();
    assert_eq!(coop_close.signatures.len(), 2);
    // Guest payout plus the three merges into the host.
    assert_eq!(coop_close.tx.operations.len(), 4);

    host.apply(T0 + 220, Input::Tx(confirmed(coop_close.clone(), T0 + 220)))
        .unwrap();
    guest
        .apply(T0 + 220, Input::Tx(confirmed(coop_close, T0 + 220)))
        .unwrap();
    assert_eq!(host.state(), ChannelState::Closed);
    assert_eq!(guest.state(), ChannelState::Closed);
}

#[test]
fn guest_closes_when_funding_fails() -> anyhow::Result<()> {
    init_tracing();
    let mut host = new_host_party();
    let mut guest = new_guest_party();

    let out = host.apply(T0, Input::Command(Command::CreateChannel))?;
    let escrow_setup = out.txs[2].clone();
    let out = host.apply(T0 + 10, Input::Tx(confirmed(escrow_setup, T0 + 10)))?;
    host.channel.host_ratchet_acct_seq_num = base_seq();
    host.channel.guest_ratchet_acct_seq_num = base_seq();
    let propose = out.msgs[0].clone();
    let out = guest.apply(T0 + 20, Input::Message(propose))?;
    let accept = out.msgs[0].clone();
    let out = host.apply(T0 + 30, Input::Message(accept))?;
    let funding = out.txs[0].clone();

    let balance_before = host.wallet.balance;
    let refund = host.channel.total_funding_tx_amount();

    guest.apply(
        T0 + 40,
        Input::Tx(failed(funding.clone(), TxResultCode::TooLate)),
    )?;
    assert_eq!(guest.state(), ChannelState::Closed);

    host.apply(T0 + 40, Input::Tx(failed(funding, TxResultCode::TooLate)))?;
    assert_eq!(host.state(), ChannelState::AwaitingCleanup);
    assert_eq!(host.wallet.balance, balance_before + refund);
    Ok(())
}
