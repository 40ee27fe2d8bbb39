use crate::fsm::channel::{Channel, ChannelState, Role};
use crate::fsm::templates::build_settle_with_host_tx;
use crate::key::KeyPair;
use crate::stellar::amount::{Amount, LUMEN};
use crate::stellar::tx::TransactionEnvelope;

use super::{base_seq, host_config, HOST_SEED, MAX_ROUND_DURATION, T0};

#[test]
fn reserve_amount_components() {
    let ch = Channel::new_host(&HOST_SEED, host_config());

    // host_amount 20 XLM; both fee rates 100 stroops.
    assert_eq!(ch.funding_balance_amount(), LUMEN * 22);
    assert_eq!(ch.funding_fee_amount(), Amount::from_stroops(700));
    assert_eq!(ch.funded_accts_tx_fee_amount(), Amount::from_stroops(1_000));
    assert_eq!(
        ch.total_funding_tx_amount(),
        LUMEN * 22 + Amount::from_stroops(1_700)
    );
    // Plus 3 XLM of account minimums and 3 setup-tx fees.
    assert_eq!(
        ch.setup_and_funding_reserve_amount(),
        LUMEN * 25 + Amount::from_stroops(2_000)
    );
}

#[test]
fn round_seq_num_advances_by_four() {
    let mut ch = Channel::new_host(&HOST_SEED, host_config());
    ch.base_sequence_number = base_seq();
    assert_eq!(ch.round_seq_num(), base_seq() + 4);
    ch.round_number = 2;
    assert_eq!(ch.round_seq_num(), base_seq() + 8);
    ch.round_number = 3;
    assert_eq!(ch.round_seq_num(), base_seq() + 12);
}

#[test]
fn channel_roundtrips_through_json() {
    let mut ch = Channel::new_host(&HOST_SEED, host_config());
    ch.state = ChannelState::Open;
    ch.base_sequence_number = base_seq();
    ch.guest_amount = LUMEN * 3;
    ch.cursor = "12345-1".into();

    let json = serde_json::to_string(&ch).unwrap();
    let back: Channel = serde_json::from_str(&json).unwrap();
    assert_eq!(back, ch);
}

#[test]
fn unset_accounts_serialize_as_empty_strings() {
    let ch = Channel::default();
    let value: serde_json::Value = serde_json::to_value(&ch).unwrap();
    assert_eq!(value["escrow_acct"], "");
    assert_eq!(value["host_acct"], "");

    let back: Channel = serde_json::from_value(value).unwrap();
    assert!(back.escrow_acct.is_zero());
    assert_eq!(back, ch);
}

#[test]
fn derived_channel_accounts_are_stable() {
    let a = Channel::new_host(&HOST_SEED, host_config());
    let b = Channel::new_host(&HOST_SEED, host_config());
    assert_eq!(a.escrow_acct, b.escrow_acct);
    assert_eq!(a.host_ratchet_acct, b.host_ratchet_acct);
    assert_eq!(a.guest_ratchet_acct, b.guest_ratchet_acct);
    assert_eq!(a.id, a.escrow_acct.address());
    // Consecutive indices produce distinct accounts.
    assert_ne!(a.escrow_acct, a.host_ratchet_acct);
    assert_ne!(a.host_ratchet_acct, a.guest_ratchet_acct);
    // The wallet key is not reused for channel accounts.
    assert_ne!(a.escrow_acct, KeyPair::derive(&HOST_SEED, 0).account_id());
}

#[test]
fn timer_table() {
    let mut ch = Channel::new_host(&HOST_SEED, host_config());
    assert_eq!(ch.timer_time().unwrap(), None);

    // Host waits on the funding tx itself, not a timer.
    ch.state = ChannelState::AwaitingFunding;
    assert_eq!(ch.timer_time().unwrap(), None);
    ch.role = Role::Guest;
    assert_eq!(ch.timer_time().unwrap(), Some(T0 + MAX_ROUND_DURATION + 60));
    ch.role = Role::Host;

    ch.state = ChannelState::ChannelProposed;
    assert_eq!(ch.timer_time().unwrap(), Some(T0 + MAX_ROUND_DURATION));

    ch.payment_time = T0 + 500;
    for state in [
        ChannelState::Open,
        ChannelState::PaymentProposed,
        ChannelState::PaymentAccepted,
        ChannelState::AwaitingClose,
    ] {
        ch.state = state;
        assert_eq!(ch.timer_time().unwrap(), Some(T0 + 500 + MAX_ROUND_DURATION));
    }

    ch.state = ChannelState::AwaitingCleanup;
    assert_eq!(ch.timer_time().unwrap(), None);
}

#[test]
fn settlement_min_time_comes_from_cached_tx() {
    let mut ch = Channel::new_host(&HOST_SEED, host_config());
    ch.base_sequence_number = base_seq();
    assert!(ch.settlement_min_time().is_err());

    let tx = build_settle_with_host_tx(&ch, T0 + 100).unwrap();
    ch.current_settle_with_host_tx = Some(TransactionEnvelope {
        tx,
        signatures: vec![],
    });
    // payment_time + 2 * finality_delay + max_round_duration.
    assert_eq!(
        ch.settlement_min_time().unwrap(),
        T0 + 100 + 120 + MAX_ROUND_DURATION
    );

    ch.state = ChannelState::AwaitingSettlementMintime;
    assert_eq!(
        ch.timer_time().unwrap(),
        Some(T0 + 100 + 120 + MAX_ROUND_DURATION)
    );
}
