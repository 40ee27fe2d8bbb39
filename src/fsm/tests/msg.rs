use crate::fsm::channel::{Channel, ChannelState};
use crate::fsm::error::ProtocolError;
use crate::fsm::msg::{
    resolve_propose_conflict, ChannelMessage, ChannelProposePayload, ClosePayload, MessageBody,
    PaymentCompletePayload, ProposeConflict, PROTOCOL_VERSION,
};
use crate::fsm::sig::{detached_sig, verify_sig};
use crate::fsm::templates::build_settle_with_host_tx;
use crate::fsm::updater::Input;
use crate::key::{self, KeyPair};
use rand::Rng;
use crate::stellar::amount::LUMEN;
use crate::stellar::tx::DecoratedSignature;

use super::{
    base_seq, host_config, open_channel, HOST_KEY_INDEX, GUEST_SEED, HOST_SEED, PASSPHRASE, T0,
};

fn dummy_decorated_sig() -> DecoratedSignature {
    DecoratedSignature {
        hint: [0; 4],
        signature: vec![0; 64],
    }
}

#[test]
fn message_signature_covers_payload() {
    let body = MessageBody::PaymentComplete(PaymentCompletePayload {
        round_number: 7,
        sender_ratchet_sig: dummy_decorated_sig(),
    });
    let msg =
        ChannelMessage::sign("chan".into(), body.clone(), &HOST_SEED, HOST_KEY_INDEX).unwrap();
    assert_eq!(msg.version, PROTOCOL_VERSION);

    let signer = KeyPair::derive(&HOST_SEED, HOST_KEY_INDEX).account_id();
    let bytes = msg.body.to_sign_bytes().unwrap();
    key::verify(&signer, &bytes, &msg.signature).unwrap();

    // Any single bit flip in the signature must fail verification.
    let mut rng = rand::thread_rng();
    let mut bad = msg.signature.clone();
    let byte = rng.gen_range(0..bad.len());
    bad[byte] ^= 1 << rng.gen_range(0..8);
    assert!(key::verify(&signer, &bytes, &bad).is_err());

    // A signature by a different derived key must fail too.
    let other = ChannelMessage::sign("chan".into(), body, &HOST_SEED, 0).unwrap();
    assert!(key::verify(&signer, &bytes, &other.signature).is_err());
}

#[test]
fn message_roundtrips_through_json() {
    let body = MessageBody::Close(ClosePayload {
        cooperative_close_sig: dummy_decorated_sig(),
    });
    let msg = ChannelMessage::sign("chan".into(), body, &GUEST_SEED, 0).unwrap();
    let json = serde_json::to_string(&msg).unwrap();
    let back: ChannelMessage = serde_json::from_str(&json).unwrap();
    assert_eq!(back, msg);
}

#[test]
fn detached_sig_is_deterministic_per_key() {
    let mut ch = Channel::new_host(&HOST_SEED, host_config());
    ch.base_sequence_number = base_seq();
    let tx = build_settle_with_host_tx(&ch, T0).unwrap();

    let a = detached_sig(&tx, &HOST_SEED, PASSPHRASE, HOST_KEY_INDEX);
    let b = detached_sig(&tx, &HOST_SEED, PASSPHRASE, HOST_KEY_INDEX);
    assert_eq!(a, b);

    // A different derivation index yields a different key and hint.
    let c = detached_sig(&tx, &HOST_SEED, PASSPHRASE, HOST_KEY_INDEX + 1);
    assert_ne!(a.signature, c.signature);
    assert_ne!(a.hint, c.hint);

    // Binding to the network: another passphrase changes the hash.
    let d = detached_sig(&tx, &HOST_SEED, PASSPHRASE, HOST_KEY_INDEX);
    let e = detached_sig(&tx, &HOST_SEED, "other network", HOST_KEY_INDEX);
    assert_eq!(a, d);
    assert_ne!(a.signature, e.signature);

    verify_sig(&tx, PASSPHRASE, &ch.escrow_acct, &a, "settle with host tx").unwrap();
    assert!(verify_sig(&tx, PASSPHRASE, &ch.escrow_acct, &e, "settle with host tx").is_err());
}

#[test]
fn mismatched_version_is_rejected() {
    let (mut host, _guest) = open_channel();
    let body = MessageBody::Close(ClosePayload {
        cooperative_close_sig: dummy_decorated_sig(),
    });
    let mut msg = ChannelMessage::sign(host.channel.id.clone(), body, &GUEST_SEED, 0).unwrap();
    msg.version = PROTOCOL_VERSION + 1;
    let err = host.apply(T0 + 100, Input::Message(msg)).unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidVersion));
}

#[test]
fn forged_message_is_rejected() {
    let (mut host, _guest) = open_channel();
    let state = host.state();
    let body = MessageBody::Close(ClosePayload {
        cooperative_close_sig: dummy_decorated_sig(),
    });
    // Signed with the host's own key instead of the guest's.
    let msg =
        ChannelMessage::sign(host.channel.id.clone(), body, &HOST_SEED, HOST_KEY_INDEX).unwrap();
    let err = host.apply(T0 + 100, Input::Message(msg)).unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidSignature("message")));
    assert_eq!(host.state(), state);
}

fn propose_payload(ch: &Channel) -> ChannelProposePayload {
    ChannelProposePayload {
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
        counterparty_address: "host*example.org".into(),
    }
}

#[test]
fn propose_conflict_arbitration() {
    let mut existing = Channel::new_host(&HOST_SEED, host_config());
    let mut propose = propose_payload(&existing);

    existing.state = ChannelState::SettingUp;
    assert_eq!(
        resolve_propose_conflict(&existing, &propose),
        ProposeConflict::Retry
    );
    existing.state = ChannelState::AwaitingCleanup;
    assert_eq!(
        resolve_propose_conflict(&existing, &propose),
        ProposeConflict::Retry
    );

    // A live channel always wins.
    existing.state = ChannelState::Open;
    assert_eq!(
        resolve_propose_conflict(&existing, &propose),
        ProposeConflict::Reject
    );

    // Crossed proposals: the larger amount wins.
    existing.state = ChannelState::ChannelProposed;
    propose.host_amount = existing.host_amount - LUMEN;
    assert_eq!(
        resolve_propose_conflict(&existing, &propose),
        ProposeConflict::Reject
    );
    propose.host_amount = existing.host_amount + LUMEN;
    assert_eq!(
        resolve_propose_conflict(&existing, &propose),
        ProposeConflict::CleanUpAndRetry
    );

    // Equal amounts break the tie on host addresses, deterministically
    // for both parties.
    propose.host_amount = existing.host_amount;
    let a = KeyPair::derive(&HOST_SEED, 0).account_id();
    let b = KeyPair::derive(&GUEST_SEED, 0).account_id();
    let (lo, hi) = if a.address() < b.address() {
        (a, b)
    } else {
        (b, a)
    };
    existing.host_acct = hi;
    propose.host_acct = lo;
    assert_eq!(
        resolve_propose_conflict(&existing, &propose),
        ProposeConflict::Reject
    );
    existing.host_acct = lo;
    propose.host_acct = hi;
    assert_eq!(
        resolve_propose_conflict(&existing, &propose),
        ProposeConflict::CleanUpAndRetry
    );
}
