// LN node core library implementing lightning network channel and
// wallet-seed primitives
//
// Written in 2020-2022 by
//     Dr. Maxim Orlovsky <orlovsky@pandoracore.com>
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the MIT License
// along with this software.
// If not, see <https://opensource.org/licenses/MIT>.

//! Channel commitment state, the update engine and force-close fund
//! recovery.

mod engine;
mod funding;
mod keyset;
mod policy;
mod recovery;
pub mod shachain;
mod spec;
mod state;
pub mod tx;

pub use engine::{
    ChannelError, ChannelEvent, FailHtlcOp, FailMalformedHtlcOp, FailReason,
    FailedHtlcSignatures, FeeOp, FulfillHtlcOp, OnionError, Sphinx,
};
pub use funding::{
    Error as FundingError, Funding, PsbtChannelFunding,
    PSBT_LNC_PROPRIETARY_PREFIX, PSBT_OUT_LNC_CHANNEL_FUNDING,
};
pub use keyset::{
    derive_privkey, derive_pubkey, derive_revocation_privkey,
    derive_revocation_pubkey, ChannelSecrets, CommitmentKeyset, LocalKeyset,
    LocalPubkey, RemoteKeyset,
};
pub use policy::{
    PeerParams, Policy, BOLT3_DUST_LIMIT, BOLT3_MAX_ACCEPTED_HTLC_LIMIT,
};
pub use recovery::{
    create_penalty_tx, funds_from_local_commitment_tx,
    funds_from_remote_commitment_tx, validate_commitment_tx,
    CommitmentTxError, FundsSweep, RecoveryError,
};
pub use shachain::{ShachainError, ShachainStore};
pub use spec::{CommitmentSpec, HtlcDirection, HtlcRef, SpecError};
pub use state::{
    Changes, Commitments, HtlcOrigin, LocalCommit, PublishableTxs,
    RemoteCommit, RemoteNextCommitInfo,
};
pub use tx::{
    sort_both_htlc_txs, HtlcTx, ObscuredCommitmentNumber, ScriptGenerators,
    TX_VERSION_COMMITMENT,
};

/// Builders of a complete in-memory channel used by the engine and the
/// recovery test suites
#[cfg(test)]
pub(crate) mod fixtures {
    use amplify::{DumbDefault, Slice32, Wrapper};
    use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey, SECP256K1};
    use bitcoin::{PackedLockTime, Transaction, TxOut};
    use bitcoin_scripts::hlc::{HashLock, HashPreimage};
    use bitcoin_scripts::WitnessScript;
    use p2p::{ChannelId, OnionPacket, UpdateAddHtlc, ONION_HOP_DATA_LEN};
    use wallet::psbt::{Psbt, PsbtVersion};

    use super::tx::{make_commitment_txs, ScriptGenerators};
    use super::*;

    pub const FUNDING_SAT: u64 = 10_000_000;
    pub const FEERATE: u32 = 1000;

    pub fn sk(tag: u8) -> SecretKey {
        SecretKey::from_slice(&[tag; 32]).unwrap()
    }

    pub fn secrets(base: u8) -> ChannelSecrets {
        ChannelSecrets {
            funding_key: sk(base),
            revocation_basepoint_secret: sk(base + 1),
            payment_basepoint_secret: sk(base + 2),
            delayed_payment_basepoint_secret: sk(base + 3),
            htlc_basepoint_secret: sk(base + 4),
            per_commitment_seed: Slice32::from_inner([base + 5; 32]),
        }
    }

    pub fn local_keyset(secrets: &ChannelSecrets) -> LocalKeyset {
        let pk = |seckey: &SecretKey| LocalPubkey {
            key: PublicKey::from_secret_key(SECP256K1, seckey),
            ..LocalPubkey::dumb_default()
        };
        LocalKeyset {
            funding_pubkey: pk(&secrets.funding_key),
            revocation_basepoint: pk(&secrets.revocation_basepoint_secret),
            payment_basepoint: pk(&secrets.payment_basepoint_secret),
            delayed_payment_basepoint: pk(
                &secrets.delayed_payment_basepoint_secret,
            ),
            htlc_basepoint: pk(&secrets.htlc_basepoint_secret),
        }
    }

    pub fn remote_keyset(secrets: &ChannelSecrets) -> RemoteKeyset {
        let pk = |seckey: &SecretKey| {
            PublicKey::from_secret_key(SECP256K1, seckey)
        };
        RemoteKeyset {
            funding_pubkey: pk(&secrets.funding_key),
            revocation_basepoint: pk(&secrets.revocation_basepoint_secret),
            payment_basepoint: pk(&secrets.payment_basepoint_secret),
            delayed_payment_basepoint: pk(
                &secrets.delayed_payment_basepoint_secret,
            ),
            htlc_basepoint: pk(&secrets.htlc_basepoint_secret),
        }
    }

    pub fn funding(
        local_keys: &LocalKeyset,
        remote_keys: &RemoteKeyset,
    ) -> Funding {
        let witness_script = WitnessScript::ln_funding(
            FUNDING_SAT,
            &local_keys.funding_pubkey,
            remote_keys.funding_pubkey,
        );
        let tx = Transaction {
            version: 2,
            lock_time: PackedLockTime(0),
            input: vec![],
            output: vec![TxOut::ln_funding(
                FUNDING_SAT,
                &local_keys.funding_pubkey,
                remote_keys.funding_pubkey,
            )],
        };
        let mut psbt = Psbt::with(tx, PsbtVersion::V0).unwrap();
        psbt.set_channel_funding_output(0).unwrap();
        psbt.outputs[0].witness_script = Some(witness_script.into_inner());
        Funding::with(psbt).unwrap()
    }

    pub fn onion() -> OnionPacket {
        OnionPacket {
            version: 0,
            public_key: PublicKey::from_secret_key(
                SECP256K1,
                &secp256k1::ONE_KEY,
            ),
            hop_data: vec![0u8; ONION_HOP_DATA_LEN],
            hmac: Slice32::default(),
        }
    }

    pub fn preimage(tag: u8) -> HashPreimage {
        HashPreimage::from_inner(Slice32::from_inner([tag; 32]))
    }

    pub fn add_htlc(
        channel_id: ChannelId,
        id: u64,
        tag: u8,
    ) -> UpdateAddHtlc {
        UpdateAddHtlc {
            channel_id,
            htlc_id: id,
            amount_msat: 100_000_000,
            payment_hash: HashLock::from(preimage(tag)),
            cltv_expiry: 500_000,
            onion_routing_packet: onion(),
        }
    }

    /// Channel with one cross-signed incoming HTLC (id 0, preimage tag
    /// 0x21) and one cross-signed outgoing HTLC (id 0, preimage tag 0x42),
    /// local party being the funder
    pub fn test_channel() -> (Commitments, ChannelSecrets, ChannelSecrets) {
        let secp = Secp256k1::new();
        let local_secrets = secrets(0x10);
        let remote_secrets = secrets(0x30);
        let local_keys = local_keyset(&local_secrets);
        let remote_keys = remote_keyset(&remote_secrets);
        let funding = funding(&local_keys, &remote_keys);
        let channel_id = ChannelId::with(funding.outpoint());

        let incoming = add_htlc(channel_id, 0, 0x21);
        let outgoing = add_htlc(channel_id, 0, 0x42);

        let mut local_spec =
            CommitmentSpec::with(5_900_000_000, 3_900_000_000, FEERATE);
        local_spec
            .htlcs
            .insert(HtlcRef::incoming(0), incoming.clone());
        local_spec
            .htlcs
            .insert(HtlcRef::outgoing(0), outgoing.clone());

        let mut remote_spec =
            CommitmentSpec::with(3_900_000_000, 5_900_000_000, FEERATE);
        remote_spec.htlcs.insert(HtlcRef::incoming(0), outgoing);
        remote_spec.htlcs.insert(HtlcRef::outgoing(0), incoming);

        let local_point = shachain::per_commitment_point(
            &secp,
            shachain::from_seed(local_secrets.per_commitment_seed, 0),
        );
        let remote_point = shachain::per_commitment_point(
            &secp,
            shachain::from_seed(remote_secrets.per_commitment_seed, 0),
        );
        let next_remote_point = shachain::per_commitment_point(
            &secp,
            shachain::from_seed(remote_secrets.per_commitment_seed, 1),
        );

        let local_keyset_txs = CommitmentKeyset::for_local_commitment(
            &secp,
            &local_keys,
            &remote_keys,
            local_point,
        );
        let (local_commit_tx, local_htlc_txs) = make_commitment_txs(
            &funding,
            0,
            local_keys.payment_basepoint.key,
            remote_keys.payment_basepoint,
            true,
            PeerParams::default().dust_limit_satoshis,
            PeerParams::default().to_self_delay,
            &local_keyset_txs,
            &local_spec,
        );

        let remote_keyset_txs = CommitmentKeyset::for_remote_commitment(
            &secp,
            &local_keys,
            &remote_keys,
            remote_point,
        );
        let (remote_commit_tx, _) = make_commitment_txs(
            &funding,
            0,
            local_keys.payment_basepoint.key,
            remote_keys.payment_basepoint,
            false,
            PeerParams::default().dust_limit_satoshis,
            PeerParams::default().to_self_delay,
            &remote_keyset_txs,
            &remote_spec,
        );

        let cm = Commitments {
            channel_id,
            is_funder: true,
            policy: Policy::default(),
            local_params: PeerParams::default(),
            remote_params: PeerParams::default(),
            local_keys,
            remote_keys,
            funding,
            local_commit: LocalCommit {
                index: 0,
                spec: local_spec,
                publishable_txs: PublishableTxs {
                    commit_tx: local_commit_tx,
                    htlc_txs: local_htlc_txs,
                },
            },
            remote_commit: RemoteCommit {
                index: 0,
                spec: remote_spec,
                txid: remote_commit_tx.txid(),
                remote_per_commitment_point: remote_point,
            },
            remote_next_commit_info: RemoteNextCommitInfo::Revoked(
                next_remote_point,
            ),
            local_changes: default!(),
            remote_changes: default!(),
            origin_channels: bmap! {},
        };
        (cm, local_secrets, remote_secrets)
    }

    /// Rebuilds the current remote commitment transaction of the fixture
    /// channel, as the remote peer would broadcast it
    pub fn remote_commitment_tx(
        cm: &Commitments,
    ) -> (Transaction, Vec<HtlcTx>) {
        let secp = Secp256k1::new();
        let keys = CommitmentKeyset::for_remote_commitment(
            &secp,
            &cm.local_keys,
            &cm.remote_keys,
            cm.remote_commit.remote_per_commitment_point,
        );
        let (funder_basepoint, fundee_basepoint) =
            cm.obscuring_basepoints();
        make_commitment_txs(
            &cm.funding,
            cm.remote_commit.index,
            funder_basepoint,
            fundee_basepoint,
            !cm.is_funder,
            cm.remote_params.dust_limit_satoshis,
            cm.local_params.to_self_delay,
            &keys,
            &cm.remote_commit.spec,
        )
    }
}
