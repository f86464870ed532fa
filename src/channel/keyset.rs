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

use std::collections::BTreeMap;

use amplify::{DumbDefault, Slice32};
use bitcoin::hashes::{sha256, Hash, HashEngine};
use bitcoin::util::bip32::KeySource;
use secp256k1::{
    PublicKey, Scalar, Secp256k1, SecretKey, Signing, Verification,
};

/// Key + information about its derivation
#[derive(Clone, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
pub struct LocalPubkey {
    pub key: PublicKey,
    pub source: KeySource,
}

impl LocalPubkey {
    #[inline]
    pub fn to_bip32_derivation_map(&self) -> BTreeMap<PublicKey, KeySource> {
        bmap! { self.key => self.source.clone() }
    }

    #[inline]
    pub fn to_bitcoin_pk(&self) -> bitcoin::PublicKey {
        bitcoin::PublicKey::new(self.key)
    }
}

impl DumbDefault for LocalPubkey {
    fn dumb_default() -> Self {
        LocalPubkey {
            key: dumb_pubkey!(),
            source: KeySource::default(),
        }
    }
}

/// Set of basepoints used by the local node for deriving keys of channel
/// transactions
#[derive(Clone, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
pub struct LocalKeyset {
    /// Public key used in the funding outpoint multisig
    pub funding_pubkey: LocalPubkey,
    /// Base point for deriving keys used for penalty spending paths
    pub revocation_basepoint: LocalPubkey,
    /// Base point for deriving keys in `to_remote`
    pub payment_basepoint: LocalPubkey,
    /// Base point for deriving keys in `to_local` time-locked spending paths
    pub delayed_payment_basepoint: LocalPubkey,
    /// Base point for deriving HTLC-related keys
    pub htlc_basepoint: LocalPubkey,
}

/// Set of basepoints announced by the remote node
#[derive(Copy, Clone, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
pub struct RemoteKeyset {
    /// Public key used in the funding outpoint multisig
    pub funding_pubkey: PublicKey,
    /// Base point for deriving keys used for penalty spending paths
    pub revocation_basepoint: PublicKey,
    /// Base point for deriving keys in `to_remote`
    pub payment_basepoint: PublicKey,
    /// Base point for deriving keys in `to_local` time-locked spending paths
    pub delayed_payment_basepoint: PublicKey,
    /// Base point for deriving HTLC-related keys
    pub htlc_basepoint: PublicKey,
}

impl DumbDefault for LocalKeyset {
    fn dumb_default() -> Self {
        Self {
            funding_pubkey: DumbDefault::dumb_default(),
            revocation_basepoint: DumbDefault::dumb_default(),
            payment_basepoint: DumbDefault::dumb_default(),
            delayed_payment_basepoint: DumbDefault::dumb_default(),
            htlc_basepoint: DumbDefault::dumb_default(),
        }
    }
}

impl DumbDefault for RemoteKeyset {
    fn dumb_default() -> Self {
        Self {
            funding_pubkey: dumb_pubkey!(),
            revocation_basepoint: dumb_pubkey!(),
            payment_basepoint: dumb_pubkey!(),
            delayed_payment_basepoint: dumb_pubkey!(),
            htlc_basepoint: dumb_pubkey!(),
        }
    }
}

/// Private counterparts of [`LocalKeyset`] basepoints, together with the
/// seed of the local per-commitment secret chain.
///
/// The engine never stores a copy of this structure inside channel state; it
/// is borrowed for the duration of a signing call only, and wiping it after
/// use is the caller's duty.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ChannelSecrets {
    /// Private key of the funding multisig
    pub funding_key: SecretKey,
    /// Private counterpart of the revocation basepoint
    pub revocation_basepoint_secret: SecretKey,
    /// Private counterpart of the payment basepoint
    pub payment_basepoint_secret: SecretKey,
    /// Private counterpart of the delayed payment basepoint
    pub delayed_payment_basepoint_secret: SecretKey,
    /// Private counterpart of the HTLC basepoint
    pub htlc_basepoint_secret: SecretKey,
    /// Seed of the local shachain of per-commitment secrets
    pub per_commitment_seed: Slice32,
}

/// Derives a commitment-level public key from its basepoint:
/// `basepoint + SHA256(per_commitment_point || basepoint) * G`
pub fn derive_pubkey<C: Verification>(
    secp: &Secp256k1<C>,
    basepoint: PublicKey,
    per_commitment_point: PublicKey,
) -> PublicKey {
    let mut engine = sha256::Hash::engine();
    engine.input(&per_commitment_point.serialize());
    engine.input(&basepoint.serialize());
    let tweak = sha256::Hash::from_engine(engine);

    basepoint
        .add_exp_tweak(
            secp,
            &Scalar::from_be_bytes(tweak.into_inner())
                .expect("negligible probability"),
        )
        .expect("negligible probability")
}

/// Private counterpart of [`derive_pubkey`]
pub fn derive_privkey<C: Signing>(
    secp: &Secp256k1<C>,
    basepoint_secret: SecretKey,
    per_commitment_point: PublicKey,
) -> SecretKey {
    let basepoint = PublicKey::from_secret_key(secp, &basepoint_secret);

    let mut engine = sha256::Hash::engine();
    engine.input(&per_commitment_point.serialize());
    engine.input(&basepoint.serialize());
    let tweak = sha256::Hash::from_engine(engine);

    basepoint_secret
        .add_tweak(
            &Scalar::from_be_bytes(tweak.into_inner())
                .expect("negligible probability"),
        )
        .expect("negligible probability")
}

/// Derives the revocation public key:
/// `revocation_basepoint * SHA256(revocation_basepoint ||
/// per_commitment_point) + per_commitment_point *
/// SHA256(per_commitment_point || revocation_basepoint)`
pub fn derive_revocation_pubkey<C: Verification>(
    secp: &Secp256k1<C>,
    revocation_basepoint: PublicKey,
    per_commitment_point: PublicKey,
) -> PublicKey {
    let mut engine = sha256::Hash::engine();
    engine.input(&revocation_basepoint.serialize());
    engine.input(&per_commitment_point.serialize());
    let revocation_tweak = sha256::Hash::from_engine(engine);

    let mut engine = sha256::Hash::engine();
    engine.input(&per_commitment_point.serialize());
    engine.input(&revocation_basepoint.serialize());
    let per_commitment_tweak = sha256::Hash::from_engine(engine);

    let tweaked_revocation_basepoint = revocation_basepoint
        .mul_tweak(
            secp,
            &Scalar::from_be_bytes(revocation_tweak.into_inner())
                .expect("negligible probability"),
        )
        .expect("negligible probability");
    let tweaked_per_commitment_point = per_commitment_point
        .mul_tweak(
            secp,
            &Scalar::from_be_bytes(per_commitment_tweak.into_inner())
                .expect("negligible probability"),
        )
        .expect("negligible probability");

    tweaked_revocation_basepoint
        .combine(&tweaked_per_commitment_point)
        .expect("negligible probability")
}

/// Private counterpart of [`derive_revocation_pubkey`]; requires knowledge
/// of both the revocation basepoint secret and the revealed per-commitment
/// secret
pub fn derive_revocation_privkey<C: Signing>(
    secp: &Secp256k1<C>,
    revocation_basepoint_secret: SecretKey,
    per_commitment_secret: SecretKey,
) -> SecretKey {
    let revocation_basepoint =
        PublicKey::from_secret_key(secp, &revocation_basepoint_secret);
    let per_commitment_point =
        PublicKey::from_secret_key(secp, &per_commitment_secret);

    let mut engine = sha256::Hash::engine();
    engine.input(&revocation_basepoint.serialize());
    engine.input(&per_commitment_point.serialize());
    let revocation_tweak = sha256::Hash::from_engine(engine);

    let mut engine = sha256::Hash::engine();
    engine.input(&per_commitment_point.serialize());
    engine.input(&revocation_basepoint.serialize());
    let per_commitment_tweak = sha256::Hash::from_engine(engine);

    let tweaked_revocation_secret = revocation_basepoint_secret
        .mul_tweak(
            &Scalar::from_be_bytes(revocation_tweak.into_inner())
                .expect("negligible probability"),
        )
        .expect("negligible probability");
    let tweaked_per_commitment_secret = per_commitment_secret
        .mul_tweak(
            &Scalar::from_be_bytes(per_commitment_tweak.into_inner())
                .expect("negligible probability"),
        )
        .expect("negligible probability");

    tweaked_revocation_secret
        .add_tweak(
            &Scalar::from_be_bytes(
                tweaked_per_commitment_secret.secret_bytes(),
            )
            .expect("negligible probability"),
        )
        .expect("negligible probability")
}

/// Full set of keys used within a single commitment transaction of one of
/// the channel parties, derived from the party basepoints at a concrete
/// per-commitment point.
///
/// All names are given from the point of view of the commitment owner: the
/// broadcaster of this commitment transaction.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct CommitmentKeyset {
    /// The per-commitment point the keyset is derived at
    pub per_commitment_point: PublicKey,
    /// Key of the penalty spending path; controlled by the counterparty
    /// once the commitment is revoked
    pub revocation_pubkey: PublicKey,
    /// Key of the owner `to_local` time-locked spending path
    pub delayed_payment_pubkey: PublicKey,
    /// HTLC key of the owner
    pub htlc_pubkey: PublicKey,
    /// HTLC key of the counterparty
    pub counterparty_htlc_pubkey: PublicKey,
    /// Key paying the counterparty main output (`to_remote`)
    pub counterparty_payment_pubkey: PublicKey,
}

impl CommitmentKeyset {
    /// Derives the keyset of a local commitment transaction at the given
    /// local per-commitment point
    pub fn for_local_commitment<C: Verification>(
        secp: &Secp256k1<C>,
        local_keys: &LocalKeyset,
        remote_keys: &RemoteKeyset,
        per_commitment_point: PublicKey,
    ) -> CommitmentKeyset {
        CommitmentKeyset {
            per_commitment_point,
            revocation_pubkey: derive_revocation_pubkey(
                secp,
                remote_keys.revocation_basepoint,
                per_commitment_point,
            ),
            delayed_payment_pubkey: derive_pubkey(
                secp,
                local_keys.delayed_payment_basepoint.key,
                per_commitment_point,
            ),
            htlc_pubkey: derive_pubkey(
                secp,
                local_keys.htlc_basepoint.key,
                per_commitment_point,
            ),
            counterparty_htlc_pubkey: derive_pubkey(
                secp,
                remote_keys.htlc_basepoint,
                per_commitment_point,
            ),
            counterparty_payment_pubkey: derive_pubkey(
                secp,
                remote_keys.payment_basepoint,
                per_commitment_point,
            ),
        }
    }

    /// Derives the keyset of a remote commitment transaction at the given
    /// remote per-commitment point
    pub fn for_remote_commitment<C: Verification>(
        secp: &Secp256k1<C>,
        local_keys: &LocalKeyset,
        remote_keys: &RemoteKeyset,
        per_commitment_point: PublicKey,
    ) -> CommitmentKeyset {
        CommitmentKeyset {
            per_commitment_point,
            revocation_pubkey: derive_revocation_pubkey(
                secp,
                local_keys.revocation_basepoint.key,
                per_commitment_point,
            ),
            delayed_payment_pubkey: derive_pubkey(
                secp,
                remote_keys.delayed_payment_basepoint,
                per_commitment_point,
            ),
            htlc_pubkey: derive_pubkey(
                secp,
                remote_keys.htlc_basepoint,
                per_commitment_point,
            ),
            counterparty_htlc_pubkey: derive_pubkey(
                secp,
                local_keys.htlc_basepoint.key,
                per_commitment_point,
            ),
            counterparty_payment_pubkey: derive_pubkey(
                secp,
                local_keys.payment_basepoint.key,
                per_commitment_point,
            ),
        }
    }
}
