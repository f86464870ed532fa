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

//! Commitment update engine: the protocol operations driving a channel
//! between two `commitment_signed` exchanges.
//!
//! Every operation is a pure transformation `(cm, input) -> (events, cm')`:
//! nothing is mutated in place, the returned [`Commitments`] replaces the
//! old value atomically in the caller, and a failed operation leaves no
//! trace. The caller is responsible for serializing operations per channel;
//! across channels operations are trivially parallel.

use amplify::{Slice32, Wrapper};
use bitcoin::hashes::sha256;
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::Txid;
use bitcoin_scripts::hlc::{HashLock, HashPreimage};
use p2p::{
    CommitmentSigned, FailureCode, OnionPacket, RevokeAndAck, UpdateAddHtlc,
    UpdateFailHtlc, UpdateFailMalformedHtlc, UpdateFee, UpdateFulfillHtlc,
};

use super::keyset::{derive_privkey, ChannelSecrets, CommitmentKeyset};
use super::shachain;
use super::spec::SpecError;
use super::state::{
    Commitments, HtlcOrigin, LocalCommit, PublishableTxs, RemoteCommit,
    RemoteNextCommitInfo,
};
use super::tx::{
    commit_tx_fee, finalize_funding_witness, finalize_htlc_timeout_witness,
    make_commitment_txs, sign_tx_input, verify_tx_input_signature,
};

/// Errors of the sphinx entry points used by the engine
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum OnionError {
    /// onion packet version {0} is not supported
    UnsupportedVersion(u8),

    /// onion packet HMAC does not verify for the payment hash it commits to
    BadHmac,

    /// onion packet session key does not belong to secp256k1 curve
    BadSessionKey,
}

/// Entry points into a sphinx onion implementation.
///
/// The engine needs exactly three of them: resolving the shared secret of
/// the local hop, and wrapping a failure into an error packet either by
/// re-wrapping an downstream error or by creating a fresh one. Everything
/// else about onions is a node concern.
pub trait Sphinx {
    /// Resolves the shared secret the incoming HTLC onion was encrypted
    /// with at the local hop
    fn parse_packet(
        &self,
        node_secret: &SecretKey,
        payment_hash: &[u8],
        packet: &OnionPacket,
    ) -> Result<Slice32, OnionError>;

    /// Re-wraps a downstream failure packet for relaying towards the
    /// payment originator
    fn forward_error_packet(
        &self,
        reason: &[u8],
        shared_secret: Slice32,
    ) -> Vec<u8>;

    /// Creates a failure packet reporting a local failure code
    fn create_error_packet(
        &self,
        shared_secret: Slice32,
        failure_code: FailureCode,
    ) -> Vec<u8>;
}

/// Commitment output indexes whose HTLC transaction signatures failed
/// verification
#[derive(
    Wrapper, Clone, PartialEq, Eq, Hash, Debug, Default, From,
)]
pub struct FailedHtlcSignatures(Vec<u32>);

impl std::fmt::Display for FailedHtlcSignatures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for vout in &self.0 {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "#{}", vout)?;
            first = false;
        }
        Ok(())
    }
}

/// Errors returned by the commitment engine operations
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum ChannelError {
    /// HTLC with id {0} is not a part of both current commitments, so it
    /// can't be settled
    UnknownHtlcId(u64),

    /// a settlement for HTLC {0} is already staged and awaits signing
    HtlcAlreadySent(u64),

    /// provided preimage does not hash into the payment hash {0} of the
    /// HTLC being fulfilled
    InvalidPaymentPreimage(HashLock),

    /// failure code {0} of `update_fail_malformed_htlc` does not have the
    /// required BADONION bit set
    InvalidFailureCode(FailureCode),

    /// committing the fee update would leave the funder balance short of
    /// {missing} sat on top of the {channel_reserve} sat channel reserve
    /// and the {fee} sat commitment fee
    CannotAffordFee {
        channel_reserve: u64,
        fee: u64,
        missing: u64,
    },

    /// `update_fee` may only be originated by the channel funder
    UpdateFeeFromFundee,

    /// feerate {proposed} sat/kw proposed by the peer is too distant from
    /// the locally estimated {local} sat/kw
    FeerateMismatch { proposed: u32, local: u32 },

    /// improper use of the channel API: {0}
    ApiMisuse(&'static str),

    /// a new commitment can't be signed until the previously signed one is
    /// revoked by the peer
    CanNotSignBeforeRevocation,

    /// received `commitment_signed` while the peer has no staged changes
    /// to sign
    ReceivedCommitmentSignedWhenWeHaveNoPendingChanges,

    /// peer signature does not finalize the funding input of commitment
    /// transaction {0}
    InvalidCommitmentSignature(Txid),

    /// `commitment_signed` carries {got} HTLC signatures while the new
    /// commitment requires {expected}
    SignatureCountMismatch { expected: usize, got: usize },

    /// peer signatures for the HTLC transactions spending commitment
    /// outputs {0} do not verify
    InvalidHtlcSignatures(FailedHtlcSignatures),

    /// received `revoke_and_ack` while no unrevoked commitment is
    /// outstanding
    UnexpectedRevokeAndAck,

    /// the revealed per-commitment secret does not match the revoked
    /// commitment point
    InvalidRevokeAndAck,

    /// failure of the commitment spec reduction
    #[from]
    #[display(inner)]
    Spec(SpecError),

    /// onion processing failure
    #[from]
    #[display(inner)]
    Onion(OnionError),
}

/// Instruction to settle an incoming HTLC with its payment preimage
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct FulfillHtlcOp {
    pub htlc_id: u64,
    pub payment_preimage: HashPreimage,
}

/// Failure payload of an [`FailHtlcOp`]
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum FailReason {
    /// Re-wrap a failure packet received from a downstream hop
    Forward(Vec<u8>),
    /// Report a failure of the local hop
    Local(FailureCode),
}

/// Instruction to fail an incoming HTLC
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct FailHtlcOp {
    pub htlc_id: u64,
    pub reason: FailReason,
}

/// Instruction to reject an incoming HTLC whose onion could not be parsed
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct FailMalformedHtlcOp {
    pub htlc_id: u64,
    pub sha256_of_onion: sha256::Hash,
    pub failure_code: FailureCode,
}

/// Instruction to change the channel fee rate
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct FeeOp {
    pub feerate_per_kw: u32,
}

/// Descriptors of what an accepted operation did, handed to the node layer
/// together with the replacement [`Commitments`]
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ChannelEvent {
    /// `update_fulfill_htlc` was staged and must be transmitted to the peer
    WeProposedFulfillHtlc { message: UpdateFulfillHtlc },

    /// Peer fulfilled one of our outgoing HTLCs
    WeAcceptedFulfillHtlc {
        message: UpdateFulfillHtlc,
        origin: HtlcOrigin,
        htlc: UpdateAddHtlc,
    },

    /// `update_fail_htlc` was staged and must be transmitted to the peer
    WeProposedFailHtlc { message: UpdateFailHtlc },

    /// Peer failed one of our outgoing HTLCs
    WeAcceptedFailHtlc {
        message: UpdateFailHtlc,
        origin: HtlcOrigin,
        htlc: UpdateAddHtlc,
    },

    /// `update_fail_malformed_htlc` was staged and must be transmitted to
    /// the peer
    WeProposedFailMalformedHtlc { message: UpdateFailMalformedHtlc },

    /// Peer reported one of our outgoing HTLC onions as malformed
    WeAcceptedFailMalformedHtlc {
        message: UpdateFailMalformedHtlc,
        origin: HtlcOrigin,
        htlc: UpdateAddHtlc,
    },

    /// `update_fee` was staged and must be transmitted to the peer
    WeProposedFee { message: UpdateFee },

    /// Peer changed the channel fee rate
    WeAcceptedFee { message: UpdateFee },

    /// We signed the next remote commitment; the message must be
    /// transmitted to the peer
    WeSignedCommitment {
        message: CommitmentSigned,
        remote_commit: RemoteCommit,
    },

    /// We accepted a `commitment_signed` and advanced to a new local
    /// commitment; the revocation must be transmitted to the peer
    WeAcceptedCommitment {
        message: RevokeAndAck,
        local_commit: LocalCommit,
    },

    /// Peer revoked its previous commitment. The revealed secret must be
    /// added to the shachain store of the channel.
    WeAcceptedRevokeAndAck {
        per_commitment_secret: SecretKey,
        commitment_number: u64,
    },
}

impl Commitments {
    /// Stages a fulfillment of an incoming HTLC, producing the
    /// `update_fulfill_htlc` to transmit
    pub fn send_fulfill(
        &self,
        op: &FulfillHtlcOp,
    ) -> Result<(Vec<ChannelEvent>, Commitments), ChannelError> {
        let htlc = self
            .incoming_htlc_cross_signed(op.htlc_id)
            .ok_or(ChannelError::UnknownHtlcId(op.htlc_id))?;
        if self.is_update_already_sent(op.htlc_id) {
            return Err(ChannelError::HtlcAlreadySent(op.htlc_id));
        }
        if HashLock::from(op.payment_preimage) != htlc.payment_hash {
            return Err(ChannelError::InvalidPaymentPreimage(
                htlc.payment_hash,
            ));
        }

        let message = UpdateFulfillHtlc {
            channel_id: self.channel_id,
            htlc_id: op.htlc_id,
            payment_preimage: op.payment_preimage,
        };
        let mut next = self.clone();
        next.local_changes.proposed.push(message.clone().into());
        Ok((
            vec![ChannelEvent::WeProposedFulfillHtlc { message }],
            next,
        ))
    }

    /// Accepts a peer fulfillment of one of our outgoing HTLCs
    pub fn receive_fulfill(
        &self,
        message: &UpdateFulfillHtlc,
    ) -> Result<(Vec<ChannelEvent>, Commitments), ChannelError> {
        let htlc = self
            .outgoing_htlc_cross_signed(message.htlc_id)
            .ok_or(ChannelError::UnknownHtlcId(message.htlc_id))?
            .clone();
        if HashLock::from(message.payment_preimage) != htlc.payment_hash {
            return Err(ChannelError::InvalidPaymentPreimage(
                htlc.payment_hash,
            ));
        }
        let origin = self.origin(message.htlc_id);

        let mut next = self.clone();
        next.remote_changes.proposed.push(message.clone().into());
        Ok((
            vec![ChannelEvent::WeAcceptedFulfillHtlc {
                message: message.clone(),
                origin,
                htlc,
            }],
            next,
        ))
    }

    /// Stages a failure of an incoming HTLC, building the encrypted failure
    /// packet through the provided sphinx implementation
    pub fn send_fail<S: Sphinx>(
        &self,
        sphinx: &S,
        node_secret: &SecretKey,
        op: &FailHtlcOp,
    ) -> Result<(Vec<ChannelEvent>, Commitments), ChannelError> {
        let htlc = self
            .incoming_htlc_cross_signed(op.htlc_id)
            .ok_or(ChannelError::UnknownHtlcId(op.htlc_id))?;
        if self.is_update_already_sent(op.htlc_id) {
            return Err(ChannelError::HtlcAlreadySent(op.htlc_id));
        }

        let shared_secret = sphinx.parse_packet(
            node_secret,
            htlc.payment_hash.as_ref(),
            &htlc.onion_routing_packet,
        )?;
        let reason = match &op.reason {
            FailReason::Forward(packet) => {
                sphinx.forward_error_packet(packet, shared_secret)
            }
            FailReason::Local(failure_code) => {
                sphinx.create_error_packet(shared_secret, *failure_code)
            }
        };

        let message = UpdateFailHtlc {
            channel_id: self.channel_id,
            htlc_id: op.htlc_id,
            reason,
        };
        let mut next = self.clone();
        next.local_changes.proposed.push(message.clone().into());
        Ok((vec![ChannelEvent::WeProposedFailHtlc { message }], next))
    }

    /// Accepts a peer failure of one of our outgoing HTLCs
    pub fn receive_fail(
        &self,
        message: &UpdateFailHtlc,
    ) -> Result<(Vec<ChannelEvent>, Commitments), ChannelError> {
        let htlc = self
            .outgoing_htlc_cross_signed(message.htlc_id)
            .ok_or(ChannelError::UnknownHtlcId(message.htlc_id))?
            .clone();
        let origin = self.origin(message.htlc_id);

        let mut next = self.clone();
        next.remote_changes.proposed.push(message.clone().into());
        Ok((
            vec![ChannelEvent::WeAcceptedFailHtlc {
                message: message.clone(),
                origin,
                htlc,
            }],
            next,
        ))
    }

    /// Stages a rejection of an incoming HTLC whose onion could not be
    /// parsed. The failure code must carry the BADONION bit.
    pub fn send_fail_malformed(
        &self,
        op: &FailMalformedHtlcOp,
    ) -> Result<(Vec<ChannelEvent>, Commitments), ChannelError> {
        if !op.failure_code.is_badonion() {
            return Err(ChannelError::InvalidFailureCode(op.failure_code));
        }
        self.incoming_htlc_cross_signed(op.htlc_id)
            .ok_or(ChannelError::UnknownHtlcId(op.htlc_id))?;
        if self.is_update_already_sent(op.htlc_id) {
            return Err(ChannelError::HtlcAlreadySent(op.htlc_id));
        }

        let message = UpdateFailMalformedHtlc {
            channel_id: self.channel_id,
            htlc_id: op.htlc_id,
            sha256_of_onion: op.sha256_of_onion,
            failure_code: op.failure_code,
        };
        let mut next = self.clone();
        next.local_changes.proposed.push(message.clone().into());
        Ok((
            vec![ChannelEvent::WeProposedFailMalformedHtlc { message }],
            next,
        ))
    }

    /// Accepts a peer report of one of our outgoing HTLC onions being
    /// malformed
    pub fn receive_fail_malformed(
        &self,
        message: &UpdateFailMalformedHtlc,
    ) -> Result<(Vec<ChannelEvent>, Commitments), ChannelError> {
        if !message.failure_code.is_badonion() {
            return Err(ChannelError::InvalidFailureCode(
                message.failure_code,
            ));
        }
        let htlc = self
            .outgoing_htlc_cross_signed(message.htlc_id)
            .ok_or(ChannelError::UnknownHtlcId(message.htlc_id))?
            .clone();
        let origin = self.origin(message.htlc_id);

        let mut next = self.clone();
        next.remote_changes.proposed.push(message.clone().into());
        Ok((
            vec![ChannelEvent::WeAcceptedFailMalformedHtlc {
                message: message.clone(),
                origin,
                htlc,
            }],
            next,
        ))
    }

    /// Stages a fee rate change. Only the channel funder may originate
    /// `update_fee`, and the updated commitment must keep the funder
    /// balance above the channel reserve.
    pub fn send_fee(
        &self,
        op: &FeeOp,
    ) -> Result<(Vec<ChannelEvent>, Commitments), ChannelError> {
        if !self.is_funder {
            return Err(ChannelError::UpdateFeeFromFundee);
        }
        let message = UpdateFee {
            channel_id: self.channel_id,
            feerate_per_kw: op.feerate_per_kw,
        };
        let mut next = self.clone();
        next.local_changes.proposed.push(message.clone().into());

        let reduced = next.remote_commit.spec.reduce(
            &next.remote_changes.acked,
            &next.local_changes.proposed,
        )?;
        let fee = commit_tx_fee(
            next.remote_params.dust_limit_satoshis,
            &reduced,
        );
        next.check_funder_can_afford(
            reduced.to_remote_msat / 1000,
            next.remote_params.channel_reserve_satoshis,
            fee,
        )?;

        Ok((vec![ChannelEvent::WeProposedFee { message }], next))
    }

    /// Accepts a fee rate change from the peer. `local_feerate` is the fee
    /// rate currently estimated by the local node, used for the mismatch
    /// policy check.
    pub fn receive_fee(
        &self,
        local_feerate: u32,
        message: &UpdateFee,
    ) -> Result<(Vec<ChannelEvent>, Commitments), ChannelError> {
        if self.is_funder {
            return Err(ChannelError::UpdateFeeFromFundee);
        }
        if !self
            .policy
            .is_feerate_acceptable(message.feerate_per_kw, local_feerate)
        {
            return Err(ChannelError::FeerateMismatch {
                proposed: message.feerate_per_kw,
                local: local_feerate,
            });
        }

        let mut next = self.clone();
        next.remote_changes.proposed.push(message.clone().into());

        let reduced = next.local_commit.spec.reduce(
            &next.local_changes.acked,
            &next.remote_changes.proposed,
        )?;
        let fee =
            commit_tx_fee(next.local_params.dust_limit_satoshis, &reduced);
        next.check_funder_can_afford(
            reduced.to_remote_msat / 1000,
            next.local_params.channel_reserve_satoshis,
            fee,
        )?;

        Ok((
            vec![ChannelEvent::WeAcceptedFee {
                message: message.clone(),
            }],
            next,
        ))
    }

    fn check_funder_can_afford(
        &self,
        funder_balance_sat: u64,
        channel_reserve: u64,
        fee: u64,
    ) -> Result<(), ChannelError> {
        let missing = funder_balance_sat as i64
            - channel_reserve as i64
            - fee as i64;
        if missing < 0 {
            return Err(ChannelError::CannotAffordFee {
                channel_reserve,
                fee,
                missing: missing.unsigned_abs(),
            });
        }
        Ok(())
    }

    /// Signs the next remote commitment transaction, covering all staged
    /// changes, and produces the `commitment_signed` to transmit.
    ///
    /// HTLC signatures are emitted in the canonical order: ascending by the
    /// commitment output the HTLC transaction spends.
    pub fn send_commit(
        &self,
        secrets: &ChannelSecrets,
    ) -> Result<(Vec<ChannelEvent>, Commitments), ChannelError> {
        let secp = Secp256k1::new();

        let remote_point = match &self.remote_next_commit_info {
            RemoteNextCommitInfo::Revoked(point) => *point,
            RemoteNextCommitInfo::Waiting(_) => {
                return Err(ChannelError::CanNotSignBeforeRevocation)
            }
        };

        let spec = self.remote_commit.spec.reduce(
            &self.remote_changes.acked,
            &self.local_changes.proposed,
        )?;
        let index = self.remote_commit.index + 1;
        let keys = CommitmentKeyset::for_remote_commitment(
            &secp,
            &self.local_keys,
            &self.remote_keys,
            remote_point,
        );
        let (funder_basepoint, fundee_basepoint) =
            self.obscuring_basepoints();
        let (commitment_tx, htlc_txs) = make_commitment_txs(
            &self.funding,
            index,
            funder_basepoint,
            fundee_basepoint,
            !self.is_funder,
            self.remote_params.dust_limit_satoshis,
            self.local_params.to_self_delay,
            &keys,
            &spec,
        );

        let signature = sign_tx_input(
            &secp,
            &commitment_tx,
            0,
            self.funding.script().as_inner(),
            self.funding.amount(),
            &secrets.funding_key,
        );
        let htlc_seckey =
            derive_privkey(&secp, secrets.htlc_basepoint_secret, remote_point);
        let htlc_signatures = htlc_txs
            .iter()
            .map(|htlc_tx| {
                sign_tx_input(
                    &secp,
                    htlc_tx.tx(),
                    htlc_tx.which_input() as usize,
                    htlc_tx.witness_script().as_inner(),
                    htlc_tx.value(),
                    &htlc_seckey,
                )
            })
            .collect::<Vec<_>>();

        let message = CommitmentSigned {
            channel_id: self.channel_id,
            signature,
            htlc_signatures,
        };
        let remote_commit = RemoteCommit {
            index,
            spec,
            txid: commitment_tx.txid(),
            remote_per_commitment_point: remote_point,
        };

        let mut next = self.clone();
        next.local_changes.signed = next.local_changes.proposed;
        next.local_changes.proposed = vec![];
        next.remote_changes.signed = next.remote_changes.acked;
        next.remote_changes.acked = vec![];
        next.remote_next_commit_info =
            RemoteNextCommitInfo::Waiting(remote_commit.clone());

        Ok((
            vec![ChannelEvent::WeSignedCommitment {
                message,
                remote_commit,
            }],
            next,
        ))
    }

    /// Verifies a `commitment_signed` from the peer, advances to the new
    /// local commitment and produces the `revoke_and_ack` to transmit.
    ///
    /// The funding signature is checked fail-fast; HTLC signature failures
    /// are aggregated so the caller sees the full picture.
    pub fn receive_commit(
        &self,
        secrets: &ChannelSecrets,
        message: &CommitmentSigned,
    ) -> Result<(Vec<ChannelEvent>, Commitments), ChannelError> {
        let secp = Secp256k1::new();

        if !self.remote_has_changes() {
            return Err(
                ChannelError::ReceivedCommitmentSignedWhenWeHaveNoPendingChanges,
            );
        }

        let spec = self.local_commit.spec.reduce(
            &self.local_changes.acked,
            &self.remote_changes.proposed,
        )?;
        let index = self.local_commit.index + 1;
        let local_point = shachain::per_commitment_point(
            &secp,
            shachain::from_seed(secrets.per_commitment_seed, index),
        );
        let keys = CommitmentKeyset::for_local_commitment(
            &secp,
            &self.local_keys,
            &self.remote_keys,
            local_point,
        );
        let (funder_basepoint, fundee_basepoint) =
            self.obscuring_basepoints();
        let (mut commitment_tx, mut htlc_txs) = make_commitment_txs(
            &self.funding,
            index,
            funder_basepoint,
            fundee_basepoint,
            self.is_funder,
            self.local_params.dust_limit_satoshis,
            self.remote_params.to_self_delay,
            &keys,
            &spec,
        );

        // Funding signature must finalize the 2-of-2; fail fast otherwise
        verify_tx_input_signature(
            &secp,
            &commitment_tx,
            0,
            self.funding.script().as_inner(),
            self.funding.amount(),
            &message.signature,
            &self.remote_keys.funding_pubkey,
        )
        .map_err(|_| {
            ChannelError::InvalidCommitmentSignature(commitment_tx.txid())
        })?;
        let local_funding_signature = sign_tx_input(
            &secp,
            &commitment_tx,
            0,
            self.funding.script().as_inner(),
            self.funding.amount(),
            &secrets.funding_key,
        );
        let funding_script = self.funding.script().clone();
        finalize_funding_witness(
            &mut commitment_tx,
            0,
            &funding_script,
            (
                self.local_keys.funding_pubkey.key,
                local_funding_signature,
            ),
            (self.remote_keys.funding_pubkey, message.signature),
        );

        if message.htlc_signatures.len() != htlc_txs.len() {
            return Err(ChannelError::SignatureCountMismatch {
                expected: htlc_txs.len(),
                got: message.htlc_signatures.len(),
            });
        }

        let htlc_seckey =
            derive_privkey(&secp, secrets.htlc_basepoint_secret, local_point);
        let mut failed = vec![];
        for (htlc_tx, remote_signature) in
            htlc_txs.iter_mut().zip(&message.htlc_signatures)
        {
            let valid = verify_tx_input_signature(
                &secp,
                htlc_tx.tx(),
                htlc_tx.which_input() as usize,
                htlc_tx.witness_script().as_inner(),
                htlc_tx.value(),
                remote_signature,
                &keys.counterparty_htlc_pubkey,
            )
            .is_ok();
            if !valid {
                failed.push(htlc_tx.spent_commitment_vout());
                continue;
            }
            htlc_tx.set_remote_signature(*remote_signature);
            if htlc_tx.is_timeout() {
                // HTLC-timeout transactions are complete once our own
                // signature is added; HTLC-success ones await the preimage
                let local_signature = sign_tx_input(
                    &secp,
                    htlc_tx.tx(),
                    htlc_tx.which_input() as usize,
                    htlc_tx.witness_script().as_inner(),
                    htlc_tx.value(),
                    &htlc_seckey,
                );
                let which_input = htlc_tx.which_input() as usize;
                let witness_script = htlc_tx.witness_script().clone();
                finalize_htlc_timeout_witness(
                    htlc_tx.tx_mut(),
                    which_input,
                    &witness_script,
                    remote_signature,
                    &local_signature,
                );
            }
        }
        if !failed.is_empty() {
            return Err(ChannelError::InvalidHtlcSignatures(
                FailedHtlcSignatures::from_inner(failed),
            ));
        }

        // Reveal the secret of the commitment being left behind, together
        // with the point two steps ahead of it
        let old_secret = shachain::from_seed(
            secrets.per_commitment_seed,
            self.local_commit.index,
        );
        let next_point = shachain::per_commitment_point(
            &secp,
            shachain::from_seed(secrets.per_commitment_seed, index + 1),
        );
        let revoke_and_ack = RevokeAndAck {
            channel_id: self.channel_id,
            per_commitment_secret: SecretKey::from_slice(
                old_secret.as_inner(),
            )
            .expect("negligible probability"),
            next_per_commitment_point: next_point,
        };

        let local_commit = LocalCommit {
            index,
            spec: spec.clone(),
            publishable_txs: PublishableTxs {
                commit_tx: commitment_tx,
                htlc_txs,
            },
        };

        let mut next = self.clone();
        next.local_commit = local_commit.clone();
        next.local_changes.acked = vec![];
        let newly_acked = next.remote_changes.proposed;
        next.remote_changes.proposed = vec![];
        next.remote_changes.acked.extend(newly_acked);
        next.prune_origins(&spec);

        Ok((
            vec![ChannelEvent::WeAcceptedCommitment {
                message: revoke_and_ack,
                local_commit,
            }],
            next,
        ))
    }

    /// Accepts a `revoke_and_ack` for the previously signed remote
    /// commitment. The revealed secret is handed back in the event for
    /// insertion into the channel shachain store.
    pub fn receive_revoke_and_ack(
        &self,
        message: &RevokeAndAck,
    ) -> Result<(Vec<ChannelEvent>, Commitments), ChannelError> {
        let secp = Secp256k1::new();

        let next_remote_commit = match &self.remote_next_commit_info {
            RemoteNextCommitInfo::Waiting(commit) => commit.clone(),
            RemoteNextCommitInfo::Revoked(_) => {
                return Err(ChannelError::UnexpectedRevokeAndAck)
            }
        };
        let revealed_point = bitcoin::secp256k1::PublicKey::from_secret_key(
            &secp,
            &message.per_commitment_secret,
        );
        if revealed_point != self.remote_commit.remote_per_commitment_point {
            return Err(ChannelError::InvalidRevokeAndAck);
        }

        let revoked_number = self.remote_commit.index;
        let mut next = self.clone();
        next.remote_commit = next_remote_commit;
        next.remote_next_commit_info = RemoteNextCommitInfo::Revoked(
            message.next_per_commitment_point,
        );
        let newly_acked = next.local_changes.signed;
        next.local_changes.signed = vec![];
        next.local_changes.acked.extend(newly_acked);
        next.remote_changes.signed = vec![];

        Ok((
            vec![ChannelEvent::WeAcceptedRevokeAndAck {
                per_commitment_secret: message.per_commitment_secret,
                commitment_number: revoked_number,
            }],
            next,
        ))
    }

    /// Payment basepoints in the funder-first order used by commitment
    /// number obscuring
    pub fn obscuring_basepoints(
        &self,
    ) -> (bitcoin::secp256k1::PublicKey, bitcoin::secp256k1::PublicKey) {
        if self.is_funder {
            (
                self.local_keys.payment_basepoint.key,
                self.remote_keys.payment_basepoint,
            )
        } else {
            (
                self.remote_keys.payment_basepoint,
                self.local_keys.payment_basepoint.key,
            )
        }
    }
}
