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

use bitcoin::secp256k1::PublicKey;
use bitcoin::Txid;
use p2p::{ChannelId, UpdateAddHtlc, UpdateMessage};

use super::keyset::{LocalKeyset, RemoteKeyset};
use super::policy::{PeerParams, Policy};
use super::spec::{CommitmentSpec, HtlcRef};
use super::tx::HtlcTx;
use super::Funding;

/// Where an in-flight outgoing HTLC originates from
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display)]
#[derive(StrictEncode, StrictDecode)]
pub enum HtlcOrigin {
    /// The HTLC pays an invoice on behalf of this node
    #[display("local")]
    Local,

    /// The HTLC forwards an incoming HTLC of another channel
    #[display("relayed({channel_id}, {htlc_id})")]
    Relayed {
        /// Channel the forwarded HTLC was received on
        channel_id: ChannelId,
        /// Id of the forwarded HTLC within the originating channel
        htlc_id: u64,
    },
}

/// Buffers of channel updates originated by one of the channel parties.
///
/// Each update travels strictly `proposed → signed → acked`: it is staged
/// when sent or received, moves to `signed` when covered by an outgoing
/// `commitment_signed`, and to `acked` once the matching `revoke_and_ack`
/// confirms the counterparty discarded the previous commitment.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
#[derive(StrictEncode, StrictDecode)]
pub struct Changes {
    pub proposed: Vec<UpdateMessage>,
    pub signed: Vec<UpdateMessage>,
    pub acked: Vec<UpdateMessage>,
}

impl Changes {
    /// Detects whether all three buffers are empty
    pub fn is_empty(&self) -> bool {
        self.proposed.is_empty()
            && self.signed.is_empty()
            && self.acked.is_empty()
    }
}

/// Fully signed local commitment transaction with its HTLC
/// sub-transactions, ready to be broadcast on channel failure
#[derive(Clone, PartialEq, Eq, Debug)]
#[derive(StrictEncode, StrictDecode)]
pub struct PublishableTxs {
    /// The commitment transaction with the finalized funding input witness
    pub commit_tx: bitcoin::Transaction,
    /// HTLC sub-transactions, in the peer signature order
    pub htlc_txs: Vec<HtlcTx>,
}

/// Current commitment of the local party
#[derive(Clone, PartialEq, Eq, Debug)]
#[derive(StrictEncode, StrictDecode)]
pub struct LocalCommit {
    /// Commitment number
    pub index: u64,
    /// Balance sheet of the commitment, from the local point of view
    pub spec: CommitmentSpec,
    /// The transactions the local node may broadcast to enact this
    /// commitment
    pub publishable_txs: PublishableTxs,
}

/// Current (or next, when waiting for a revocation) commitment of the
/// remote party.
///
/// The remote commitment transaction itself is not stored: the local node
/// cannot broadcast it, so remembering its txid together with the data
/// needed to rebuild it is sufficient.
#[derive(Clone, PartialEq, Eq, Debug)]
#[derive(StrictEncode, StrictDecode)]
pub struct RemoteCommit {
    /// Commitment number
    pub index: u64,
    /// Balance sheet of the commitment, from the *remote* point of view
    pub spec: CommitmentSpec,
    /// Txid of the remote commitment transaction
    pub txid: Txid,
    /// Per-commitment point the remote commitment keys are derived at
    pub remote_per_commitment_point: PublicKey,
}

/// State of the `commitment_signed` / `revoke_and_ack` round-trip towards
/// the remote peer
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[derive(StrictEncode, StrictDecode)]
pub enum RemoteNextCommitInfo {
    /// The previous remote commitment is revoked; the contained point must
    /// be used for the next `commitment_signed` we issue
    #[display("revoked")]
    Revoked(PublicKey),

    /// We have signed the next remote commitment and await its
    /// `revoke_and_ack`; no new `commitment_signed` may be issued until it
    /// arrives
    #[display("waiting")]
    Waiting(RemoteCommit),
}

/// Complete bilateral commitment state of a single channel.
///
/// The value is immutable from the engine point of view: every accepted
/// operation returns a replacement `Commitments` which the caller swaps in
/// atomically, keeping the previous value intact for diagnostics.
#[derive(Clone, PartialEq, Eq, Debug)]
#[derive(StrictEncode, StrictDecode)]
pub struct Commitments {
    /// The channel id
    pub channel_id: ChannelId,

    /// Whether the local party funded the channel (and thus pays the
    /// commitment transaction fees)
    pub is_funder: bool,

    /// Local node policy towards the operating channel
    pub policy: Policy,

    /// Channel parameters announced by the local node
    pub local_params: PeerParams,

    /// Channel parameters announced by the remote node
    pub remote_params: PeerParams,

    /// Basepoints of the local node
    pub local_keys: LocalKeyset,

    /// Basepoints of the remote node
    pub remote_keys: RemoteKeyset,

    /// The funding output both commitments spend
    pub funding: Funding,

    /// Current local commitment
    pub local_commit: LocalCommit,

    /// Current remote commitment
    pub remote_commit: RemoteCommit,

    /// State of the signing round-trip towards the remote peer
    pub remote_next_commit_info: RemoteNextCommitInfo,

    /// Updates originated by the local node
    pub local_changes: Changes,

    /// Updates originated by the remote node
    pub remote_changes: Changes,

    /// Origins of in-flight outgoing HTLCs, by HTLC id
    pub origin_channels: BTreeMap<u64, HtlcOrigin>,
}

impl Commitments {
    /// Detects whether both parties have no buffered updates
    pub fn has_no_pending_changes(&self) -> bool {
        self.local_changes.is_empty() && self.remote_changes.is_empty()
    }

    /// Detects whether there are remote-originated changes not yet covered
    /// by a local `revoke_and_ack`
    pub fn remote_has_changes(&self) -> bool {
        !self.remote_changes.proposed.is_empty()
            || !self.local_changes.acked.is_empty()
    }

    /// Detects whether there are local-originated changes not yet covered
    /// by an outgoing `commitment_signed`
    pub fn local_has_changes(&self) -> bool {
        !self.local_changes.proposed.is_empty()
            || !self.remote_changes.acked.is_empty()
    }

    /// The remote commitment the next update settlement must be checked
    /// against: the one being signed when a `revoke_and_ack` is pending
    pub fn nearest_remote_commit(&self) -> &RemoteCommit {
        match &self.remote_next_commit_info {
            RemoteNextCommitInfo::Waiting(next) => next,
            RemoteNextCommitInfo::Revoked(_) => &self.remote_commit,
        }
    }

    /// Looks up an incoming HTLC present in both the local and the remote
    /// commitment (a "cross-signed" HTLC, the only kind which may be
    /// settled)
    pub fn incoming_htlc_cross_signed(
        &self,
        htlc_id: u64,
    ) -> Option<&UpdateAddHtlc> {
        let local = self
            .local_commit
            .spec
            .htlc(HtlcRef::incoming(htlc_id))?;
        self.nearest_remote_commit()
            .spec
            .htlc(HtlcRef::outgoing(htlc_id))?;
        Some(local)
    }

    /// Looks up an outgoing cross-signed HTLC
    pub fn outgoing_htlc_cross_signed(
        &self,
        htlc_id: u64,
    ) -> Option<&UpdateAddHtlc> {
        let local = self
            .local_commit
            .spec
            .htlc(HtlcRef::outgoing(htlc_id))?;
        self.nearest_remote_commit()
            .spec
            .htlc(HtlcRef::incoming(htlc_id))?;
        Some(local)
    }

    /// Detects whether a settlement of the given incoming HTLC is already
    /// staged in the local proposed changes
    pub fn is_update_already_sent(&self, htlc_id: u64) -> bool {
        self.local_changes
            .proposed
            .iter()
            .any(|message| message.settled_htlc_id() == Some(htlc_id))
    }

    /// Origin of the outgoing HTLC with the given id. HTLCs with no
    /// registered origin pay on behalf of the local node itself.
    pub fn origin(&self, htlc_id: u64) -> HtlcOrigin {
        self.origin_channels
            .get(&htlc_id)
            .cloned()
            .unwrap_or(HtlcOrigin::Local)
    }

    /// Drops origins of HTLCs no longer present in the given spec
    pub(super) fn prune_origins(&mut self, spec: &CommitmentSpec) {
        self.origin_channels.retain(|htlc_id, _| {
            spec.htlc(HtlcRef::outgoing(*htlc_id)).is_some()
        });
    }
}
