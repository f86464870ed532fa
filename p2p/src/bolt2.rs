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

//! BOLT-2 messages of the channel update and commitment flow.

use bitcoin::hashes::sha256;
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::{PublicKey, SecretKey};
use bitcoin_scripts::hlc::{HashLock, HashPreimage};

use crate::onion::FailureCode;
use crate::{ChannelId, OnionPacket};

#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[derive(LightningEncode, LightningDecode)]
#[cfg_attr(feature = "strict_encoding", derive(StrictEncode, StrictDecode))]
#[display("update_add_htlc({channel_id}, {htlc_id}, {amount_msat}, ...)")]
pub struct UpdateAddHtlc {
    /// The channel ID
    pub channel_id: ChannelId,

    /// The HTLC ID
    pub htlc_id: u64,

    /// The HTLC value in milli-satoshi
    pub amount_msat: u64,

    /// The payment hash, the pre-image of which controls HTLC redemption
    pub payment_hash: HashLock,

    /// The expiry height of the HTLC
    pub cltv_expiry: u32,

    /// An obfuscated list of hops and instructions for each hop along the
    /// path. It commits to the HTLC by setting the payment_hash as associated
    /// data, i.e. includes the payment_hash in the computation of HMACs. This
    /// prevents replay attacks that would reuse a previous
    /// onion_routing_packet with a different payment_hash.
    pub onion_routing_packet: OnionPacket,
}

#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[derive(LightningEncode, LightningDecode)]
#[cfg_attr(feature = "strict_encoding", derive(StrictEncode, StrictDecode))]
#[display("update_fulfill_htlc({channel_id}, {htlc_id}, ...preimages)")]
pub struct UpdateFulfillHtlc {
    /// The channel ID
    pub channel_id: ChannelId,

    /// The HTLC ID
    pub htlc_id: u64,

    /// The pre-image of the payment hash, allowing HTLC redemption
    pub payment_preimage: HashPreimage,
}

#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[derive(LightningEncode, LightningDecode)]
#[cfg_attr(feature = "strict_encoding", derive(StrictEncode, StrictDecode))]
#[display("update_fail_htlc({channel_id}, {htlc_id}, ...reason)")]
pub struct UpdateFailHtlc {
    /// The channel ID
    pub channel_id: ChannelId,

    /// The HTLC ID
    pub htlc_id: u64,

    /// The reason field is an opaque encrypted blob for the benefit of the
    /// original HTLC initiator, as defined in BOLT #4; however, there's a
    /// special malformed failure variant for the case where the peer couldn't
    /// parse it: in this case the current node instead takes action,
    /// encrypting it into a update_fail_htlc for relaying.
    pub reason: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[derive(LightningEncode, LightningDecode)]
#[cfg_attr(feature = "strict_encoding", derive(StrictEncode, StrictDecode))]
#[display("update_fail_malformed_htlc({channel_id}, {htlc_id}, ...onion)")]
pub struct UpdateFailMalformedHtlc {
    /// The channel ID
    pub channel_id: ChannelId,

    /// The HTLC ID
    pub htlc_id: u64,

    /// SHA256 hash of onion data
    pub sha256_of_onion: sha256::Hash,

    /// The failure code; must have the `BADONION` flag set
    pub failure_code: FailureCode,
}

#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[derive(LightningEncode, LightningDecode)]
#[cfg_attr(feature = "strict_encoding", derive(StrictEncode, StrictDecode))]
#[display("update_fee({channel_id}, {feerate_per_kw})")]
pub struct UpdateFee {
    /// The channel ID
    pub channel_id: ChannelId,

    /// Fee rate per 1000-weight of the transaction
    pub feerate_per_kw: u32,
}

#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[derive(LightningEncode, LightningDecode)]
#[cfg_attr(feature = "strict_encoding", derive(StrictEncode, StrictDecode))]
#[display("commitment_signed({channel_id}, ...signatures)")]
pub struct CommitmentSigned {
    /// The channel ID
    pub channel_id: ChannelId,

    /// A signature on the commitment transaction
    pub signature: Signature,

    /// Signatures on the HTLC transactions
    pub htlc_signatures: Vec<Signature>,
}

#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[derive(LightningEncode, LightningDecode)]
#[cfg_attr(feature = "strict_encoding", derive(StrictEncode, StrictDecode))]
#[display(
    "revoke_and_ack({channel_id}, {next_per_commitment_point}, \
     ...per_commitment_secret)"
)]
pub struct RevokeAndAck {
    /// The channel ID
    pub channel_id: ChannelId,

    /// The secret corresponding to the per-commitment point
    pub per_commitment_secret: SecretKey,

    /// The next sender-broadcast commitment transaction's per-commitment
    /// point
    pub next_per_commitment_point: PublicKey,
}

/// Union of the channel update messages which stage changes to a commitment
/// without signing it. These are the messages kept in the per-party change
/// buffers between two `commitment_signed` exchanges.
#[derive(Clone, PartialEq, Eq, Debug, Display, From)]
#[derive(LightningEncode, LightningDecode)]
#[cfg_attr(feature = "strict_encoding", derive(StrictEncode, StrictDecode))]
#[display(inner)]
pub enum UpdateMessage {
    #[from]
    AddHtlc(UpdateAddHtlc),

    #[from]
    FulfillHtlc(UpdateFulfillHtlc),

    #[from]
    FailHtlc(UpdateFailHtlc),

    #[from]
    FailMalformedHtlc(UpdateFailMalformedHtlc),

    #[from]
    Fee(UpdateFee),
}

impl UpdateMessage {
    /// Returns the channel id the update applies to
    pub fn channel_id(&self) -> ChannelId {
        match self {
            UpdateMessage::AddHtlc(msg) => msg.channel_id,
            UpdateMessage::FulfillHtlc(msg) => msg.channel_id,
            UpdateMessage::FailHtlc(msg) => msg.channel_id,
            UpdateMessage::FailMalformedHtlc(msg) => msg.channel_id,
            UpdateMessage::Fee(msg) => msg.channel_id,
        }
    }

    /// Returns the id of the HTLC targeted by the update, if the update
    /// settles an existing HTLC
    pub fn settled_htlc_id(&self) -> Option<u64> {
        match self {
            UpdateMessage::FulfillHtlc(msg) => Some(msg.htlc_id),
            UpdateMessage::FailHtlc(msg) => Some(msg.htlc_id),
            UpdateMessage::FailMalformedHtlc(msg) => Some(msg.htlc_id),
            UpdateMessage::AddHtlc(_) | UpdateMessage::Fee(_) => None,
        }
    }
}

#[cfg(test)]
mod test {
    use amplify::hex::FromHex;
    use lightning_encoding::{LightningDecode, LightningEncode};

    use super::*;

    #[test]
    fn update_fee_roundtrip() {
        let msg = UpdateFee {
            channel_id: ChannelId::from_hex(
                "058cd08dfe09984dec3251ea808b892efeac3ede9402bf2b1965b9f6f1934a33",
            )
            .unwrap(),
            feerate_per_kw: 253,
        };
        let encoded = msg.lightning_serialize().unwrap();
        assert_eq!(encoded.len(), 32 + 4);
        assert_eq!(UpdateFee::lightning_deserialize(encoded).unwrap(), msg);
    }

    #[test]
    fn settled_htlc_id() {
        let fulfill = UpdateMessage::from(UpdateFulfillHtlc {
            channel_id: ChannelId::default(),
            htlc_id: 42,
            payment_preimage: HashPreimage::default(),
        });
        assert_eq!(fulfill.settled_htlc_id(), Some(42));

        let fee = UpdateMessage::from(UpdateFee {
            channel_id: ChannelId::default(),
            feerate_per_kw: 253,
        });
        assert_eq!(fee.settled_htlc_id(), None);
    }
}
