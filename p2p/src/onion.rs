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

//! Onion-routing wire shapes referenced by the commitment-level messages.
//!
//! Only the outer packet framing and the failure code flags are defined
//! here; construction and processing of the packets is a job of a sphinx
//! implementation provided by the node.

use std::io;

use amplify::{Slice32, Wrapper};
use lightning_encoding::{LightningDecode, LightningEncode};
use secp256k1::PublicKey;

/// Size of the fixed hop-data payload of an onion packet in bytes
pub const ONION_HOP_DATA_LEN: usize = 1300;

/// Sphinx onion packet in its BOLT-4 wire framing.
///
/// `1 + 33 + 1300 + 32 = 1366` bytes on the wire: version byte, ephemeral
/// session key, fixed-size encrypted hop data and the packet-level HMAC.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display)]
#[cfg_attr(feature = "strict_encoding", derive(StrictEncode, StrictDecode))]
#[display("onion_packet(v{version}, {public_key}, ...)")]
pub struct OnionPacket {
    /// Onion protocol version; only version 0 is defined by BOLT-4
    pub version: u8,

    /// Ephemeral session public key of the packet constructor
    pub public_key: PublicKey,

    /// Encrypted, fixed-length routing information
    pub hop_data: Vec<u8>,

    /// HMAC authenticating the whole packet
    pub hmac: Slice32,
}

impl LightningEncode for OnionPacket {
    fn lightning_encode<E: io::Write>(
        &self,
        mut e: E,
    ) -> Result<usize, lightning_encoding::Error> {
        if self.hop_data.len() != ONION_HOP_DATA_LEN {
            return Err(lightning_encoding::Error::DataIntegrityError(format!(
                "onion packet hop data must be {} bytes long, while {} bytes \
                 are provided",
                ONION_HOP_DATA_LEN,
                self.hop_data.len()
            )));
        }
        e.write_all(&[self.version])?;
        e.write_all(&self.public_key.serialize())?;
        e.write_all(&self.hop_data)?;
        e.write_all(self.hmac.as_inner())?;
        Ok(1 + 33 + ONION_HOP_DATA_LEN + 32)
    }
}

impl LightningDecode for OnionPacket {
    fn lightning_decode<D: io::Read>(
        mut d: D,
    ) -> Result<Self, lightning_encoding::Error> {
        let mut version = [0u8; 1];
        d.read_exact(&mut version)?;
        let mut key = [0u8; 33];
        d.read_exact(&mut key)?;
        let public_key = PublicKey::from_slice(&key).map_err(|_| {
            lightning_encoding::Error::DataIntegrityError(s!(
                "onion packet session key does not belong to secp256k1 curve"
            ))
        })?;
        let mut hop_data = vec![0u8; ONION_HOP_DATA_LEN];
        d.read_exact(&mut hop_data)?;
        let mut hmac = [0u8; 32];
        d.read_exact(&mut hmac)?;
        Ok(OnionPacket {
            version: version[0],
            public_key,
            hop_data,
            hmac: Slice32::from_inner(hmac),
        })
    }
}

/// BOLT-4 failure code transmitted with `update_fail_malformed_htlc` and
/// carried inside encrypted failure packets.
#[derive(
    Wrapper,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Debug,
    From,
    Display,
    LightningEncode,
    LightningDecode,
)]
#[cfg_attr(feature = "strict_encoding", derive(StrictEncode, StrictDecode))]
#[display("0x{0:04X}")]
pub struct FailureCode(u16);

impl FailureCode {
    /// Flag set when the failure originates from an unparseable onion
    pub const BADONION: u16 = 0x8000;
    /// Flag set for permanent failures
    pub const PERM: u16 = 0x4000;
    /// Flag set for node-level (and not channel-level) failures
    pub const NODE: u16 = 0x2000;
    /// Flag set when the failure carries a channel update
    pub const UPDATE: u16 = 0x1000;

    /// `invalid_onion_version` failure
    pub const INVALID_ONION_VERSION: FailureCode =
        FailureCode(Self::BADONION | Self::PERM | 4);
    /// `invalid_onion_hmac` failure
    pub const INVALID_ONION_HMAC: FailureCode =
        FailureCode(Self::BADONION | Self::PERM | 5);
    /// `invalid_onion_key` failure
    pub const INVALID_ONION_KEY: FailureCode =
        FailureCode(Self::BADONION | Self::PERM | 6);
    /// `temporary_node_failure` failure
    pub const TEMPORARY_NODE_FAILURE: FailureCode =
        FailureCode(Self::NODE | 2);
    /// `permanent_node_failure` failure
    pub const PERMANENT_NODE_FAILURE: FailureCode =
        FailureCode(Self::PERM | Self::NODE | 2);
    /// `unknown_next_peer` failure
    pub const UNKNOWN_NEXT_PEER: FailureCode = FailureCode(Self::PERM | 10);

    /// Detects whether the failure code carries the `BADONION` flag
    #[inline]
    pub fn is_badonion(self) -> bool {
        self.0 & Self::BADONION != 0
    }

    /// Detects whether the failure code carries the `PERM` flag
    #[inline]
    pub fn is_permanent(self) -> bool {
        self.0 & Self::PERM != 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn failure_code_flags() {
        assert!(FailureCode::INVALID_ONION_HMAC.is_badonion());
        assert!(FailureCode::INVALID_ONION_HMAC.is_permanent());
        assert!(!FailureCode::TEMPORARY_NODE_FAILURE.is_badonion());
        assert!(!FailureCode::TEMPORARY_NODE_FAILURE.is_permanent());
        assert_eq!(
            FailureCode::INVALID_ONION_VERSION.into_inner(),
            0x8000 | 0x4000 | 4
        );
    }

    #[test]
    fn onion_packet_roundtrip() {
        let packet = OnionPacket {
            version: 0,
            public_key: secp256k1::PublicKey::from_secret_key(
                secp256k1::SECP256K1,
                &secp256k1::ONE_KEY,
            ),
            hop_data: vec![0xAB; ONION_HOP_DATA_LEN],
            hmac: Slice32::from_inner([0x17; 32]),
        };
        let encoded = packet.lightning_serialize().unwrap();
        assert_eq!(encoded.len(), 1366);
        let decoded = OnionPacket::lightning_deserialize(&encoded).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn onion_packet_wrong_hop_data_len() {
        let packet = OnionPacket {
            version: 0,
            public_key: secp256k1::PublicKey::from_secret_key(
                secp256k1::SECP256K1,
                &secp256k1::ONE_KEY,
            ),
            hop_data: vec![0u8; 12],
            hmac: Slice32::default(),
        };
        assert!(packet.lightning_serialize().is_err());
    }
}
