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

use amplify::hex::{self, FromHex};
use amplify::{Slice32, Wrapper};
use bitcoin::hashes::Hash;
use bitcoin::OutPoint;

/// Lightning network channel id
///
/// Channel id is computed from the funding transaction outpoint by XORing the
/// last two bytes of the funding txid with the big-endian funding output
/// number, so it commits to the exact UTXO the channel lives on.
#[cfg_attr(
    feature = "serde",
    serde_as,
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", transparent)
)]
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
#[display(LowerHex)]
#[wrapper(FromStr, LowerHex, UpperHex)]
pub struct ChannelId(
    #[cfg_attr(
        feature = "serde",
        serde(with = "serde_with::As::<serde_with::DisplayFromStr>")
    )]
    Slice32,
);

impl FromHex for ChannelId {
    fn from_byte_iter<I>(iter: I) -> Result<Self, hex::Error>
    where
        I: Iterator<Item = Result<u8, hex::Error>>
            + ExactSizeIterator
            + DoubleEndedIterator,
    {
        Ok(Self(Slice32::from_byte_iter(iter)?))
    }
}

impl ChannelId {
    /// Computes the channel id committing to the given funding outpoint
    pub fn with(funding_outpoint: OutPoint) -> Self {
        let mut slice = funding_outpoint.txid.into_inner();
        let vout = funding_outpoint.vout.to_be_bytes();
        slice[30] ^= vout[2];
        slice[31] ^= vout[3];
        ChannelId::from_inner(Slice32::from_inner(slice))
    }

    /// With some lightning messages (like error) channel id consisting of all
    /// zeros has a special meaning of "applicable to all opened channels".
    /// This function allows to detect this kind of [`ChannelId`]
    pub fn is_wildcard(&self) -> bool {
        self.to_inner().to_inner() == [0u8; 32]
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use bitcoin::Txid;

    use super::*;

    #[test]
    fn channel_id_commits_to_vout() {
        let txid = Txid::from_str(
            "fd2105607605d2302994ffea703b09f66b6351816ee737a93e42a841ea20bbad",
        )
        .unwrap();
        let id0 = ChannelId::with(OutPoint::new(txid, 0));
        let id1 = ChannelId::with(OutPoint::new(txid, 1));
        assert_ne!(id0, id1);

        let mut expected = txid.into_inner();
        expected[31] ^= 1;
        assert_eq!(id1.as_inner().as_inner(), &expected);
    }

    #[test]
    fn wildcard_channel_id() {
        assert!(ChannelId::default().is_wildcard());
        let txid = Txid::from_str(
            "fd2105607605d2302994ffea703b09f66b6351816ee737a93e42a841ea20bbad",
        )
        .unwrap();
        assert!(!ChannelId::with(OutPoint::new(txid, 0)).is_wildcard());
    }
}
