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

#[cfg(feature = "serde")]
use amplify::ToYamlString;

/// BOLT-3 dust limit, in satoshis
pub const BOLT3_DUST_LIMIT: u64 = 354;

/// Limit for the maximum number of the accepted HTLCs towards some node
pub const BOLT3_MAX_ACCEPTED_HTLC_LIMIT: u16 = 483;

/// Channel parameters announced by one of the channel parties, constraining
/// the transactions built by the *other* party
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[derive(StrictEncode, StrictDecode)]
#[cfg_attr(
    feature = "serde",
    derive(Display, Serialize, Deserialize),
    serde(crate = "serde_crate"),
    display(PeerParams::to_yaml_string)
)]
pub struct PeerParams {
    /// Commitment outputs worth less than this many satoshis are not
    /// materialized on transactions built by the announcing party
    pub dust_limit_satoshis: u64,

    /// Relative timelock, in blocks, the other party's commitment must put
    /// on its own `to_local` spending path
    pub to_self_delay: u16,

    /// Smallest HTLC, in millisatoshi, the announcing party is willing to
    /// be offered
    pub htlc_minimum_msat: u64,

    /// Cap on the summed value of HTLCs in flight towards the announcing
    /// party, in millisatoshi
    pub max_htlc_value_in_flight_msat: u64,

    /// Balance, in satoshis, the other party is required to keep
    /// unencumbered by HTLCs on its side of the channel
    pub channel_reserve_satoshis: u64,

    /// Cap on the number of HTLCs in flight towards the announcing party
    pub max_accepted_htlcs: u16,
}

#[cfg(feature = "serde")]
impl ToYamlString for PeerParams {}

impl Default for PeerParams {
    /// Sets reasonable values for the channel parameters requested from the
    /// other peer in sent `open_channel` or `accept_channel` messages
    fn default() -> Self {
        PeerParams {
            dust_limit_satoshis: BOLT3_DUST_LIMIT,
            to_self_delay: 144,
            htlc_minimum_msat: 1,
            max_htlc_value_in_flight_msat: 25_000_000_000,
            channel_reserve_satoshis: 10_000,
            max_accepted_htlcs: BOLT3_MAX_ACCEPTED_HTLC_LIMIT,
        }
    }
}

/// Local node policies towards already operating channels.
///
/// Unlike [`PeerParams`], the policy is never negotiated with the remote
/// peer; it expresses the limits within which this node is willing to keep
/// a channel running.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[derive(StrictEncode, StrictDecode)]
#[cfg_attr(
    feature = "serde",
    derive(Display, Serialize, Deserialize),
    serde(crate = "serde_crate"),
    display(Policy::to_yaml_string)
)]
pub struct Policy {
    /// Maximum multiple by which the channel feerate proposed by the remote
    /// peer in `update_fee` may differ, in either direction, from the
    /// feerate estimated by the local node. A feerate outside of this
    /// corridor fails the channel.
    pub max_feerate_mismatch_factor: u8,
}

#[cfg(feature = "serde")]
impl ToYamlString for Policy {}

impl Default for Policy {
    fn default() -> Self {
        Policy {
            // feerates diverging by almost an order of magnitude mean one of
            // the nodes lost track of the fee market
            max_feerate_mismatch_factor: 8,
        }
    }
}

impl Policy {
    /// Checks a feerate proposed by the remote peer against the local
    /// feerate estimate
    pub fn is_feerate_acceptable(
        &self,
        proposed_feerate: u32,
        local_feerate: u32,
    ) -> bool {
        let factor = self.max_feerate_mismatch_factor as u64;
        (proposed_feerate as u64) <= (local_feerate as u64) * factor
            && (local_feerate as u64) <= (proposed_feerate as u64) * factor
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn feerate_corridor() {
        let policy = Policy::default();
        assert!(policy.is_feerate_acceptable(253, 253));
        assert!(policy.is_feerate_acceptable(253 * 8, 253));
        assert!(policy.is_feerate_acceptable(253, 253 * 8));
        assert!(!policy.is_feerate_acceptable(253 * 8 + 1, 253));
        assert!(!policy.is_feerate_acceptable(253, 253 * 9));
    }
}
