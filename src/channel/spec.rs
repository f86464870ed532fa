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

use p2p::{UpdateAddHtlc, UpdateMessage};

/// Side of an HTLC as seen by the owner of a commitment spec
#[derive(
    Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display,
)]
#[derive(StrictEncode, StrictDecode)]
pub enum HtlcDirection {
    /// HTLC offered to the spec owner by the counterparty
    #[display("in")]
    In,

    /// HTLC offered by the spec owner to the counterparty
    #[display("out")]
    Out,
}

impl HtlcDirection {
    /// Returns the same HTLC as seen from the other side of the channel
    #[inline]
    pub fn opposite(self) -> HtlcDirection {
        match self {
            HtlcDirection::In => HtlcDirection::Out,
            HtlcDirection::Out => HtlcDirection::In,
        }
    }
}

/// Direction-qualified HTLC id.
///
/// HTLC ids are counters local to the party which offered the HTLC, so ids
/// of incoming and outgoing HTLCs live in independent namespaces and an id
/// alone does not identify an HTLC within a spec.
#[derive(
    Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display,
)]
#[derive(StrictEncode, StrictDecode)]
#[display("{direction}/{id}")]
pub struct HtlcRef {
    pub direction: HtlcDirection,
    pub id: u64,
}

impl HtlcRef {
    #[inline]
    pub fn incoming(id: u64) -> HtlcRef {
        HtlcRef {
            direction: HtlcDirection::In,
            id,
        }
    }

    #[inline]
    pub fn outgoing(id: u64) -> HtlcRef {
        HtlcRef {
            direction: HtlcDirection::Out,
            id,
        }
    }
}

/// Errors of applying channel updates to a commitment spec
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum SpecError {
    /// update settles HTLC {0} which is not a part of the commitment
    UnknownHtlcId(HtlcRef),
}

/// Balance sheet of a single commitment transaction as seen by one of the
/// channel parties: the two main balances, the fee rate and the in-flight
/// HTLC set.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
#[derive(StrictEncode, StrictDecode)]
pub struct CommitmentSpec {
    /// In-flight HTLCs, qualified by the direction as seen by the spec
    /// owner
    pub htlcs: BTreeMap<HtlcRef, UpdateAddHtlc>,

    /// Fee rate of the commitment transaction, per 1000-weight
    pub feerate_per_kw: u32,

    /// Balance of the spec owner, in millisatoshi
    pub to_local_msat: u64,

    /// Balance of the counterparty, in millisatoshi
    pub to_remote_msat: u64,
}

impl CommitmentSpec {
    /// Creates a spec with no pending HTLCs
    pub fn with(
        to_local_msat: u64,
        to_remote_msat: u64,
        feerate_per_kw: u32,
    ) -> CommitmentSpec {
        CommitmentSpec {
            htlcs: empty!(),
            feerate_per_kw,
            to_local_msat,
            to_remote_msat,
        }
    }

    /// Looks up an in-flight HTLC by direction and id
    #[inline]
    pub fn htlc(&self, htlc_ref: HtlcRef) -> Option<&UpdateAddHtlc> {
        self.htlcs.get(&htlc_ref)
    }

    /// Iterates over in-flight HTLCs of the given direction
    pub fn htlcs_by_direction(
        &self,
        direction: HtlcDirection,
    ) -> impl Iterator<Item = &UpdateAddHtlc> {
        self.htlcs
            .iter()
            .filter(move |(htlc_ref, _)| htlc_ref.direction == direction)
            .map(|(_, add)| add)
    }

    /// Applies buffered updates to the spec, producing the spec of the next
    /// commitment transaction.
    ///
    /// `local_changes` are updates originated by the spec owner,
    /// `remote_changes` updates originated by the counterparty. Additions
    /// are applied before settlements, so a settlement may never target an
    /// HTLC added within the same reduction.
    pub fn reduce(
        &self,
        local_changes: &[UpdateMessage],
        remote_changes: &[UpdateMessage],
    ) -> Result<CommitmentSpec, SpecError> {
        let mut spec = self.clone();
        for message in local_changes {
            if let UpdateMessage::AddHtlc(add) = message {
                spec.add_htlc(HtlcDirection::Out, add.clone());
            }
        }
        for message in remote_changes {
            if let UpdateMessage::AddHtlc(add) = message {
                spec.add_htlc(HtlcDirection::In, add.clone());
            }
        }
        for message in local_changes {
            spec.settle(HtlcDirection::In, message)?;
        }
        for message in remote_changes {
            spec.settle(HtlcDirection::Out, message)?;
        }
        Ok(spec)
    }

    fn add_htlc(&mut self, direction: HtlcDirection, add: UpdateAddHtlc) {
        match direction {
            HtlcDirection::Out => {
                self.to_local_msat -= add.amount_msat;
            }
            HtlcDirection::In => {
                self.to_remote_msat -= add.amount_msat;
            }
        }
        self.htlcs.insert(
            HtlcRef {
                direction,
                id: add.htlc_id,
            },
            add,
        );
    }

    /// Applies a single non-add update. `direction` is the direction of the
    /// HTLCs the update settles: settlements sent by the spec owner target
    /// incoming HTLCs and vice versa.
    fn settle(
        &mut self,
        direction: HtlcDirection,
        message: &UpdateMessage,
    ) -> Result<(), SpecError> {
        let fulfilled = match message {
            UpdateMessage::AddHtlc(_) => return Ok(()),
            UpdateMessage::Fee(update_fee) => {
                self.feerate_per_kw = update_fee.feerate_per_kw;
                return Ok(());
            }
            UpdateMessage::FulfillHtlc(_) => true,
            UpdateMessage::FailHtlc(_)
            | UpdateMessage::FailMalformedHtlc(_) => false,
        };

        let htlc_ref = HtlcRef {
            direction,
            id: message
                .settled_htlc_id()
                .expect("all non-add, non-fee updates settle an HTLC"),
        };
        let add = self
            .htlcs
            .remove(&htlc_ref)
            .ok_or(SpecError::UnknownHtlcId(htlc_ref))?;

        // A fulfilled HTLC is credited to its receiver, a failed one is
        // returned to its sender
        match (direction, fulfilled) {
            (HtlcDirection::In, true) => self.to_local_msat += add.amount_msat,
            (HtlcDirection::In, false) => {
                self.to_remote_msat += add.amount_msat
            }
            (HtlcDirection::Out, true) => {
                self.to_remote_msat += add.amount_msat
            }
            (HtlcDirection::Out, false) => {
                self.to_local_msat += add.amount_msat
            }
        }
        Ok(())
    }
}
