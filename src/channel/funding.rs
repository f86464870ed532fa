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

use bitcoin::util::psbt::raw::ProprietaryKey;
use bitcoin::{OutPoint, Txid};
use bitcoin_scripts::WitnessScript;
use wallet::psbt::Psbt;

pub const PSBT_LNC_PROPRIETARY_PREFIX: &[u8] = b"LNC";
pub const PSBT_OUT_LNC_CHANNEL_FUNDING: u8 = 0x01;

#[derive(
    Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display, Error,
)]
#[display(doc_comments)]
pub enum Error {
    /// none of the PSBT outputs is marked as the channel funding output
    /// (an "LNC"-prefixed proprietary key of subtype 0x01)
    NoFundingOutput,

    /// funding output of the transaction carries no witness script, so
    /// commitment transactions spending it can't be signed
    NoWitnessScript,

    /// the funding transaction has no output #{0}, so it can't be marked
    /// as the channel funding output
    WrongOutput(u16),
}

/// The channel funding coin: the single 2-of-2 output which every
/// commitment transaction of the channel spends.
///
/// The coin is kept in its PSBT form. A PSBT is the one structure that
/// holds the output value, the controlling witness script and the BIP-32
/// origin of the local key together, so both the local and the remote
/// commitment construction can read from the same immutable source.
#[derive(Getters, Clone, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
pub struct Funding {
    /// Funding transaction in PSBT form, with the channel output marked.
    ///
    /// One PSBT is sufficient: a channel has exactly one funding output,
    /// and topping a channel up means building a fresh funding transaction
    /// which spends this one.
    psbt: Psbt,

    // The fields below are a cache; the PSBT above stays the master copy
    #[getter(as_copy)]
    txid: Txid,

    #[getter(as_copy)]
    output: u16,

    #[getter(as_copy)]
    amount: u64,

    /// The 2-of-2 multisig script controlling the funding output
    script: WitnessScript,
}

impl Funding {
    /// Extracts funding information from a funding PSBT. The PSBT must have
    /// its funding output marked (see [`PsbtChannelFunding`]) and carry its
    /// witness script.
    #[inline]
    pub fn with(psbt: Psbt) -> Result<Funding, Error> {
        psbt.extract_channel_funding()
    }

    /// The outpoint all commitment transactions of the channel spend
    #[inline]
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid, self.output as u32)
    }
}

fn lnc_out_channel_funding_key() -> ProprietaryKey {
    ProprietaryKey {
        prefix: PSBT_LNC_PROPRIETARY_PREFIX.to_vec(),
        subtype: PSBT_OUT_LNC_CHANNEL_FUNDING,
        key: vec![],
    }
}

/// PSBT extension marking and extracting the channel funding output
pub trait PsbtChannelFunding {
    /// Position of the output carrying the funding marker, if any
    fn channel_funding_output(&self) -> Option<usize>;

    /// Marks the given output as the channel funding output
    fn set_channel_funding_output(&mut self, vout: u16) -> Result<(), Error>;

    /// Outpoint of the marked funding output
    fn channel_funding_outpoint(&self) -> Result<OutPoint, Error>;

    /// Converts the PSBT into a [`Funding`] coin
    fn extract_channel_funding(self) -> Result<Funding, Error>;
}

impl PsbtChannelFunding for Psbt {
    fn channel_funding_output(&self) -> Option<usize> {
        let marker = lnc_out_channel_funding_key();
        self.outputs
            .iter()
            .position(|output| output.proprietary.contains_key(&marker))
    }

    fn set_channel_funding_output(&mut self, vout: u16) -> Result<(), Error> {
        let output = self
            .outputs
            .get_mut(vout as usize)
            .ok_or(Error::WrongOutput(vout))?;
        output
            .proprietary
            .insert(lnc_out_channel_funding_key(), vec![]);
        Ok(())
    }

    fn channel_funding_outpoint(&self) -> Result<OutPoint, Error> {
        match self.channel_funding_output() {
            Some(vout) => Ok(OutPoint::new(self.to_txid(), vout as u32)),
            None => Err(Error::NoFundingOutput),
        }
    }

    fn extract_channel_funding(self) -> Result<Funding, Error> {
        let vout = self
            .channel_funding_output()
            .ok_or(Error::NoFundingOutput)?;
        let marked = &self.outputs[vout];
        let amount = marked.amount;
        let script = match &marked.witness_script {
            Some(script) => script.clone().into(),
            None => return Err(Error::NoWitnessScript),
        };
        let txid = self.to_txid();
        Ok(Funding {
            txid,
            output: vout as u16,
            amount,
            script,
            psbt: self,
        })
    }
}
