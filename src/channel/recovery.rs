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

//! Recovery of channel funds after a unilateral close.
//!
//! When a commitment transaction of either party hits the chain the
//! functions of this module validate its shape, recover the obscured
//! commitment number and assemble partially-constructed sweeps of the
//! outputs the local node is entitled to. The sweeps are returned as PSBTs
//! without outputs: fee and destination are the caller's decisions.

use amplify::Wrapper;
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::{
    OutPoint, PackedLockTime, Script, Sequence, Transaction, TxIn, TxOut,
};
use bitcoin_scripts::{PubkeyScript, WitnessScript};
use wallet::psbt::{Psbt, PsbtVersion};

use super::keyset::{
    derive_privkey, derive_pubkey, derive_revocation_privkey,
    ChannelSecrets, CommitmentKeyset,
};
use super::shachain::{self, ShachainStore};
use super::state::{Commitments, RemoteNextCommitInfo};
use super::tx::{
    ObscuredCommitmentNumber, ScriptGenerators, TX_VERSION_COMMITMENT,
};

/// Shape violations of an alleged commitment transaction
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum CommitmentTxError {
    /// transaction version {0} is not the commitment transaction version
    InvalidTxVersion(i32),

    /// commitment transaction must spend the funding output, but the
    /// transaction has no inputs
    NoInputs,

    /// commitment transaction must spend only the funding output, while
    /// the transaction has {0} inputs
    MultipleInputs(usize),

    /// transaction spends {found} instead of the channel funding outpoint
    /// {expected}
    WrongPrevout { expected: OutPoint, found: OutPoint },

    /// locktime {locktime:#010x} and sequence {sequence:#010x} of the
    /// transaction do not carry the commitment transaction tags
    InvalidLocktimeSequence { locktime: u32, sequence: u32 },
}

/// Errors of fund recovery from a broadcast commitment transaction
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum RecoveryError {
    /// the broadcast transaction is not a commitment transaction of the
    /// channel
    #[from]
    #[display(inner)]
    InvalidCommitmentTx(CommitmentTxError),

    /// the broadcast transaction carries commitment number {0} which was
    /// never reached by the channel
    CommitmentNumberFromTheFuture(u64),

    /// commitment number {0} was never revoked, so no penalty spending is
    /// possible
    CommitmentNotRevoked(u64),

    /// the commitment transaction carries no output the local node can
    /// claim; the balance must have been below the dust limit
    BalanceBelowDustLimit,
}

/// Partially-constructed sweep transaction claiming channel funds.
///
/// The PSBT spends the claimable commitment outputs and has no outputs of
/// its own; the caller adds the destination and the fee, then signs each
/// input with the matching key of `signing_keys`. The keys are returned by
/// value and must be wiped by the caller after use.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FundsSweep {
    /// Sweep transaction spending the claimable outputs, one PSBT input
    /// per output
    pub psbt: Psbt,

    /// Private keys able to sign the PSBT inputs, in the input order
    pub signing_keys: Vec<SecretKey>,
}

/// Validates the shape of an alleged commitment transaction and extracts
/// the obscured commitment number from its locktime and sequence
pub fn validate_commitment_tx(
    funding_outpoint: OutPoint,
    tx: &Transaction,
) -> Result<ObscuredCommitmentNumber, CommitmentTxError> {
    if tx.version != TX_VERSION_COMMITMENT {
        return Err(CommitmentTxError::InvalidTxVersion(tx.version));
    }
    let input = match tx.input.len() {
        0 => return Err(CommitmentTxError::NoInputs),
        1 => &tx.input[0],
        count => return Err(CommitmentTxError::MultipleInputs(count)),
    };
    if input.previous_output != funding_outpoint {
        return Err(CommitmentTxError::WrongPrevout {
            expected: funding_outpoint,
            found: input.previous_output,
        });
    }
    ObscuredCommitmentNumber::from_locktime_sequence(
        tx.lock_time,
        input.sequence,
    )
    .ok_or(CommitmentTxError::InvalidLocktimeSequence {
        locktime: tx.lock_time.0,
        sequence: input.sequence.0,
    })
}

fn sweep_psbt(
    inputs: Vec<(OutPoint, TxOut, Sequence, Option<WitnessScript>)>,
) -> Psbt {
    let tx = Transaction {
        version: TX_VERSION_COMMITMENT,
        lock_time: PackedLockTime(0),
        input: inputs
            .iter()
            .map(|(previous_output, _, sequence, _)| TxIn {
                previous_output: *previous_output,
                script_sig: empty!(),
                sequence: *sequence,
                witness: empty!(),
            })
            .collect(),
        output: vec![],
    };
    let mut psbt = Psbt::with(tx, PsbtVersion::V0)
        .expect("unsigned sweep transaction is always a valid PSBT");
    for (index, (_, txout, _, witness_script)) in
        inputs.into_iter().enumerate()
    {
        psbt.inputs[index].witness_utxo = Some(txout);
        psbt.inputs[index].witness_script = witness_script;
    }
    psbt
}

/// Recovers the commitment number of a broadcast commitment transaction
/// and resolves the per-commitment point it was built at, taking it either
/// from the revealed secrets (a revoked commitment) or from the
/// commitments the channel still considers current
fn resolve_remote_commitment(
    cm: &Commitments,
    remote_secrets_store: &ShachainStore,
    tx: &Transaction,
) -> Result<(u64, bitcoin::secp256k1::PublicKey), RecoveryError> {
    let secp = Secp256k1::new();
    let obscured = validate_commitment_tx(cm.funding.outpoint(), tx)?;
    let (funder_basepoint, fundee_basepoint) = cm.obscuring_basepoints();
    let number = obscured.unobscure(funder_basepoint, fundee_basepoint);

    if let Some(secret) = remote_secrets_store.secret(number) {
        return Ok((number, shachain::per_commitment_point(&secp, secret)));
    }
    if number == cm.remote_commit.index {
        return Ok((number, cm.remote_commit.remote_per_commitment_point));
    }
    if let RemoteNextCommitInfo::Waiting(next) = &cm.remote_next_commit_info
    {
        if number == next.index {
            return Ok((number, next.remote_per_commitment_point));
        }
    }
    Err(RecoveryError::CommitmentNumberFromTheFuture(number))
}

/// Assembles a sweep of the `to_remote` output of a commitment transaction
/// broadcast by the remote party.
///
/// Works for the current remote commitment as well as for any revoked one
/// whose secret is present in the store (although for a revoked commitment
/// [`create_penalty_tx`] claims strictly more).
pub fn funds_from_remote_commitment_tx(
    cm: &Commitments,
    remote_secrets_store: &ShachainStore,
    secrets: &ChannelSecrets,
    tx: &Transaction,
) -> Result<FundsSweep, RecoveryError> {
    let secp = Secp256k1::new();
    let (_, per_commitment_point) =
        resolve_remote_commitment(cm, remote_secrets_store, tx)?;

    let payment_pubkey = derive_pubkey(
        &secp,
        cm.local_keys.payment_basepoint.key,
        per_commitment_point,
    );
    let script: Script =
        PubkeyScript::ln_to_remote(0, payment_pubkey).into();
    let vout = tx
        .output
        .iter()
        .position(|txout| txout.script_pubkey == script)
        .ok_or(RecoveryError::BalanceBelowDustLimit)?;

    let psbt = sweep_psbt(vec![(
        OutPoint::new(tx.txid(), vout as u32),
        tx.output[vout].clone(),
        Sequence::MAX,
        None,
    )]);
    Ok(FundsSweep {
        psbt,
        signing_keys: vec![derive_privkey(
            &secp,
            secrets.payment_basepoint_secret,
            per_commitment_point,
        )],
    })
}

/// Assembles a sweep of the `to_local` output of a commitment transaction
/// broadcast by the local node itself.
///
/// The sweep input carries the `to_self_delay` sequence: it can be
/// broadcast only after the delay imposed by the counterparty expires.
pub fn funds_from_local_commitment_tx(
    cm: &Commitments,
    secrets: &ChannelSecrets,
    tx: &Transaction,
) -> Result<FundsSweep, RecoveryError> {
    let secp = Secp256k1::new();
    let obscured = validate_commitment_tx(cm.funding.outpoint(), tx)?;
    let (funder_basepoint, fundee_basepoint) = cm.obscuring_basepoints();
    let number = obscured.unobscure(funder_basepoint, fundee_basepoint);
    if number > cm.local_commit.index {
        return Err(RecoveryError::CommitmentNumberFromTheFuture(number));
    }

    let per_commitment_point = shachain::per_commitment_point(
        &secp,
        shachain::from_seed(secrets.per_commitment_seed, number),
    );
    let keys = CommitmentKeyset::for_local_commitment(
        &secp,
        &cm.local_keys,
        &cm.remote_keys,
        per_commitment_point,
    );
    let to_self_delay = cm.remote_params.to_self_delay;
    let witness_script = WitnessScript::ln_to_local(
        0,
        keys.revocation_pubkey,
        keys.delayed_payment_pubkey,
        to_self_delay,
    );
    let script: Script = witness_script.to_p2wsh().into();
    let vout = tx
        .output
        .iter()
        .position(|txout| txout.script_pubkey == script)
        .ok_or(RecoveryError::BalanceBelowDustLimit)?;

    let psbt = sweep_psbt(vec![(
        OutPoint::new(tx.txid(), vout as u32),
        tx.output[vout].clone(),
        Sequence(to_self_delay as u32),
        Some(witness_script),
    )]);
    Ok(FundsSweep {
        psbt,
        signing_keys: vec![derive_privkey(
            &secp,
            secrets.delayed_payment_basepoint_secret,
            per_commitment_point,
        )],
    })
}

/// Assembles a penalty sweep of a revoked remote commitment transaction,
/// claiming both the `to_remote` output (with the local payment key) and
/// the `to_local` output (with the revocation key derived from the
/// revealed per-commitment secret).
///
/// Outputs are searched in the BIP-69 lexicographic order of the
/// commitment transaction; only outputs above the remote dust limit are
/// considered.
pub fn create_penalty_tx(
    cm: &Commitments,
    remote_secrets_store: &ShachainStore,
    secrets: &ChannelSecrets,
    tx: &Transaction,
) -> Result<FundsSweep, RecoveryError> {
    let secp = Secp256k1::new();
    let obscured = validate_commitment_tx(cm.funding.outpoint(), tx)?;
    let (funder_basepoint, fundee_basepoint) = cm.obscuring_basepoints();
    let number = obscured.unobscure(funder_basepoint, fundee_basepoint);
    let per_commitment_secret = remote_secrets_store
        .secret(number)
        .ok_or(RecoveryError::CommitmentNotRevoked(number))?;
    let per_commitment_point =
        shachain::per_commitment_point(&secp, per_commitment_secret);

    let keys = CommitmentKeyset::for_remote_commitment(
        &secp,
        &cm.local_keys,
        &cm.remote_keys,
        per_commitment_point,
    );
    let to_remote_script: Script =
        PubkeyScript::ln_to_remote(0, keys.counterparty_payment_pubkey)
            .into();
    let to_local_witness = WitnessScript::ln_to_local(
        0,
        keys.revocation_pubkey,
        keys.delayed_payment_pubkey,
        cm.local_params.to_self_delay,
    );
    let to_local_script: Script = to_local_witness.to_p2wsh().into();

    let payment_key = derive_privkey(
        &secp,
        secrets.payment_basepoint_secret,
        per_commitment_point,
    );
    let revocation_key = derive_revocation_privkey(
        &secp,
        secrets.revocation_basepoint_secret,
        SecretKey::from_slice(per_commitment_secret.as_inner())
            .expect("negligible probability"),
    );

    let mut ordered: Vec<(usize, &TxOut)> =
        tx.output.iter().enumerate().collect();
    ordered.sort_by(|(_, a), (_, b)| {
        a.value
            .cmp(&b.value)
            .then_with(|| a.script_pubkey.cmp(&b.script_pubkey))
    });

    let mut inputs = vec![];
    let mut signing_keys = vec![];
    for (vout, txout) in ordered {
        if txout.value <= cm.remote_params.dust_limit_satoshis {
            continue;
        }
        if txout.script_pubkey == to_remote_script {
            inputs.push((
                OutPoint::new(tx.txid(), vout as u32),
                txout.clone(),
                Sequence::MAX,
                None,
            ));
            signing_keys.push(payment_key);
        } else if txout.script_pubkey == to_local_script {
            inputs.push((
                OutPoint::new(tx.txid(), vout as u32),
                txout.clone(),
                Sequence::MAX,
                Some(to_local_witness.clone()),
            ));
            signing_keys.push(revocation_key);
        }
    }
    if inputs.is_empty() {
        return Err(RecoveryError::BalanceBelowDustLimit);
    }

    Ok(FundsSweep {
        psbt: sweep_psbt(inputs),
        signing_keys,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::channel::fixtures::*;
    use crate::channel::tx::LOCKTIME_TAG;

    #[test]
    fn rejects_wrong_tx_version() {
        let (cm, ..) = test_channel();
        let (mut broadcast, _) = remote_commitment_tx(&cm);
        broadcast.version = 1;
        assert_eq!(
            validate_commitment_tx(cm.funding.outpoint(), &broadcast),
            Err(CommitmentTxError::InvalidTxVersion(1))
        );
    }

    #[test]
    fn rejects_malformed_shapes() {
        let (cm, ..) = test_channel();
        let funding_outpoint = cm.funding.outpoint();
        let (valid, _) = remote_commitment_tx(&cm);

        let mut no_inputs = valid.clone();
        no_inputs.input.clear();
        assert_eq!(
            validate_commitment_tx(funding_outpoint, &no_inputs),
            Err(CommitmentTxError::NoInputs)
        );

        let mut two_inputs = valid.clone();
        two_inputs.input.push(valid.input[0].clone());
        assert_eq!(
            validate_commitment_tx(funding_outpoint, &two_inputs),
            Err(CommitmentTxError::MultipleInputs(2))
        );

        let mut wrong_prevout = valid.clone();
        wrong_prevout.input[0].previous_output.vout += 1;
        assert!(matches!(
            validate_commitment_tx(funding_outpoint, &wrong_prevout),
            Err(CommitmentTxError::WrongPrevout { .. })
        ));

        let mut untagged = valid.clone();
        untagged.lock_time = PackedLockTime(500_000);
        assert!(matches!(
            validate_commitment_tx(funding_outpoint, &untagged),
            Err(CommitmentTxError::InvalidLocktimeSequence { .. })
        ));

        let obscured =
            validate_commitment_tx(funding_outpoint, &valid).unwrap();
        let (funder, fundee) = cm.obscuring_basepoints();
        assert_eq!(obscured.unobscure(funder, fundee), 0);
    }

    #[test]
    fn sweeps_remote_commitment_to_remote_output() {
        let (cm, local_secrets, _) = test_channel();
        let (broadcast, _) = remote_commitment_tx(&cm);

        let sweep = funds_from_remote_commitment_tx(
            &cm,
            &ShachainStore::new(),
            &local_secrets,
            &broadcast,
        )
        .unwrap();
        assert_eq!(sweep.psbt.inputs.len(), 1);
        assert_eq!(sweep.signing_keys.len(), 1);
        let witness_utxo =
            sweep.psbt.inputs[0].witness_utxo.clone().unwrap();
        // in the remote commitment our balance (the funder one, less fee)
        // lives in the to_remote output
        assert!(witness_utxo.value > 0);
        assert!(witness_utxo.script_pubkey.is_v0_p2wpkh());
    }

    #[test]
    fn future_remote_commitment_is_rejected() {
        let (cm, local_secrets, _) = test_channel();
        let (mut broadcast, _) = remote_commitment_tx(&cm);
        // shift the embedded obscured number away from any known index
        broadcast.lock_time =
            PackedLockTime((LOCKTIME_TAG << 24) | (broadcast.lock_time.0 ^ 1) & 0x00FF_FFFF);
        assert!(matches!(
            funds_from_remote_commitment_tx(
                &cm,
                &ShachainStore::new(),
                &local_secrets,
                &broadcast,
            ),
            Err(RecoveryError::CommitmentNumberFromTheFuture(_))
        ));
    }

    #[test]
    fn sweeps_own_to_local_with_delay() {
        let (cm, local_secrets, _) = test_channel();
        let broadcast = cm.local_commit.publishable_txs.commit_tx.clone();

        let sweep =
            funds_from_local_commitment_tx(&cm, &local_secrets, &broadcast)
                .unwrap();
        assert_eq!(sweep.psbt.inputs.len(), 1);
        assert!(sweep.psbt.inputs[0].witness_script.is_some());
        let tx = sweep.psbt.clone().into_unsigned_tx();
        assert_eq!(
            tx.input[0].sequence,
            Sequence(cm.remote_params.to_self_delay as u32)
        );
    }

    #[test]
    fn penalty_claims_both_outputs() {
        let (cm, local_secrets, remote_secrets) = test_channel();
        let (broadcast, _) = remote_commitment_tx(&cm);

        let mut store = ShachainStore::new();
        store
            .insert(
                0,
                shachain::from_seed(remote_secrets.per_commitment_seed, 0),
            )
            .unwrap();

        let sweep =
            create_penalty_tx(&cm, &store, &local_secrets, &broadcast)
                .unwrap();
        // both main outputs are above the dust limit in the fixture
        assert_eq!(sweep.psbt.inputs.len(), 2);
        assert_eq!(sweep.signing_keys.len(), 2);
        assert_ne!(sweep.signing_keys[0], sweep.signing_keys[1]);

        // without the revealed secret no penalty is possible
        assert_eq!(
            create_penalty_tx(
                &cm,
                &ShachainStore::new(),
                &local_secrets,
                &broadcast
            )
            .unwrap_err(),
            RecoveryError::CommitmentNotRevoked(0)
        );
    }
}
