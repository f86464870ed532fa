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

//! Construction of commitment transactions and their HTLC
//! sub-transactions.

use amplify::Wrapper;
use bitcoin::blockdata::opcodes::all::*;
use bitcoin::blockdata::script;
use bitcoin::hashes::{sha256, Hash, HashEngine};
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::{
    Message, PublicKey, Secp256k1, SecretKey, Signing, Verification,
};
use bitcoin::util::sighash::SighashCache;
use bitcoin::{
    EcdsaSighashType, OutPoint, PackedLockTime, Script, Sequence,
    Transaction, TxIn, TxOut, Witness,
};
use bitcoin_scripts::hlc::HashLock;
use bitcoin_scripts::{LockScript, PubkeyScript, WitnessScript};
use wallet::lex_order::LexOrder;

use super::keyset::{CommitmentKeyset, LocalPubkey};
use super::spec::{CommitmentSpec, HtlcDirection};
use super::Funding;
use p2p::UpdateAddHtlc;

/// Version of all commitment transactions and their sub-transactions
pub const TX_VERSION_COMMITMENT: i32 = 2;

/// Weight of a commitment transaction without HTLC outputs
pub const COMMITMENT_TX_WEIGHT: u64 = 724;

/// Weight added to a commitment transaction by a single HTLC output
pub const HTLC_OUTPUT_WEIGHT: u64 = 172;

/// Weight of an HTLC-timeout transaction
pub const HTLC_TIMEOUT_TX_WEIGHT: u64 = 663;

/// Weight of an HTLC-success transaction
pub const HTLC_SUCCESS_TX_WEIGHT: u64 = 703;

/// Tag of the upper byte of the commitment transaction locktime
pub const LOCKTIME_TAG: u32 = 0x20;

/// Tag of the upper byte of the commitment transaction input sequence
pub const SEQUENCE_TAG: u32 = 0x80;

const LOWER_24_BITS: u64 = 0x00FF_FFFF;
const LOWER_48_BITS: u64 = 0x0000_FFFF_FFFF_FFFF;

/// 48-bit commitment number XORed with the pubkey-derived obscuring factor,
/// as embedded into the `(locktime, sequence)` pair of a commitment
/// transaction
#[derive(
    Wrapper,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Debug,
    From,
    Display,
)]
#[derive(StrictEncode, StrictDecode)]
#[display("0x{0:012x}")]
pub struct ObscuredCommitmentNumber(u64);

/// Obscuring factor: the lower 48 bits of
/// `SHA256(funder_payment_basepoint || fundee_payment_basepoint)`
fn obscuring_factor(
    funder_payment_basepoint: PublicKey,
    fundee_payment_basepoint: PublicKey,
) -> u64 {
    let mut engine = sha256::Hash::engine();
    engine.input(&funder_payment_basepoint.serialize());
    engine.input(&fundee_payment_basepoint.serialize());
    let obscuring_hash = sha256::Hash::from_engine(engine);

    let mut buf = [0u8; 8];
    buf.copy_from_slice(&obscuring_hash[24..]);
    u64::from_be_bytes(buf) & LOWER_48_BITS
}

impl ObscuredCommitmentNumber {
    /// Obscures a commitment number with the payment basepoints of both
    /// channel parties
    pub fn obscure(
        commitment_number: u64,
        funder_payment_basepoint: PublicKey,
        fundee_payment_basepoint: PublicKey,
    ) -> ObscuredCommitmentNumber {
        ObscuredCommitmentNumber(
            (commitment_number & LOWER_48_BITS)
                ^ obscuring_factor(
                    funder_payment_basepoint,
                    fundee_payment_basepoint,
                ),
        )
    }

    /// Recovers the commitment number. XOR is an involution, so
    /// un-obscuring is obscuring done with the same basepoints.
    pub fn unobscure(
        self,
        funder_payment_basepoint: PublicKey,
        fundee_payment_basepoint: PublicKey,
    ) -> u64 {
        self.0
            ^ obscuring_factor(
                funder_payment_basepoint,
                fundee_payment_basepoint,
            )
    }

    /// Splits the obscured number into the tagged `(locktime, sequence)`
    /// pair of the commitment transaction: lower 24 bits go into the
    /// locktime, upper 24 bits into the input sequence
    pub fn to_locktime_sequence(self) -> (PackedLockTime, Sequence) {
        let lock_time =
            (LOCKTIME_TAG << 24) | (self.0 & LOWER_24_BITS) as u32;
        let sequence = (SEQUENCE_TAG << 24) | (self.0 >> 24) as u32;
        (PackedLockTime(lock_time), Sequence(sequence))
    }

    /// Reassembles the obscured number from the `(locktime, sequence)`
    /// pair; `None` when the top-byte tags do not match a commitment
    /// transaction
    pub fn from_locktime_sequence(
        lock_time: PackedLockTime,
        sequence: Sequence,
    ) -> Option<ObscuredCommitmentNumber> {
        if lock_time.0 >> 24 != LOCKTIME_TAG || sequence.0 >> 24 != SEQUENCE_TAG
        {
            return None;
        }
        let lower = (lock_time.0 as u64) & LOWER_24_BITS;
        let upper = (sequence.0 as u64) & LOWER_24_BITS;
        Some(ObscuredCommitmentNumber(upper << 24 | lower))
    }
}

/// Fee of a single HTLC-timeout transaction
#[inline]
pub fn htlc_timeout_fee(feerate_per_kw: u32) -> u64 {
    HTLC_TIMEOUT_TX_WEIGHT * feerate_per_kw as u64 / 1000
}

/// Fee of a single HTLC-success transaction
#[inline]
pub fn htlc_success_fee(feerate_per_kw: u32) -> u64 {
    HTLC_SUCCESS_TX_WEIGHT * feerate_per_kw as u64 / 1000
}

/// An HTLC output below the dust limit plus the fee of the transaction
/// claiming it is trimmed: not materialized on the commitment transaction
pub fn is_htlc_trimmed(
    direction: HtlcDirection,
    amount_msat: u64,
    dust_limit_satoshis: u64,
    feerate_per_kw: u32,
) -> bool {
    let claim_fee = match direction {
        HtlcDirection::Out => htlc_timeout_fee(feerate_per_kw),
        HtlcDirection::In => htlc_success_fee(feerate_per_kw),
    };
    amount_msat / 1000 < dust_limit_satoshis + claim_fee
}

/// Fee of a commitment transaction built from the given spec, paid by the
/// channel funder
pub fn commit_tx_fee(dust_limit_satoshis: u64, spec: &CommitmentSpec) -> u64 {
    let untrimmed = spec
        .htlcs
        .iter()
        .filter(|(htlc_ref, add)| {
            !is_htlc_trimmed(
                htlc_ref.direction,
                add.amount_msat,
                dust_limit_satoshis,
                spec.feerate_per_kw,
            )
        })
        .count() as u64;
    (COMMITMENT_TX_WEIGHT + HTLC_OUTPUT_WEIGHT * untrimmed)
        * spec.feerate_per_kw as u64
        / 1000
}

/// Constructors for all scripts appearing on commitment transactions and
/// their HTLC sub-transactions
pub trait ScriptGenerators {
    fn ln_funding(
        amount: u64,
        local_pubkey: &LocalPubkey,
        remote_pubkey: PublicKey,
    ) -> Self;

    /// NB: We use argument named `local_delayedpubkey`, but when the
    /// transaction is generated for the remote node the source for this key
    /// is the remote node key set.
    fn ln_to_local(
        amount: u64,
        revocationpubkey: PublicKey,
        local_delayedpubkey: PublicKey,
        to_self_delay: u16,
    ) -> Self;

    /// NB: We use argument named `remote_pubkey`, but when the transaction
    /// is generated for the remote node the source for this key is the
    /// local node key set.
    fn ln_to_remote(amount: u64, remote_pubkey: PublicKey) -> Self;

    fn ln_offered_htlc(
        amount: u64,
        revocationpubkey: PublicKey,
        local_htlcpubkey: PublicKey,
        remote_htlcpubkey: PublicKey,
        payment_hash: HashLock,
    ) -> Self;

    fn ln_received_htlc(
        amount: u64,
        revocationpubkey: PublicKey,
        local_htlcpubkey: PublicKey,
        remote_htlcpubkey: PublicKey,
        cltv_expiry: u32,
        payment_hash: HashLock,
    ) -> Self;

    fn ln_htlc_output(
        amount: u64,
        revocationpubkey: PublicKey,
        local_delayedpubkey: PublicKey,
        to_self_delay: u16,
    ) -> Self;
}

impl ScriptGenerators for LockScript {
    fn ln_funding(
        _: u64,
        local_pubkey: &LocalPubkey,
        remote_pubkey: PublicKey,
    ) -> Self {
        let pk = vec![
            local_pubkey.to_bitcoin_pk(),
            bitcoin::PublicKey::new(remote_pubkey),
        ]
        .lex_ordered();

        script::Builder::new()
            .push_int(2)
            .push_key(&pk[0])
            .push_key(&pk[1])
            .push_int(2)
            .push_opcode(OP_CHECKMULTISIG)
            .into_script()
            .into()
    }

    fn ln_to_local(
        _: u64,
        revocationpubkey: PublicKey,
        local_delayedpubkey: PublicKey,
        to_self_delay: u16,
    ) -> Self {
        script::Builder::new()
            .push_opcode(OP_IF)
            .push_key(&bitcoin::PublicKey::new(revocationpubkey))
            .push_opcode(OP_ELSE)
            .push_int(to_self_delay as i64)
            .push_opcode(OP_CSV)
            .push_opcode(OP_DROP)
            .push_key(&bitcoin::PublicKey::new(local_delayedpubkey))
            .push_opcode(OP_ENDIF)
            .push_opcode(OP_CHECKSIG)
            .into_script()
            .into()
    }

    fn ln_to_remote(_: u64, _: PublicKey) -> Self {
        unimplemented!("LockScript can't be generated for to_remote output")
    }

    fn ln_offered_htlc(
        _: u64,
        revocationpubkey: PublicKey,
        local_htlcpubkey: PublicKey,
        remote_htlcpubkey: PublicKey,
        payment_hash: HashLock,
    ) -> Self {
        script::Builder::new()
            .push_opcode(OP_DUP)
            .push_opcode(OP_HASH160)
            .push_slice(
                &bitcoin::PublicKey::new(revocationpubkey).pubkey_hash(),
            )
            .push_opcode(OP_EQUAL)
            .push_opcode(OP_IF)
            .push_opcode(OP_CHECKSIG)
            .push_opcode(OP_ELSE)
            .push_key(&bitcoin::PublicKey::new(remote_htlcpubkey))
            .push_opcode(OP_SWAP)
            .push_opcode(OP_SIZE)
            .push_int(32)
            .push_opcode(OP_EQUAL)
            .push_opcode(OP_NOTIF)
            .push_opcode(OP_DROP)
            .push_int(2)
            .push_opcode(OP_SWAP)
            .push_key(&bitcoin::PublicKey::new(local_htlcpubkey))
            .push_int(2)
            .push_opcode(OP_CHECKMULTISIG)
            .push_opcode(OP_ELSE)
            .push_opcode(OP_HASH160)
            .push_slice(payment_hash.as_ref())
            .push_opcode(OP_EQUALVERIFY)
            .push_opcode(OP_CHECKSIG)
            .push_opcode(OP_ENDIF)
            .push_opcode(OP_ENDIF)
            .into_script()
            .into()
    }

    fn ln_received_htlc(
        _: u64,
        revocationpubkey: PublicKey,
        local_htlcpubkey: PublicKey,
        remote_htlcpubkey: PublicKey,
        cltv_expiry: u32,
        payment_hash: HashLock,
    ) -> Self {
        script::Builder::new()
            .push_opcode(OP_DUP)
            .push_opcode(OP_HASH160)
            .push_slice(
                &bitcoin::PublicKey::new(revocationpubkey).pubkey_hash(),
            )
            .push_opcode(OP_EQUAL)
            .push_opcode(OP_IF)
            .push_opcode(OP_CHECKSIG)
            .push_opcode(OP_ELSE)
            .push_key(&bitcoin::PublicKey::new(remote_htlcpubkey))
            .push_opcode(OP_SWAP)
            .push_opcode(OP_SIZE)
            .push_int(32)
            .push_opcode(OP_EQUAL)
            .push_opcode(OP_IF)
            .push_opcode(OP_HASH160)
            .push_slice(payment_hash.as_ref())
            .push_opcode(OP_EQUALVERIFY)
            .push_int(2)
            .push_opcode(OP_SWAP)
            .push_key(&bitcoin::PublicKey::new(local_htlcpubkey))
            .push_int(2)
            .push_opcode(OP_CHECKMULTISIG)
            .push_opcode(OP_ELSE)
            .push_opcode(OP_DROP)
            .push_int(cltv_expiry as i64)
            .push_opcode(OP_CLTV)
            .push_opcode(OP_DROP)
            .push_opcode(OP_CHECKSIG)
            .push_opcode(OP_ENDIF)
            .push_opcode(OP_ENDIF)
            .into_script()
            .into()
    }

    fn ln_htlc_output(
        _: u64,
        revocationpubkey: PublicKey,
        local_delayedpubkey: PublicKey,
        to_self_delay: u16,
    ) -> Self {
        script::Builder::new()
            .push_opcode(OP_IF)
            .push_key(&bitcoin::PublicKey::new(revocationpubkey))
            .push_opcode(OP_ELSE)
            .push_int(to_self_delay as i64)
            .push_opcode(OP_CSV)
            .push_opcode(OP_DROP)
            .push_key(&bitcoin::PublicKey::new(local_delayedpubkey))
            .push_opcode(OP_ENDIF)
            .push_opcode(OP_CHECKSIG)
            .into_script()
            .into()
    }
}

impl ScriptGenerators for WitnessScript {
    #[inline]
    fn ln_funding(
        amount: u64,
        local_pubkey: &LocalPubkey,
        remote_pubkey: PublicKey,
    ) -> Self {
        LockScript::ln_funding(amount, local_pubkey, remote_pubkey).into()
    }

    #[inline]
    fn ln_to_local(
        amount: u64,
        revocationpubkey: PublicKey,
        local_delayedpubkey: PublicKey,
        to_self_delay: u16,
    ) -> Self {
        LockScript::ln_to_local(
            amount,
            revocationpubkey,
            local_delayedpubkey,
            to_self_delay,
        )
        .into()
    }

    #[inline]
    fn ln_to_remote(_: u64, _: PublicKey) -> Self {
        unimplemented!("WitnessScript can't be generated for to_remote output")
    }

    #[inline]
    fn ln_offered_htlc(
        amount: u64,
        revocationpubkey: PublicKey,
        local_htlcpubkey: PublicKey,
        remote_htlcpubkey: PublicKey,
        payment_hash: HashLock,
    ) -> Self {
        LockScript::ln_offered_htlc(
            amount,
            revocationpubkey,
            local_htlcpubkey,
            remote_htlcpubkey,
            payment_hash,
        )
        .into()
    }

    #[inline]
    fn ln_received_htlc(
        amount: u64,
        revocationpubkey: PublicKey,
        local_htlcpubkey: PublicKey,
        remote_htlcpubkey: PublicKey,
        cltv_expiry: u32,
        payment_hash: HashLock,
    ) -> Self {
        LockScript::ln_received_htlc(
            amount,
            revocationpubkey,
            local_htlcpubkey,
            remote_htlcpubkey,
            cltv_expiry,
            payment_hash,
        )
        .into()
    }

    #[inline]
    fn ln_htlc_output(
        amount: u64,
        revocationpubkey: PublicKey,
        local_delayedpubkey: PublicKey,
        to_self_delay: u16,
    ) -> Self {
        LockScript::ln_htlc_output(
            amount,
            revocationpubkey,
            local_delayedpubkey,
            to_self_delay,
        )
        .into()
    }
}

impl ScriptGenerators for PubkeyScript {
    #[inline]
    fn ln_funding(
        amount: u64,
        local_pubkey: &LocalPubkey,
        remote_pubkey: PublicKey,
    ) -> Self {
        WitnessScript::ln_funding(amount, local_pubkey, remote_pubkey)
            .to_p2wsh()
    }

    #[inline]
    fn ln_to_local(
        amount: u64,
        revocationpubkey: PublicKey,
        local_delayedpubkey: PublicKey,
        to_self_delay: u16,
    ) -> Self {
        WitnessScript::ln_to_local(
            amount,
            revocationpubkey,
            local_delayedpubkey,
            to_self_delay,
        )
        .to_p2wsh()
    }

    #[inline]
    fn ln_to_remote(_: u64, remote_pubkey: PublicKey) -> Self {
        bitcoin::PublicKey::new(remote_pubkey)
            .wpubkey_hash()
            .expect("We just generated non-compressed key")
            .into()
    }

    #[inline]
    fn ln_offered_htlc(
        amount: u64,
        revocationpubkey: PublicKey,
        local_htlcpubkey: PublicKey,
        remote_htlcpubkey: PublicKey,
        payment_hash: HashLock,
    ) -> Self {
        WitnessScript::ln_offered_htlc(
            amount,
            revocationpubkey,
            local_htlcpubkey,
            remote_htlcpubkey,
            payment_hash,
        )
        .to_p2wsh()
    }

    #[inline]
    fn ln_received_htlc(
        amount: u64,
        revocationpubkey: PublicKey,
        local_htlcpubkey: PublicKey,
        remote_htlcpubkey: PublicKey,
        cltv_expiry: u32,
        payment_hash: HashLock,
    ) -> Self {
        WitnessScript::ln_received_htlc(
            amount,
            revocationpubkey,
            local_htlcpubkey,
            remote_htlcpubkey,
            cltv_expiry,
            payment_hash,
        )
        .to_p2wsh()
    }

    #[inline]
    fn ln_htlc_output(
        amount: u64,
        revocationpubkey: PublicKey,
        local_delayedpubkey: PublicKey,
        to_self_delay: u16,
    ) -> Self {
        WitnessScript::ln_htlc_output(
            amount,
            revocationpubkey,
            local_delayedpubkey,
            to_self_delay,
        )
        .to_p2wsh()
    }
}

impl ScriptGenerators for TxOut {
    #[inline]
    fn ln_funding(
        amount: u64,
        local_pubkey: &LocalPubkey,
        remote_pubkey: PublicKey,
    ) -> Self {
        TxOut {
            value: amount,
            script_pubkey: PubkeyScript::ln_funding(
                amount,
                local_pubkey,
                remote_pubkey,
            )
            .into(),
        }
    }

    #[inline]
    fn ln_to_local(
        amount: u64,
        revocationpubkey: PublicKey,
        local_delayedpubkey: PublicKey,
        to_self_delay: u16,
    ) -> Self {
        TxOut {
            value: amount,
            script_pubkey: PubkeyScript::ln_to_local(
                amount,
                revocationpubkey,
                local_delayedpubkey,
                to_self_delay,
            )
            .into(),
        }
    }

    #[inline]
    fn ln_to_remote(amount: u64, remote_pubkey: PublicKey) -> Self {
        TxOut {
            value: amount,
            script_pubkey: PubkeyScript::ln_to_remote(amount, remote_pubkey)
                .into(),
        }
    }

    #[inline]
    fn ln_offered_htlc(
        amount: u64,
        revocationpubkey: PublicKey,
        local_htlcpubkey: PublicKey,
        remote_htlcpubkey: PublicKey,
        payment_hash: HashLock,
    ) -> Self {
        TxOut {
            value: amount,
            script_pubkey: PubkeyScript::ln_offered_htlc(
                amount,
                revocationpubkey,
                local_htlcpubkey,
                remote_htlcpubkey,
                payment_hash,
            )
            .into(),
        }
    }

    #[inline]
    fn ln_received_htlc(
        amount: u64,
        revocationpubkey: PublicKey,
        local_htlcpubkey: PublicKey,
        remote_htlcpubkey: PublicKey,
        cltv_expiry: u32,
        payment_hash: HashLock,
    ) -> Self {
        TxOut {
            value: amount,
            script_pubkey: PubkeyScript::ln_received_htlc(
                amount,
                revocationpubkey,
                local_htlcpubkey,
                remote_htlcpubkey,
                cltv_expiry,
                payment_hash,
            )
            .into(),
        }
    }

    #[inline]
    fn ln_htlc_output(
        amount: u64,
        revocationpubkey: PublicKey,
        local_delayedpubkey: PublicKey,
        to_self_delay: u16,
    ) -> Self {
        TxOut {
            value: amount,
            script_pubkey: PubkeyScript::ln_htlc_output(
                amount,
                revocationpubkey,
                local_delayedpubkey,
                to_self_delay,
            )
            .into(),
        }
    }
}

/// HTLC sub-transaction spending an HTLC output of a commitment
/// transaction.
///
/// The referenced commitment output is held by value (`witness_script`,
/// `value`), never as a pointer into the commitment transaction output
/// array, since the commitment transaction is signed and mutated after the
/// sub-transactions are built.
#[derive(Clone, PartialEq, Eq, Debug)]
#[derive(StrictEncode, StrictDecode)]
pub enum HtlcTx {
    /// Claims an offered (outgoing) HTLC back after its expiry
    Timeout {
        /// The sub-transaction itself
        tx: Transaction,
        /// Index of the input spending the commitment HTLC output
        which_input: u32,
        /// Witness script of the spent commitment output
        witness_script: WitnessScript,
        /// Value of the spent commitment output, in satoshis
        value: u64,
        /// Id of the HTLC being claimed
        htlc_id: u64,
        /// Counterparty signature, retained once it has been verified
        remote_signature: Option<Signature>,
    },

    /// Claims a received (incoming) HTLC with its payment preimage
    Success {
        /// The sub-transaction itself
        tx: Transaction,
        /// Index of the input spending the commitment HTLC output
        which_input: u32,
        /// Witness script of the spent commitment output
        witness_script: WitnessScript,
        /// Value of the spent commitment output, in satoshis
        value: u64,
        /// Id of the HTLC being claimed
        htlc_id: u64,
        /// Counterparty signature, retained until the preimage is known and
        /// the transaction can be completed
        remote_signature: Option<Signature>,
    },
}

impl HtlcTx {
    #[inline]
    pub fn tx(&self) -> &Transaction {
        match self {
            HtlcTx::Timeout { tx, .. } | HtlcTx::Success { tx, .. } => tx,
        }
    }

    #[inline]
    pub fn tx_mut(&mut self) -> &mut Transaction {
        match self {
            HtlcTx::Timeout { tx, .. } | HtlcTx::Success { tx, .. } => tx,
        }
    }

    #[inline]
    pub fn which_input(&self) -> u32 {
        match self {
            HtlcTx::Timeout { which_input, .. }
            | HtlcTx::Success { which_input, .. } => *which_input,
        }
    }

    #[inline]
    pub fn witness_script(&self) -> &WitnessScript {
        match self {
            HtlcTx::Timeout { witness_script, .. }
            | HtlcTx::Success { witness_script, .. } => witness_script,
        }
    }

    #[inline]
    pub fn value(&self) -> u64 {
        match self {
            HtlcTx::Timeout { value, .. }
            | HtlcTx::Success { value, .. } => *value,
        }
    }

    #[inline]
    pub fn htlc_id(&self) -> u64 {
        match self {
            HtlcTx::Timeout { htlc_id, .. }
            | HtlcTx::Success { htlc_id, .. } => *htlc_id,
        }
    }

    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, HtlcTx::Timeout { .. })
    }

    /// Index of the commitment transaction output the sub-transaction
    /// spends. The peer signature order is the ascending order of these
    /// indexes.
    #[inline]
    pub fn spent_commitment_vout(&self) -> u32 {
        self.tx().input[self.which_input() as usize]
            .previous_output
            .vout
    }

    pub fn remote_signature(&self) -> Option<Signature> {
        match self {
            HtlcTx::Timeout {
                remote_signature, ..
            }
            | HtlcTx::Success {
                remote_signature, ..
            } => *remote_signature,
        }
    }

    pub fn set_remote_signature(&mut self, signature: Signature) {
        match self {
            HtlcTx::Timeout {
                remote_signature, ..
            }
            | HtlcTx::Success {
                remote_signature, ..
            } => *remote_signature = Some(signature),
        }
    }
}

/// Merges HTLC-timeout and HTLC-success transactions into the canonical
/// signing order: ascending by the commitment output index they spend.
/// Signatures within `commitment_signed` must follow this order exactly.
pub fn sort_both_htlc_txs(
    timeouts: Vec<HtlcTx>,
    successes: Vec<HtlcTx>,
) -> Vec<HtlcTx> {
    let mut htlc_txs = timeouts;
    htlc_txs.extend(successes);
    htlc_txs.sort_by_key(HtlcTx::spent_commitment_vout);
    htlc_txs
}

/// Builds the commitment transaction of one of the channel parties
/// together with its HTLC sub-transactions.
///
/// All perspective-dependent arguments (`keys`, `spec`, dust limit, delay)
/// belong to the *owner* of the commitment: the party able to broadcast it.
#[allow(clippy::too_many_arguments)]
pub fn make_commitment_txs(
    funding: &Funding,
    commitment_number: u64,
    funder_payment_basepoint: PublicKey,
    fundee_payment_basepoint: PublicKey,
    owner_is_funder: bool,
    owner_dust_limit: u64,
    owner_to_self_delay: u16,
    keys: &CommitmentKeyset,
    spec: &CommitmentSpec,
) -> (Transaction, Vec<HtlcTx>) {
    let obscured = ObscuredCommitmentNumber::obscure(
        commitment_number,
        funder_payment_basepoint,
        fundee_payment_basepoint,
    );
    let (lock_time, sequence) = obscured.to_locktime_sequence();

    let fee = commit_tx_fee(owner_dust_limit, spec);
    let mut to_local_sat = spec.to_local_msat / 1000;
    let mut to_remote_sat = spec.to_remote_msat / 1000;
    if owner_is_funder {
        to_local_sat = to_local_sat.saturating_sub(fee);
    } else {
        to_remote_sat = to_remote_sat.saturating_sub(fee);
    }

    let mut outputs: Vec<(TxOut, Option<(HtlcDirection, &UpdateAddHtlc)>)> =
        vec![];
    if to_local_sat >= owner_dust_limit {
        outputs.push((
            TxOut::ln_to_local(
                to_local_sat,
                keys.revocation_pubkey,
                keys.delayed_payment_pubkey,
                owner_to_self_delay,
            ),
            None,
        ));
    }
    if to_remote_sat >= owner_dust_limit {
        outputs.push((
            TxOut::ln_to_remote(
                to_remote_sat,
                keys.counterparty_payment_pubkey,
            ),
            None,
        ));
    }
    for (htlc_ref, add) in &spec.htlcs {
        if is_htlc_trimmed(
            htlc_ref.direction,
            add.amount_msat,
            owner_dust_limit,
            spec.feerate_per_kw,
        ) {
            continue;
        }
        let txout = match htlc_ref.direction {
            HtlcDirection::Out => TxOut::ln_offered_htlc(
                add.amount_msat / 1000,
                keys.revocation_pubkey,
                keys.htlc_pubkey,
                keys.counterparty_htlc_pubkey,
                add.payment_hash,
            ),
            HtlcDirection::In => TxOut::ln_received_htlc(
                add.amount_msat / 1000,
                keys.revocation_pubkey,
                keys.htlc_pubkey,
                keys.counterparty_htlc_pubkey,
                add.cltv_expiry,
                add.payment_hash,
            ),
        };
        outputs.push((txout, Some((htlc_ref.direction, add))));
    }

    // BIP-69 output ordering; it is also the HTLC signing order
    outputs.sort_by(|(a, _), (b, _)| {
        a.value
            .cmp(&b.value)
            .then_with(|| a.script_pubkey.cmp(&b.script_pubkey))
    });

    let commitment_tx = Transaction {
        version: TX_VERSION_COMMITMENT,
        lock_time,
        input: vec![TxIn {
            previous_output: funding.outpoint(),
            script_sig: empty!(),
            sequence,
            witness: empty!(),
        }],
        output: outputs.iter().map(|(txout, _)| txout.clone()).collect(),
    };
    let commitment_txid = commitment_tx.txid();

    let mut timeouts = vec![];
    let mut successes = vec![];
    for (vout, (_, add)) in outputs.iter().enumerate() {
        let (direction, add) = match add {
            Some((direction, add)) => (*direction, add),
            None => continue,
        };
        let (claim_fee, cltv_expiry) = match direction {
            HtlcDirection::Out => {
                (htlc_timeout_fee(spec.feerate_per_kw), add.cltv_expiry)
            }
            HtlcDirection::In => (htlc_success_fee(spec.feerate_per_kw), 0),
        };
        let tx = Transaction {
            version: TX_VERSION_COMMITMENT,
            lock_time: PackedLockTime(cltv_expiry),
            input: vec![TxIn {
                previous_output: OutPoint::new(commitment_txid, vout as u32),
                script_sig: empty!(),
                sequence: Sequence(0),
                witness: empty!(),
            }],
            output: vec![TxOut::ln_htlc_output(
                (add.amount_msat / 1000).saturating_sub(claim_fee),
                keys.revocation_pubkey,
                keys.delayed_payment_pubkey,
                owner_to_self_delay,
            )],
        };
        let witness_script = match direction {
            HtlcDirection::Out => WitnessScript::ln_offered_htlc(
                add.amount_msat / 1000,
                keys.revocation_pubkey,
                keys.htlc_pubkey,
                keys.counterparty_htlc_pubkey,
                add.payment_hash,
            ),
            HtlcDirection::In => WitnessScript::ln_received_htlc(
                add.amount_msat / 1000,
                keys.revocation_pubkey,
                keys.htlc_pubkey,
                keys.counterparty_htlc_pubkey,
                add.cltv_expiry,
                add.payment_hash,
            ),
        };
        match direction {
            HtlcDirection::Out => timeouts.push(HtlcTx::Timeout {
                tx,
                which_input: 0,
                witness_script,
                value: add.amount_msat / 1000,
                htlc_id: add.htlc_id,
                remote_signature: None,
            }),
            HtlcDirection::In => successes.push(HtlcTx::Success {
                tx,
                which_input: 0,
                witness_script,
                value: add.amount_msat / 1000,
                htlc_id: add.htlc_id,
                remote_signature: None,
            }),
        }
    }

    (commitment_tx, sort_both_htlc_txs(timeouts, successes))
}

/// Computes the segwit v0 `SIGHASH_ALL` message of the given transaction
/// input
pub fn segwit_sighash(
    tx: &Transaction,
    input_index: usize,
    witness_script: &Script,
    value: u64,
) -> Message {
    let sighash = SighashCache::new(tx)
        .segwit_signature_hash(
            input_index,
            witness_script,
            value,
            EcdsaSighashType::All,
        )
        .expect("input index is checked to be within the transaction");
    Message::from_slice(&sighash[..])
        .expect("sighash is always a valid 32-byte message")
}

/// Signs a segwit v0 transaction input
pub fn sign_tx_input<C: Signing>(
    secp: &Secp256k1<C>,
    tx: &Transaction,
    input_index: usize,
    witness_script: &Script,
    value: u64,
    seckey: &SecretKey,
) -> Signature {
    secp.sign_ecdsa(
        &segwit_sighash(tx, input_index, witness_script, value),
        seckey,
    )
}

/// Verifies a counterparty signature over a segwit v0 transaction input
pub fn verify_tx_input_signature<C: Verification>(
    secp: &Secp256k1<C>,
    tx: &Transaction,
    input_index: usize,
    witness_script: &Script,
    value: u64,
    signature: &Signature,
    pubkey: &PublicKey,
) -> Result<(), secp256k1::Error> {
    secp.verify_ecdsa(
        &segwit_sighash(tx, input_index, witness_script, value),
        signature,
        pubkey,
    )
}

/// Renders a signature in its witness stack form: DER with the
/// `SIGHASH_ALL` byte appended
pub fn witness_signature(signature: &Signature) -> Vec<u8> {
    let mut data = signature.serialize_der().to_vec();
    data.push(EcdsaSighashType::All.to_u32() as u8);
    data
}

/// Completes the funding input of a commitment transaction with both
/// parties' signatures. The 2-of-2 funding script orders public keys
/// lexicographically, and signatures must follow the same order.
pub fn finalize_funding_witness(
    tx: &mut Transaction,
    input_index: usize,
    witness_script: &WitnessScript,
    local: (PublicKey, Signature),
    remote: (PublicKey, Signature),
) {
    let (first, second) =
        if local.0.serialize()[..] <= remote.0.serialize()[..] {
            (local.1, remote.1)
        } else {
            (remote.1, local.1)
        };
    tx.input[input_index].witness = Witness::from_vec(vec![
        vec![],
        witness_signature(&first),
        witness_signature(&second),
        witness_script.as_inner().to_bytes(),
    ]);
}

/// Completes an HTLC-timeout transaction with both HTLC signatures
pub fn finalize_htlc_timeout_witness(
    tx: &mut Transaction,
    input_index: usize,
    witness_script: &WitnessScript,
    remote_signature: &Signature,
    local_signature: &Signature,
) {
    tx.input[input_index].witness = Witness::from_vec(vec![
        vec![],
        witness_signature(remote_signature),
        witness_signature(local_signature),
        vec![],
        witness_script.as_inner().to_bytes(),
    ]);
}

/// Completes an HTLC-success transaction with both HTLC signatures and the
/// payment preimage
pub fn finalize_htlc_success_witness(
    tx: &mut Transaction,
    input_index: usize,
    witness_script: &WitnessScript,
    remote_signature: &Signature,
    local_signature: &Signature,
    payment_preimage: &[u8],
) {
    tx.input[input_index].witness = Witness::from_vec(vec![
        vec![],
        witness_signature(remote_signature),
        witness_signature(local_signature),
        payment_preimage.to_vec(),
        witness_script.as_inner().to_bytes(),
    ]);
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use amplify::hex::ToHex;
    use amplify::DumbDefault;
    use bitcoin::Txid;

    use super::*;

    macro_rules! pk {
        ($hex:expr) => {
            PublicKey::from_str($hex).unwrap()
        };
    }

    #[test]
    fn bolt3_funding_witness_script() {
        let local_funding_pubkey = pk!("023da092f6980e58d2c037173180e9a465476026ee50f96695963e8efe436f54eb");
        let remote_funding_pubkey = pk!("030e9f7b623d2ccc7c9bd44d66d5ce21ce504c0acf6385a132cec6d3c39fa711c1");
        let witness_script = WitnessScript::ln_funding(
            0,
            &LocalPubkey {
                key: local_funding_pubkey,
                ..LocalPubkey::dumb_default()
            },
            remote_funding_pubkey,
        );
        assert_eq!(
            witness_script.to_hex(),
            "5221023da092f6980e58d2c037173180e9a465476026ee50f96695963e8efe436f\
            54eb21030e9f7b623d2ccc7c9bd44d66d5ce21ce504c0acf6385a132cec6d3c39fa\
            711c152ae"
        );
    }

    #[test]
    fn bolt3_obscured_commitment_no() {
        let funder_payment_basepoint = pk!("034f355bdcb7cc0af728ef3cceb9615d90684bb5b2ca5f859ab0f0b704075871aa");
        let fundee_payment_basepoint = pk!("032c0b7cf95324a07d05398b240174dc0c2be444d96b159aa6c7f7b1e668680991");
        let obscured = ObscuredCommitmentNumber::obscure(
            42,
            funder_payment_basepoint,
            fundee_payment_basepoint,
        );
        assert_eq!(obscured.into_inner(), 0x2bb038521914 ^ 42);
    }

    #[test]
    fn obscured_number_roundtrip() {
        let funder = pk!("034f355bdcb7cc0af728ef3cceb9615d90684bb5b2ca5f859ab0f0b704075871aa");
        let fundee = pk!("032c0b7cf95324a07d05398b240174dc0c2be444d96b159aa6c7f7b1e668680991");
        for number in [0u64, 1, 42, 0xFFFF, LOWER_48_BITS] {
            let obscured =
                ObscuredCommitmentNumber::obscure(number, funder, fundee);
            assert_eq!(obscured.unobscure(funder, fundee), number);

            let (lock_time, sequence) = obscured.to_locktime_sequence();
            assert_eq!(lock_time.0 >> 24, LOCKTIME_TAG);
            assert_eq!(sequence.0 >> 24, SEQUENCE_TAG);
            assert_eq!(
                ObscuredCommitmentNumber::from_locktime_sequence(
                    lock_time, sequence
                ),
                Some(obscured)
            );
        }
    }

    #[test]
    fn untagged_locktime_sequence_rejected() {
        assert_eq!(
            ObscuredCommitmentNumber::from_locktime_sequence(
                PackedLockTime(42),
                Sequence(0x80FFFFFF)
            ),
            None
        );
        assert_eq!(
            ObscuredCommitmentNumber::from_locktime_sequence(
                PackedLockTime(0x20FFFFFF),
                Sequence::MAX
            ),
            None
        );
    }

    #[test]
    fn commitment_fee_matches_bolt3() {
        // BOLT-3 appendix C: simple commitment, feerate 15000, no HTLCs
        let spec = CommitmentSpec::with(7_000_000_000, 3_000_000_000, 15000);
        assert_eq!(commit_tx_fee(546, &spec), 10860);
    }

    #[test]
    fn htlc_claim_fees() {
        assert_eq!(htlc_timeout_fee(1000), 663);
        assert_eq!(htlc_success_fee(1000), 703);
    }

    fn dumb_htlc_tx(vout: u32, timeout: bool) -> HtlcTx {
        let tx = Transaction {
            version: TX_VERSION_COMMITMENT,
            lock_time: PackedLockTime(0),
            input: vec![TxIn {
                previous_output: OutPoint::new(
                    Txid::from_str(
                        "fd2105607605d2302994ffea703b09f66b6351816ee737a93e42a841ea20bbad",
                    )
                    .unwrap(),
                    vout,
                ),
                script_sig: empty!(),
                sequence: Sequence(0),
                witness: empty!(),
            }],
            output: vec![],
        };
        if timeout {
            HtlcTx::Timeout {
                tx,
                which_input: 0,
                witness_script: WitnessScript::default(),
                value: 1000,
                htlc_id: vout as u64,
                remote_signature: None,
            }
        } else {
            HtlcTx::Success {
                tx,
                which_input: 0,
                witness_script: WitnessScript::default(),
                value: 1000,
                htlc_id: vout as u64,
                remote_signature: None,
            }
        }
    }

    #[test]
    fn htlc_txs_sorted_by_spent_output() {
        let sorted = sort_both_htlc_txs(
            vec![dumb_htlc_tx(4, true), dumb_htlc_tx(0, true)],
            vec![dumb_htlc_tx(3, false), dumb_htlc_tx(1, false)],
        );
        assert_eq!(
            sorted
                .iter()
                .map(HtlcTx::spent_commitment_vout)
                .collect::<Vec<_>>(),
            vec![0, 1, 3, 4]
        );
        // determinism
        let sorted_again = sort_both_htlc_txs(
            vec![dumb_htlc_tx(0, true), dumb_htlc_tx(4, true)],
            vec![dumb_htlc_tx(1, false), dumb_htlc_tx(3, false)],
        );
        assert_eq!(
            sorted_again
                .iter()
                .map(HtlcTx::spent_commitment_vout)
                .collect::<Vec<_>>(),
            vec![0, 1, 3, 4]
        );
    }
}
