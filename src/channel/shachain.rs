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

//! Per-commitment secret scheme (BOLT-3 "shachain").
//!
//! Every commitment transaction number maps to a 256-bit secret derived from
//! a per-channel seed. Secrets are revealed to the counterparty in the order
//! of increasing commitment numbers, and the derivation tree is built so
//! that a revealed secret allows rederiving every earlier one. The
//! [`ShachainStore`] keeps the counterparty reveals in the compact ≤ 49
//! bucket form.

use amplify::{Slice32, Wrapper};
use bitcoin::hashes::{sha256, Hash};
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey, Signing};

/// Number of index bits in the shachain scheme, and the maximum number of
/// storage buckets
pub const SHACHAIN_INDEX_BITS: u8 = 48;

/// Highest valid shachain index (and commitment number)
pub const MAX_SHACHAIN_INDEX: u64 = (1 << SHACHAIN_INDEX_BITS) - 1;

/// Errors of the compact secret store
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum ShachainError {
    /// commitment number {0} exceeds the 48-bit shachain index space
    IndexOutOfRange(u64),

    /// the secret provided for commitment number {provided} does not
    /// rederive the already known secret of commitment number {known};
    /// the counterparty is revealing an inconsistent secret chain
    SecretMismatch { provided: u64, known: u64 },
}

/// Derives the per-commitment secret for the given commitment number from a
/// 256-bit per-channel seed
pub fn from_seed(seed: Slice32, commitment_number: u64) -> Slice32 {
    derive(
        seed,
        SHACHAIN_INDEX_BITS,
        commitment_index(commitment_number),
    )
}

/// Computes the per-commitment point corresponding to a per-commitment
/// secret
pub fn per_commitment_point<C: Signing>(
    secp: &Secp256k1<C>,
    secret: Slice32,
) -> PublicKey {
    PublicKey::from_secret_key(
        secp,
        &SecretKey::from_slice(secret.as_inner())
            .expect("negligible probability"),
    )
}

/// Commitment numbers count up while shachain derivation indexes count
/// down, so that later secrets can't be derived from earlier ones
#[inline]
fn commitment_index(commitment_number: u64) -> u64 {
    MAX_SHACHAIN_INDEX - (commitment_number & MAX_SHACHAIN_INDEX)
}

/// BOLT-3 secret derivation: starting from the base secret, flip the bit
/// and hash for each of the `known_bits` lowest index bits which are set
fn derive(base: Slice32, known_bits: u8, index: u64) -> Slice32 {
    let mut secret = base.into_inner();
    for bit in (0..known_bits).rev() {
        if index & (1u64 << bit) != 0 {
            secret[bit as usize / 8] ^= 1 << (bit % 8);
            secret = sha256::Hash::hash(&secret).into_inner();
        }
    }
    Slice32::from_inner(secret)
}

/// Position of the storage bucket able to hold the secret with the given
/// derivation index: the number of trailing zero bits of the index
#[inline]
fn bucket_pos(index: u64) -> u8 {
    if index == 0 {
        SHACHAIN_INDEX_BITS
    } else {
        index.trailing_zeros() as u8
    }
}

/// One remembered `(index, secret)` pair of the compact store
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[derive(StrictEncode, StrictDecode)]
struct Bucket {
    index: u64,
    secret: Slice32,
}

/// Compact store of counterparty per-commitment secrets.
///
/// Keeps at most 49 `(index, secret)` buckets; any secret older than a
/// stored one is rederived on demand, so the store size stays constant over
/// the life of the channel no matter how many commitments it went through.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
#[derive(StrictEncode, StrictDecode)]
pub struct ShachainStore {
    buckets: Vec<Bucket>,
}

impl ShachainStore {
    /// Creates an empty store
    pub fn new() -> ShachainStore {
        ShachainStore { buckets: vec![] }
    }

    /// Inserts the secret revealed for the given commitment number.
    ///
    /// Secrets already remembered which must be derivable from the new one
    /// are verified against it; a mismatch means the counterparty revealed
    /// a secret not belonging to its chain.
    pub fn insert(
        &mut self,
        commitment_number: u64,
        secret: Slice32,
    ) -> Result<(), ShachainError> {
        if commitment_number > MAX_SHACHAIN_INDEX {
            return Err(ShachainError::IndexOutOfRange(commitment_number));
        }
        let index = commitment_index(commitment_number);
        let pos = bucket_pos(index);
        for bucket in &self.buckets {
            let known_pos = bucket_pos(bucket.index);
            if known_pos >= pos {
                continue;
            }
            let rederived = derive(
                secret,
                pos,
                bucket.index & ((1u64 << pos) - 1),
            );
            if rederived != bucket.secret {
                return Err(ShachainError::SecretMismatch {
                    provided: commitment_number,
                    known: MAX_SHACHAIN_INDEX - bucket.index,
                });
            }
        }
        self.buckets
            .retain(|bucket| bucket_pos(bucket.index) > pos);
        self.buckets.push(Bucket { index, secret });
        debug_assert!(self.buckets.len() <= SHACHAIN_INDEX_BITS as usize + 1);
        Ok(())
    }

    /// Returns the secret for the given commitment number, rederiving it
    /// from a stored bucket if necessary. `None` means the secret was never
    /// revealed.
    pub fn secret(&self, commitment_number: u64) -> Option<Slice32> {
        if commitment_number > MAX_SHACHAIN_INDEX {
            return None;
        }
        let index = commitment_index(commitment_number);
        for bucket in &self.buckets {
            let pos = bucket_pos(bucket.index);
            let mask = !((1u64 << pos) - 1);
            if bucket.index & mask == index & mask {
                return Some(derive(
                    bucket.secret,
                    pos,
                    index & !mask,
                ));
            }
        }
        None
    }

    /// Number of currently occupied buckets
    #[inline]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Detects an empty store
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[cfg(test)]
mod test {
    use amplify::hex::FromHex;

    use super::*;

    fn seed(hex: &str) -> Slice32 {
        Slice32::from_hex(hex).unwrap()
    }

    #[test]
    fn bolt3_generation_final_node() {
        // generate_from_seed 0 final node
        assert_eq!(
            from_seed(seed(
                "0000000000000000000000000000000000000000000000000000000000000000"
            ), 0),
            seed("02a40c85b6f28da08dfdbe0926c53fab2de6d28c10301f8f7c4073d5e42e3148")
        );
        // generate_from_seed FF final node
        assert_eq!(
            from_seed(seed(
                "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF"
            ), 0),
            seed("7cc854b54e3e0dcdb010d7a3fee464a9687be6e8db3be6854c475621e007a5dc")
        );
    }

    #[test]
    fn bolt3_generation_alternate_bits() {
        // generate_from_seed FF alternate bits 1: I = 0xaaaaaaaaaaa
        assert_eq!(
            from_seed(
                seed("FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF"),
                MAX_SHACHAIN_INDEX - 0xaaaaaaaaaaa
            ),
            seed("56f4008fb007ca9acf0e15b054d5c9fd12ee06cea347914ddbaed70d1c13a528")
        );
        // generate_from_seed FF alternate bits 2: I = 0x555555555555
        assert_eq!(
            from_seed(
                seed("FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF"),
                MAX_SHACHAIN_INDEX - 0x555555555555
            ),
            seed("9015daaeb06dba4ccc05b91b2f73bd54405f2be9f217fbacd3c5ac2e62327d31")
        );
    }

    #[test]
    fn store_rederives_older_secrets() {
        let chain_seed = seed(
            "0101010101010101010101010101010101010101010101010101010101010101",
        );
        let mut store = ShachainStore::new();
        for number in 0..100u64 {
            store
                .insert(number, from_seed(chain_seed, number))
                .unwrap();
            assert!(store.len() <= SHACHAIN_INDEX_BITS as usize + 1);
        }
        for number in 0..100u64 {
            assert_eq!(
                store.secret(number),
                Some(from_seed(chain_seed, number)),
                "secret for commitment {} lost",
                number
            );
        }
        assert_eq!(store.secret(100), None);
    }

    #[test]
    fn store_rejects_inconsistent_chain() {
        let chain_seed = seed(
            "0101010101010101010101010101010101010101010101010101010101010101",
        );
        let mut store = ShachainStore::new();
        for number in 0..8u64 {
            store
                .insert(number, from_seed(chain_seed, number))
                .unwrap();
        }
        // commitment 15 maps to a derivation index able to rederive the
        // stored buckets, so an unrelated secret must be caught
        let unrelated = seed(
            "0202020202020202020202020202020202020202020202020202020202020202",
        );
        assert!(matches!(
            store.insert(15, from_seed(unrelated, 15)),
            Err(ShachainError::SecretMismatch { provided: 15, .. })
        ));
    }

    #[test]
    fn index_out_of_range() {
        let mut store = ShachainStore::new();
        assert_eq!(
            store.insert(1 << 48, Slice32::default()),
            Err(ShachainError::IndexOutOfRange(1 << 48))
        );
        assert_eq!(store.secret(1 << 48), None);
    }

    #[test]
    fn per_commitment_point_matches_secret() {
        let secp = Secp256k1::new();
        let secret = from_seed(
            seed("0303030303030303030303030303030303030303030303030303030303030303"),
            0,
        );
        let point = per_commitment_point(&secp, secret);
        let sk = SecretKey::from_slice(secret.as_inner()).unwrap();
        assert_eq!(point, PublicKey::from_secret_key(&secp, &sk));
    }
}
