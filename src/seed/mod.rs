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

//! aezeed wallet-seed codec.
//!
//! A [`CipherSeed`] packs wallet entropy together with a wallet birthday
//! into a versioned, checksum-protected envelope enciphered with AEZ under a
//! scrypt-stretched passphrase, and renders it as a 24-word mnemonic. The
//! envelope is what gets written down by the user; everything else in this
//! module exists to move between the three forms
//!
//! ```text
//! CipherSeed (19 bytes) <-> enciphered blob (33 bytes) <-> 24 words
//! ```

mod mnemonic;

pub use mnemonic::{Mnemonic, BITS_PER_WORD, NUM_MNEMONIC_WORDS};

use bitcoin::secp256k1::rand::{thread_rng, RngCore};

/// Version of the cipher-seed scheme produced by this library
pub const CIPHER_SEED_VERSION: u8 = 0;

/// Size of the plaintext cipher-seed: version, birthday and entropy
pub const DECIPHERED_CIPHER_SEED_SIZE: usize = 19;

/// Size of the enciphered envelope: version, AEZ ciphertext, salt, checksum
pub const ENCIPHERED_CIPHER_SEED_SIZE: usize = 33;

/// Size of the wallet entropy carried by the seed
pub const ENTROPY_SIZE: usize = 16;

/// Size of the per-encipherment scrypt salt
pub const SALT_SIZE: usize = 5;

/// Size of the associated data authenticated by AEZ: version and salt
pub const AD_SIZE: usize = 1 + SALT_SIZE;

/// Size of the CRC-32 checksum trailing the envelope
pub const CHECKSUM_SIZE: usize = 4;

/// Ciphertext expansion added by AEZ authentication
pub const CIPHER_TEXT_EXPANSION: usize = 4;

/// Length of the scrypt-derived AEZ key
pub const KEY_LEN: usize = 32;

/// Passphrase used when the user has not provided one
pub const DEFAULT_PASSPHRASE: &[u8] = b"aezeed";

/// Timestamp of the bitcoin mainnet genesis block header, the epoch of the
/// wallet birthday counter
pub const BITCOIN_GENESIS_TIMESTAMP: u64 = 1231006505;

// scrypt parameters: N = 2^15 = 32768, r = 8, p = 1
const SCRYPT_LOG_N: u8 = 15;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

/// Errors happening during deciphering of a cipher seed or decoding of a
/// mnemonic
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum SeedError {
    /// cipher seed carries unsupported version {0}; only version 0 can be
    /// deciphered by this library
    UnsupportedVersion(u8),

    /// mnemonic checksum 0x{actual_crc32:08x} does not match the expected
    /// value 0x{expected_crc32:08x}; one or more words of the mnemonic are
    /// wrong
    IncorrectMnemonic {
        expected_crc32: u32,
        actual_crc32: u32,
    },

    /// cipher seed can't be deciphered with the provided passphrase
    InvalidPass,

    /// mnemonic must consist of {expected} words, while {found} words are
    /// provided
    InvalidWordCount { expected: usize, found: usize },

    /// word "{0}" is not a part of the used wordlist
    UnknownMnemonicWord(String),
}

/// Plaintext of the aezeed envelope: the data a wallet needs to be restored.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct CipherSeed {
    /// Scheme version under which the seed was enciphered
    pub internal_version: u8,

    /// Wallet birthday: days since the bitcoin genesis block. Lets a
    /// restoring wallet skip scanning the chain before its creation.
    pub birthday: u16,

    /// Wallet entropy
    pub entropy: [u8; ENTROPY_SIZE],

    /// Salt for the scrypt passphrase stretching; generated afresh on each
    /// encipherment and carried in clear within the envelope
    pub salt: [u8; SALT_SIZE],
}

impl CipherSeed {
    /// Creates a new cipher seed with fresh random entropy and salt
    pub fn new(birthday: u16) -> CipherSeed {
        let mut entropy = [0u8; ENTROPY_SIZE];
        thread_rng().fill_bytes(&mut entropy);
        CipherSeed::with_entropy(birthday, entropy)
    }

    /// Creates a cipher seed around externally supplied entropy. The salt is
    /// still generated internally.
    pub fn with_entropy(
        birthday: u16,
        entropy: [u8; ENTROPY_SIZE],
    ) -> CipherSeed {
        let mut salt = [0u8; SALT_SIZE];
        thread_rng().fill_bytes(&mut salt);
        CipherSeed {
            internal_version: CIPHER_SEED_VERSION,
            birthday,
            entropy,
            salt,
        }
    }

    /// Unix timestamp of the wallet birthday
    pub fn birthday_time(&self) -> u64 {
        BITCOIN_GENESIS_TIMESTAMP + self.birthday as u64 * 24 * 60 * 60
    }

    /// Enciphers the seed under the given passphrase, producing the 33-byte
    /// envelope: version, 23 bytes of AEZ ciphertext, salt and a big-endian
    /// CRC-32 over everything preceding it.
    pub fn encipher(
        &self,
        passphrase: Option<&[u8]>,
    ) -> [u8; ENCIPHERED_CIPHER_SEED_SIZE] {
        let passphrase = passphrase.unwrap_or(DEFAULT_PASSPHRASE);

        let mut plaintext = [0u8; DECIPHERED_CIPHER_SEED_SIZE];
        plaintext[0] = self.internal_version;
        plaintext[1..3].copy_from_slice(&self.birthday.to_be_bytes());
        plaintext[3..].copy_from_slice(&self.entropy);

        let mut ad = [0u8; AD_SIZE];
        ad[0] = self.internal_version;
        ad[1..].copy_from_slice(&self.salt);

        let key = stretch_passphrase(passphrase, &self.salt);
        let ciphertext = aez::encrypt(
            &key,
            &[],
            &[&ad],
            CIPHER_TEXT_EXPANSION,
            &plaintext,
        );
        debug_assert_eq!(
            ciphertext.len(),
            DECIPHERED_CIPHER_SEED_SIZE + CIPHER_TEXT_EXPANSION
        );

        let mut cipher_seed = [0u8; ENCIPHERED_CIPHER_SEED_SIZE];
        cipher_seed[0] = self.internal_version;
        cipher_seed[1..24].copy_from_slice(&ciphertext);
        cipher_seed[24..29].copy_from_slice(&self.salt);
        let checksum =
            crc32fast::hash(&cipher_seed[..ENCIPHERED_CIPHER_SEED_SIZE
                - CHECKSUM_SIZE]);
        cipher_seed[29..].copy_from_slice(&checksum.to_be_bytes());
        cipher_seed
    }

    /// Deciphers a 33-byte envelope back into the seed plaintext.
    ///
    /// Failures are reported in the order they can be detected: an unknown
    /// version first, then a checksum mismatch (pointing at mistyped
    /// mnemonic words), and only after that an AEZ authentication failure
    /// (pointing at a wrong passphrase).
    pub fn decipher(
        cipher_seed: [u8; ENCIPHERED_CIPHER_SEED_SIZE],
        passphrase: Option<&[u8]>,
    ) -> Result<CipherSeed, SeedError> {
        let passphrase = passphrase.unwrap_or(DEFAULT_PASSPHRASE);

        let version = cipher_seed[0];
        if version != CIPHER_SEED_VERSION {
            return Err(SeedError::UnsupportedVersion(version));
        }

        let payload = &cipher_seed
            [..ENCIPHERED_CIPHER_SEED_SIZE - CHECKSUM_SIZE];
        let expected_crc32 = crc32fast::hash(payload);
        let mut actual = [0u8; CHECKSUM_SIZE];
        actual.copy_from_slice(&cipher_seed[29..]);
        let actual_crc32 = u32::from_be_bytes(actual);
        if expected_crc32 != actual_crc32 {
            return Err(SeedError::IncorrectMnemonic {
                expected_crc32,
                actual_crc32,
            });
        }

        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(&cipher_seed[24..29]);

        let mut ad = [0u8; AD_SIZE];
        ad[0] = version;
        ad[1..].copy_from_slice(&salt);

        let key = stretch_passphrase(passphrase, &salt);
        let plaintext = aez::decrypt(
            &key,
            &[],
            &[&ad],
            CIPHER_TEXT_EXPANSION,
            &cipher_seed[1..24],
        )
        .ok_or(SeedError::InvalidPass)?;

        let mut birthday = [0u8; 2];
        birthday.copy_from_slice(&plaintext[1..3]);
        let mut entropy = [0u8; ENTROPY_SIZE];
        entropy.copy_from_slice(&plaintext[3..]);

        Ok(CipherSeed {
            internal_version: plaintext[0],
            birthday: u16::from_be_bytes(birthday),
            entropy,
            salt,
        })
    }

    /// Renders the seed as a 24-word mnemonic under the given passphrase and
    /// wordlist
    pub fn to_mnemonic(
        &self,
        passphrase: Option<&[u8]>,
        wordlist: bip39::Language,
    ) -> Mnemonic {
        Mnemonic::encode(self.encipher(passphrase), wordlist)
    }
}

/// Re-enciphers the seed behind `mnemonic` under a new passphrase, producing
/// a new mnemonic. The entropy and the birthday are preserved; the salt is
/// generated afresh, so the new mnemonic shares no visible material with the
/// old one.
pub fn change_passphrase(
    mnemonic: &Mnemonic,
    old_passphrase: Option<&[u8]>,
    new_passphrase: Option<&[u8]>,
    wordlist: bip39::Language,
) -> Result<Mnemonic, SeedError> {
    let seed = mnemonic.to_cipher_seed(old_passphrase, wordlist)?;
    let reenciphered =
        CipherSeed::with_entropy(seed.birthday, seed.entropy);
    Ok(reenciphered.to_mnemonic(new_passphrase, wordlist))
}

fn stretch_passphrase(
    passphrase: &[u8],
    salt: &[u8; SALT_SIZE],
) -> [u8; KEY_LEN] {
    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P)
        .expect("hardcoded scrypt parameters are valid");
    let mut key = [0u8; KEY_LEN];
    scrypt::scrypt(passphrase, salt, &params, &mut key)
        .expect("32-byte output length is valid for scrypt");
    key
}

#[cfg(test)]
mod test {
    use super::*;

    const TEST_ENTROPY: [u8; ENTROPY_SIZE] = [
        0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A,
        0x0B, 0x0C, 0x0D, 0x0E, 0x0F,
    ];

    #[test]
    fn encipher_decipher_roundtrip() {
        let seed = CipherSeed::with_entropy(0, TEST_ENTROPY);
        let mnemonic = seed.to_mnemonic(None, bip39::Language::English);
        let recovered = mnemonic
            .to_cipher_seed(None, bip39::Language::English)
            .unwrap();
        assert_eq!(recovered.entropy, TEST_ENTROPY);
        assert_eq!(recovered.birthday, 0);
        assert_eq!(recovered.internal_version, CIPHER_SEED_VERSION);
    }

    #[test]
    fn wrong_passphrase_is_detected() {
        let seed = CipherSeed::with_entropy(0, TEST_ENTROPY);
        let mnemonic = seed.to_mnemonic(None, bip39::Language::English);
        assert_eq!(
            mnemonic.to_cipher_seed(Some(b"bad"), bip39::Language::English),
            Err(SeedError::InvalidPass)
        );
    }

    #[test]
    fn passphrase_sensitivity() {
        let seed = CipherSeed::with_entropy(0xCAFE, TEST_ENTROPY);
        let enciphered = seed.encipher(Some(b"first"));
        assert_eq!(
            CipherSeed::decipher(enciphered, Some(b"second")),
            Err(SeedError::InvalidPass)
        );
        let deciphered =
            CipherSeed::decipher(enciphered, Some(b"first")).unwrap();
        assert_eq!(deciphered.entropy, TEST_ENTROPY);
        assert_eq!(deciphered.birthday, 0xCAFE);
    }

    #[test]
    fn wrong_word_is_detected() {
        let seed = CipherSeed::with_entropy(0, TEST_ENTROPY);
        let mnemonic = seed.to_mnemonic(None, bip39::Language::English);
        let wordlist = bip39::Language::English.word_list();

        let mut words = mnemonic.words().to_vec();
        let last = words.last().unwrap().clone();
        let index = wordlist
            .iter()
            .position(|word| *word == last.as_str())
            .unwrap();
        // replace the last word with its wordlist neighbour
        let neighbour = if index == wordlist.len() - 1 {
            index - 1
        } else {
            index + 1
        };
        *words.last_mut().unwrap() = wordlist[neighbour].to_string();
        let tampered = Mnemonic::with_words(words).unwrap();

        match tampered.to_cipher_seed(None, bip39::Language::English) {
            Err(SeedError::IncorrectMnemonic {
                expected_crc32,
                actual_crc32,
            }) => assert_ne!(expected_crc32, actual_crc32),
            other => panic!("tampered mnemonic deciphered: {:?}", other),
        }
    }

    #[test]
    fn change_passphrase_preserves_entropy() {
        let seed = CipherSeed::with_entropy(365, TEST_ENTROPY);
        let mnemonic1 = seed.to_mnemonic(None, bip39::Language::English);
        let mnemonic2 = change_passphrase(
            &mnemonic1,
            None,
            Some(b"newpass"),
            bip39::Language::English,
        )
        .unwrap();
        assert_ne!(mnemonic1, mnemonic2);

        let recovered = mnemonic2
            .to_cipher_seed(Some(b"newpass"), bip39::Language::English)
            .unwrap();
        assert_eq!(recovered.entropy, TEST_ENTROPY);
        assert_eq!(recovered.birthday, 365);
    }

    #[test]
    fn bit_flips_never_decipher() {
        let seed = CipherSeed::with_entropy(0, TEST_ENTROPY);
        let enciphered = seed.encipher(None);
        for bit in 0..ENCIPHERED_CIPHER_SEED_SIZE * 8 {
            let mut tampered = enciphered;
            tampered[bit / 8] ^= 1 << (bit % 8);
            assert!(
                CipherSeed::decipher(tampered, None).is_err(),
                "flipping bit {} went undetected",
                bit
            );
        }
    }

    #[test]
    fn birthday_time_epoch() {
        let seed = CipherSeed::with_entropy(0, TEST_ENTROPY);
        assert_eq!(seed.birthday_time(), BITCOIN_GENESIS_TIMESTAMP);
        let seed = CipherSeed::with_entropy(2, TEST_ENTROPY);
        assert_eq!(
            seed.birthday_time(),
            BITCOIN_GENESIS_TIMESTAMP + 2 * 86400
        );
    }
}
