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

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use super::{
    CipherSeed, SeedError, ENCIPHERED_CIPHER_SEED_SIZE,
};

/// Number of words in an aezeed mnemonic
pub const NUM_MNEMONIC_WORDS: usize = 24;

/// Number of wordlist index bits carried by each mnemonic word
pub const BITS_PER_WORD: usize = 11;

/// 24-word rendering of an enciphered seed.
///
/// Each word carries 11 bits of the 33-byte envelope read as a big-endian
/// bit stream; `24 × 11 = 264` bits cover the envelope exactly, so the
/// mapping is a bijection and no separate mnemonic-level checksum exists
/// (the envelope carries its own CRC-32).
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Mnemonic(Vec<String>);

impl Display for Mnemonic {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" "))
    }
}

impl FromStr for Mnemonic {
    type Err = SeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mnemonic::with_words(
            s.split_whitespace().map(str::to_owned).collect(),
        )
    }
}

impl Mnemonic {
    /// Constructs a mnemonic from a list of words, checking only the word
    /// count; membership in a wordlist is checked at decoding time.
    pub fn with_words(words: Vec<String>) -> Result<Mnemonic, SeedError> {
        if words.len() != NUM_MNEMONIC_WORDS {
            return Err(SeedError::InvalidWordCount {
                expected: NUM_MNEMONIC_WORDS,
                found: words.len(),
            });
        }
        Ok(Mnemonic(words))
    }

    /// Returns the words of the mnemonic
    #[inline]
    pub fn words(&self) -> &[String] {
        &self.0
    }

    /// Encodes a 33-byte enciphered seed into a mnemonic, taking 11 bits per
    /// word from the big-endian bit stream of the envelope
    pub fn encode(
        cipher_seed: [u8; ENCIPHERED_CIPHER_SEED_SIZE],
        wordlist: bip39::Language,
    ) -> Mnemonic {
        let wordlist = wordlist.word_list();
        let mut words = Vec::with_capacity(NUM_MNEMONIC_WORDS);
        let mut acc = 0u32;
        let mut bits = 0usize;
        for byte in cipher_seed {
            acc = (acc << 8) | byte as u32;
            bits += 8;
            while bits >= BITS_PER_WORD {
                bits -= BITS_PER_WORD;
                let index = (acc >> bits) as usize & 0x7FF;
                acc &= (1 << bits) - 1;
                words.push(wordlist[index].to_owned());
            }
        }
        debug_assert_eq!(words.len(), NUM_MNEMONIC_WORDS);
        debug_assert_eq!(bits, 0);
        Mnemonic(words)
    }

    /// Decodes the mnemonic back into the 33-byte enciphered seed
    pub fn decode(
        &self,
        wordlist: bip39::Language,
    ) -> Result<[u8; ENCIPHERED_CIPHER_SEED_SIZE], SeedError> {
        let wordlist = wordlist.word_list();
        let mut cipher_seed = [0u8; ENCIPHERED_CIPHER_SEED_SIZE];
        let mut pos = 0usize;
        let mut acc = 0u32;
        let mut bits = 0usize;
        for word in &self.0 {
            let index = wordlist
                .iter()
                .position(|entry| *entry == word.as_str())
                .ok_or_else(|| {
                    SeedError::UnknownMnemonicWord(word.clone())
                })?;
            acc = (acc << BITS_PER_WORD) | index as u32;
            bits += BITS_PER_WORD;
            while bits >= 8 {
                bits -= 8;
                cipher_seed[pos] = (acc >> bits) as u8;
                acc &= (1 << bits) - 1;
                pos += 1;
            }
        }
        debug_assert_eq!(pos, ENCIPHERED_CIPHER_SEED_SIZE);
        debug_assert_eq!(bits, 0);
        Ok(cipher_seed)
    }

    /// Decodes and deciphers the mnemonic into the seed plaintext
    pub fn to_cipher_seed(
        &self,
        passphrase: Option<&[u8]>,
        wordlist: bip39::Language,
    ) -> Result<CipherSeed, SeedError> {
        CipherSeed::decipher(self.decode(wordlist)?, passphrase)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mnemonic_roundtrip() {
        let mut blob = [0u8; ENCIPHERED_CIPHER_SEED_SIZE];
        for (index, byte) in blob.iter_mut().enumerate() {
            *byte = index as u8 * 7;
        }
        let mnemonic = Mnemonic::encode(blob, bip39::Language::English);
        assert_eq!(mnemonic.words().len(), NUM_MNEMONIC_WORDS);
        assert_eq!(
            mnemonic.decode(bip39::Language::English).unwrap(),
            blob
        );
    }

    #[test]
    fn mnemonic_roundtrip_extremes() {
        for blob in
            [[0u8; ENCIPHERED_CIPHER_SEED_SIZE], [0xFF; ENCIPHERED_CIPHER_SEED_SIZE]]
        {
            let mnemonic = Mnemonic::encode(blob, bip39::Language::English);
            assert_eq!(
                mnemonic.decode(bip39::Language::English).unwrap(),
                blob
            );
        }
    }

    #[test]
    fn all_zero_blob_is_all_first_word() {
        let mnemonic = Mnemonic::encode(
            [0u8; ENCIPHERED_CIPHER_SEED_SIZE],
            bip39::Language::English,
        );
        let first = bip39::Language::English.word_list()[0];
        assert!(mnemonic.words().iter().all(|word| word == first));
    }

    #[test]
    fn word_count_enforced() {
        assert_eq!(
            "not enough words".parse::<Mnemonic>(),
            Err(SeedError::InvalidWordCount {
                expected: NUM_MNEMONIC_WORDS,
                found: 3
            })
        );
    }

    #[test]
    fn unknown_word_reported() {
        let words = vec![s!("definitelynotaword"); NUM_MNEMONIC_WORDS];
        let mnemonic = Mnemonic::with_words(words).unwrap();
        assert_eq!(
            mnemonic.decode(bip39::Language::English),
            Err(SeedError::UnknownMnemonicWord(s!("definitelynotaword")))
        );
    }

    #[test]
    fn display_and_parse() {
        let mut blob = [0u8; ENCIPHERED_CIPHER_SEED_SIZE];
        blob[0] = 0x5A;
        let mnemonic = Mnemonic::encode(blob, bip39::Language::English);
        let parsed = mnemonic.to_string().parse::<Mnemonic>().unwrap();
        assert_eq!(parsed, mnemonic);
    }
}
