//! Deterministic, stateless site password generator
//!
//! A password is a pure function of the memory secret, the account user salt,
//! the codename, the charset mode and the length. Nothing is stored and no
//! network is touched, so every device regenerates the same password.

use crate::crypto::kdf::{DerivedKey, KdfParams, KeyPurpose};
use crate::crypto::{CryptoError, Result};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Default generated password length
pub const DEFAULT_LENGTH: usize = 16;

/// Longest password the generator will produce
pub const MAX_LENGTH: usize = 128;

/// Character sets for password generation
pub struct CharacterSets;

impl CharacterSets {
    /// All letters (lower + upper case)
    pub const LETTERS: &'static [u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
    /// Digits (0-9)
    pub const DIGITS: &'static [u8] = b"0123456789";
    /// Symbols/special characters
    pub const SYMBOLS: &'static [u8] = b"!@#$%^&*()-_=+[]{}|;:,.<>?";
    /// Alphanumeric (letters + digits)
    pub const ALPHANUMERIC: &'static [u8] =
        b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    /// Alphanumeric followed by symbols
    pub const ALL: &'static [u8] =
        b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%^&*()-_=+[]{}|;:,.<>?";
}

/// Which alphabet a generated password is drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CharsetMode {
    #[default]
    Alphanumeric,
    WithSymbols,
}

impl CharsetMode {
    /// The alphabet raw bytes are mapped onto.
    pub fn charset(self) -> &'static [u8] {
        match self {
            Self::Alphanumeric => CharacterSets::ALPHANUMERIC,
            Self::WithSymbols => CharacterSets::ALL,
        }
    }

    /// Shortest length that leaves room for every guaranteed character class.
    pub fn min_length(self) -> usize {
        match self {
            Self::Alphanumeric => 2,
            Self::WithSymbols => 3,
        }
    }

    fn validate_length(self, length: usize) -> Result<()> {
        if length < self.min_length() {
            return Err(CryptoError::InvalidParameter(format!(
                "Password length must be at least {} characters",
                self.min_length()
            )));
        }
        if length > MAX_LENGTH {
            return Err(CryptoError::InvalidParameter(format!(
                "Password length must be at most {} characters",
                MAX_LENGTH
            )));
        }
        Ok(())
    }
}

/// Generate the password for `codename`.
///
/// Runs the full PBKDF2 derivation; callers that generate many passwords in
/// one session should derive once and use [`generate_from_master_key`].
pub fn generate_password(
    secret: &[u8],
    user_salt: &str,
    codename: &str,
    mode: CharsetMode,
    length: usize,
) -> Result<String> {
    // Reject before paying for 600k rounds
    mode.validate_length(length)?;

    let master = KdfParams::default().derive(secret, user_salt, KeyPurpose::PasswordGeneration)?;
    generate_from_master_key(&master, codename, mode, length)
}

/// Generate a password from already-derived master key bits.
pub fn generate_from_master_key(
    master: &DerivedKey,
    codename: &str,
    mode: CharsetMode,
    length: usize,
) -> Result<String> {
    mode.validate_length(length)?;

    let raw = hmac_sha256(master.as_bytes(), codename.as_bytes())?;
    let mix = hmac_sha256(master.as_bytes(), format!("{}_mix", codename).as_bytes())?;

    Ok(encode_password(&raw, &mix, mode, length))
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> Result<[u8; 32]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| CryptoError::KdfFailed(format!("HMAC key rejected: {}", e)))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().into())
}

/// Map the two keystreams onto the final password.
///
/// `length` must already be validated for `mode`.
fn encode_password(raw: &[u8; 32], mix: &[u8; 32], mode: CharsetMode, length: usize) -> String {
    let charset = mode.charset();
    let mut password: Vec<u8> = (0..length)
        .map(|i| charset[raw[i % raw.len()] as usize % charset.len()])
        .collect();

    // Position 0 is always a letter
    password[0] = CharacterSets::LETTERS[mix[0] as usize % CharacterSets::LETTERS.len()];

    // One digit somewhere in 1..length
    let digit_pos = 1 + mix[1] as usize % (length - 1);
    password[digit_pos] = CharacterSets::DIGITS[mix[2] as usize % CharacterSets::DIGITS.len()];

    if mode == CharsetMode::WithSymbols {
        let symbol_pos = if digit_pos == length - 1 {
            length - 2
        } else {
            length - 1
        };
        password[symbol_pos] =
            CharacterSets::SYMBOLS[mix[3] as usize % CharacterSets::SYMBOLS.len()];
    }

    password.into_iter().map(char::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn master(secret: &[u8], salt: &str) -> DerivedKey {
        KdfParams::default()
            .derive(secret, salt, KeyPurpose::PasswordGeneration)
            .unwrap()
    }

    fn assert_shape(password: &str, mode: CharsetMode, length: usize) {
        assert_eq!(password.len(), length);
        assert!(password.as_bytes()[0].is_ascii_alphabetic(), "{}", password);
        assert!(password.bytes().any(|c| c.is_ascii_digit()), "{}", password);
        assert!(password.bytes().all(|c| mode.charset().contains(&c)), "{}", password);
        if mode == CharsetMode::WithSymbols {
            assert!(
                password.bytes().any(|c| CharacterSets::SYMBOLS.contains(&c)),
                "{}",
                password
            );
        }
    }

    #[test]
    fn test_same_inputs_same_password() {
        let a = generate_password(b"memory", "FlowerKey", "github", CharsetMode::WithSymbols, 16)
            .unwrap();
        let b = generate_password(b"memory", "FlowerKey", "github", CharsetMode::WithSymbols, 16)
            .unwrap();
        assert_eq!(a, b);
        assert_shape(&a, CharsetMode::WithSymbols, 16);
    }

    #[test]
    fn test_each_input_changes_output() {
        let base =
            generate_password(b"memory", "FlowerKey", "github", CharsetMode::Alphanumeric, 16)
                .unwrap();

        let other_secret =
            generate_password(b"memory2", "FlowerKey", "github", CharsetMode::Alphanumeric, 16)
                .unwrap();
        let other_salt =
            generate_password(b"memory", "OtherSalt", "github", CharsetMode::Alphanumeric, 16)
                .unwrap();
        let other_codename =
            generate_password(b"memory", "FlowerKey", "gitlab", CharsetMode::Alphanumeric, 16)
                .unwrap();
        let other_mode =
            generate_password(b"memory", "FlowerKey", "github", CharsetMode::WithSymbols, 16)
                .unwrap();
        let other_length =
            generate_password(b"memory", "FlowerKey", "github", CharsetMode::Alphanumeric, 20)
                .unwrap();

        for other in [other_secret, other_salt, other_codename, other_mode, other_length] {
            assert_ne!(base, other);
        }
    }

    #[test]
    fn test_shape_over_many_codenames() {
        let key = master(b"memory", "FlowerKey");

        for i in 0..200 {
            let codename = format!("site-{}", i);
            for (mode, length) in [
                (CharsetMode::Alphanumeric, 2),
                (CharsetMode::Alphanumeric, 16),
                (CharsetMode::WithSymbols, 3),
                (CharsetMode::WithSymbols, 24),
                (CharsetMode::WithSymbols, 64),
            ] {
                let password = generate_from_master_key(&key, &codename, mode, length).unwrap();
                assert_shape(&password, mode, length);
            }
        }
    }

    #[test]
    fn test_no_collisions_in_sample() {
        let key = master(b"memory", "FlowerKey");
        let mut seen = std::collections::HashSet::new();

        for i in 0..500 {
            let codename = format!("codename{}", i);
            let password =
                generate_from_master_key(&key, &codename, CharsetMode::Alphanumeric, 16).unwrap();
            assert!(seen.insert(password));
        }
    }

    #[test]
    fn test_lengths_beyond_hash_size_cycle() {
        let key = master(b"memory", "FlowerKey");
        let password =
            generate_from_master_key(&key, "long", CharsetMode::Alphanumeric, 100).unwrap();
        assert_shape(&password, CharsetMode::Alphanumeric, 100);
    }

    #[test]
    fn test_invalid_lengths_rejected() {
        let key = master(b"memory", "FlowerKey");

        for (mode, length) in [
            (CharsetMode::Alphanumeric, 0),
            (CharsetMode::Alphanumeric, 1),
            (CharsetMode::WithSymbols, 2),
            (CharsetMode::WithSymbols, MAX_LENGTH + 1),
        ] {
            assert!(matches!(
                generate_from_master_key(&key, "x", mode, length),
                Err(CryptoError::InvalidParameter(_))
            ));
        }

        assert!(matches!(
            generate_password(b"memory", "FlowerKey", "x", CharsetMode::Alphanumeric, 1),
            Err(CryptoError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_encode_places_symbol_away_from_digit() {
        let raw = [0u8; 32];
        let mut mix = [0u8; 32];
        // length 3: digit lands on index 2, so the symbol must move to index 1
        mix[1] = 1;
        let password = encode_password(&raw, &mix, CharsetMode::WithSymbols, 3);
        let bytes = password.as_bytes();

        assert!(bytes[0].is_ascii_alphabetic());
        assert!(CharacterSets::SYMBOLS.contains(&bytes[1]));
        assert!(bytes[2].is_ascii_digit());
    }

    #[test]
    fn test_charset_mode_serde() {
        let json = serde_json::to_string(&CharsetMode::WithSymbols).unwrap();
        assert_eq!(json, "\"with_symbols\"");
        let mode: CharsetMode = serde_json::from_str("\"alphanumeric\"").unwrap();
        assert_eq!(mode, CharsetMode::Alphanumeric);
    }
}
