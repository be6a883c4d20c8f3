// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cryptographic primitives ManifestHub needs at its edges: AES-CBC
//! encryption of secrets at rest, RSA-OAEP unsealing of the account
//! ingestion payload, and the CSGO-style per-account branch index.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use md5::{Digest, Md5};
use rand::RngCore;
use rsa::{Oaep, RsaPrivateKey};
use sha2::Sha256;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Errors raised by encryption, decryption, or key unsealing.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The supplied key was not exactly 32 bytes.
    #[error("AES key must be 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    /// Base64 decoding of a stored ciphertext or IV failed.
    #[error("invalid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    /// The IV was not exactly 16 bytes.
    #[error("AES IV must be 16 bytes, got {0}")]
    InvalidIvLength(usize),

    /// CBC padding was invalid, or the key/IV pair did not match the
    /// ciphertext.
    #[error("AES-CBC decryption failed")]
    DecryptFailed,

    /// Decrypted bytes were not valid UTF-8.
    #[error("decrypted secret was not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// The RSA private key PEM could not be parsed.
    #[error("invalid RSA private key: {0}")]
    InvalidPrivateKey(String),

    /// RSA-OAEP decryption of the ingestion payload failed.
    #[error("RSA unseal failed: {0}")]
    RsaUnsealFailed(String),
}

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

/// Encrypts `plaintext` with AES-256-CBC under `key`, generating a fresh
/// random IV. Returns `(ciphertext_base64, iv_base64)`.
pub fn encrypt_secret(plaintext: &str, key: &[u8; 32]) -> (String, String) {
    let mut iv = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut iv);
    let ciphertext = Aes256CbcEnc::new(key.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
    (BASE64.encode(ciphertext), BASE64.encode(iv))
}

/// Decrypts a ciphertext produced by [`encrypt_secret`].
pub fn decrypt_secret(
    ciphertext_b64: &str,
    iv_b64: &str,
    key: &[u8; 32],
) -> Result<String, CryptoError> {
    let ciphertext = BASE64.decode(ciphertext_b64)?;
    let iv_bytes = BASE64.decode(iv_b64)?;
    let iv: [u8; 16] = iv_bytes
        .clone()
        .try_into()
        .map_err(|_| CryptoError::InvalidIvLength(iv_bytes.len()))?;
    let plaintext = Aes256CbcDec::new(key.into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| CryptoError::DecryptFailed)?;
    Ok(String::from_utf8(plaintext)?)
}

/// Parses a 32-byte AES key out of a base64-encoded string (the `-k/--key`
/// CLI flag).
pub fn parse_aes_key(key_b64: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = BASE64.decode(key_b64)?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength(len))
}

/// Unseals the account ingestion payload: RSA-OAEP (SHA-256) decrypts
/// `ciphertext_b64` under `private_key_pem`, returning the plaintext bytes
/// (expected to be the ingestion JSON document).
pub fn unseal_rsa(ciphertext_b64: &str, private_key_pem: &str) -> Result<Vec<u8>, CryptoError> {
    let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(private_key_pem))
        .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
    let ciphertext = BASE64.decode(ciphertext_b64)?;
    private_key
        .decrypt(Oaep::new::<Sha256>(), &ciphertext)
        .map_err(|e| CryptoError::RsaUnsealFailed(e.to_string()))
}

use rsa::pkcs1::DecodeRsaPrivateKey as _;
use rsa::pkcs8::DecodePrivateKey as _;

const FRIEND_CODE_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Derives the opaque per-account branch index from a 64-bit Steam id.
///
/// Deterministic and pure: the same Steam id always yields the same code.
/// Renders as `XXXXX-XXXX` (5 symbols, a dash, 4 symbols), matching the
/// shape of a CSGO friend code without claiming bit-for-bit compatibility
/// with Valve's own algorithm.
pub fn branch_index(steam_id64: u64) -> String {
    let account_id = (steam_id64 & 0xFFFF_FFFF) as u32;

    let mut hasher = Md5::new();
    hasher.update(b"CSGO");
    hasher.update(account_id.to_le_bytes());
    let digest = hasher.finalize();
    let hash_low_byte = digest[0];

    // Conditionally rotate each of the low 8 nibbles of the Steam id one bit
    // left, gated by the corresponding bit of the hash's low byte.
    let mut value: u64 = steam_id64 & !0xFFFF_FFFF;
    for nibble_idx in 0u32..8 {
        let shift = nibble_idx * 4;
        let mut nibble = ((steam_id64 >> shift) & 0xF) as u8;
        if (hash_low_byte >> nibble_idx) & 1 == 1 {
            nibble = ((nibble << 1) | (nibble >> 3)) & 0xF;
        }
        value |= (nibble as u64) << shift;
    }

    // Base-32 encode little-endian into 13 symbols, drop the 4 least
    // significant, keep the remaining 9 as dash-joined groups of 5 and 4.
    let mut symbols = [0u8; 13];
    let mut v = value;
    for s in symbols.iter_mut() {
        *s = (v & 0x1F) as u8;
        v >>= 5;
    }
    let kept: String = symbols[4..]
        .iter()
        .map(|&i| FRIEND_CODE_ALPHABET[i as usize] as char)
        .collect();
    format!("{}-{}", &kept[0..5], &kept[5..9])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrips() {
        let key = [3u8; 32];
        let (ct, iv) = encrypt_secret("hunter2", &key);
        let pt = decrypt_secret(&ct, &iv, &key).unwrap();
        assert_eq!(pt, "hunter2");
    }

    #[test]
    fn encrypt_decrypt_roundtrips_empty_string() {
        let key = [9u8; 32];
        let (ct, iv) = encrypt_secret("", &key);
        let pt = decrypt_secret(&ct, &iv, &key).unwrap();
        assert_eq!(pt, "");
    }

    #[test]
    fn decrypt_with_wrong_key_fails() {
        let key = [1u8; 32];
        let other = [2u8; 32];
        let (ct, iv) = encrypt_secret("secret value", &key);
        let err = decrypt_secret(&ct, &iv, &other).unwrap_err();
        assert!(matches!(err, CryptoError::DecryptFailed));
    }

    #[test]
    fn each_encryption_uses_a_fresh_iv() {
        let key = [5u8; 32];
        let (_, iv1) = encrypt_secret("same plaintext", &key);
        let (_, iv2) = encrypt_secret("same plaintext", &key);
        assert_ne!(iv1, iv2);
    }

    #[test]
    fn parse_aes_key_rejects_wrong_length() {
        let short = BASE64.encode([0u8; 16]);
        let err = parse_aes_key(&short).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKeyLength(16)));
    }

    #[test]
    fn parse_aes_key_accepts_32_bytes() {
        let key_b64 = BASE64.encode([7u8; 32]);
        let key = parse_aes_key(&key_b64).unwrap();
        assert_eq!(key, [7u8; 32]);
    }

    #[test]
    fn branch_index_is_deterministic() {
        let a = branch_index(76561198000000000);
        let b = branch_index(76561198000000000);
        assert_eq!(a, b);
    }

    #[test]
    fn branch_index_differs_across_accounts() {
        let a = branch_index(76561198000000000);
        let b = branch_index(76561198000000001);
        assert_ne!(a, b);
    }

    #[test]
    fn branch_index_matches_dash_layout() {
        let code = branch_index(76561198012345678);
        assert_eq!(code.len(), 10);
        assert_eq!(code.as_bytes()[5], b'-');
        for c in code.chars().filter(|&c| c != '-') {
            assert!(FRIEND_CODE_ALPHABET.contains(&(c as u8)));
        }
    }
}
