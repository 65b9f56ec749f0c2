//! Cipher

use chacha20::{
    cipher::{KeyIvInit, StreamCipher},
    ChaCha8,
};
use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Domain separator mixed into the password-to-key derivation.
const KEY_DERIVATION_SALT: &[u8] = b"umbra wallet container key";

/// Single-pass derivation, the cost is not configurable.
const KEY_DERIVATION_ROUNDS: u32 = 4096;

/// Error that can be raised when encrypting/decrypting
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The supplied key material has a wrong length
    #[error("invalid key length: {0}")]
    InvalidKeyLength(usize),
}

/// Symmetric key for the wallet stream cipher
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
pub struct ChachaKey(pub [u8; 32]);

impl std::fmt::Debug for ChachaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ChachaKey(_)")
    }
}

/// Per-record initialization vector
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChachaIv(pub [u8; 8]);

impl From<u64> for ChachaIv {
    fn from(counter: u64) -> Self {
        ChachaIv(counter.to_le_bytes())
    }
}

/// Derive the container encryption key from a user password.
pub fn generate_chacha_key(password: &[u8]) -> ChachaKey {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password, KEY_DERIVATION_SALT, KEY_DERIVATION_ROUNDS, &mut key);

    ChachaKey(key)
}

/// Apply the ChaCha8 keystream to `data` in place.
///
/// The cipher is its own inverse, so the same call both encrypts and
/// decrypts. The 8-byte record IV occupies the low bytes of the nonce.
pub fn chacha8(key: &ChachaKey, iv: &ChachaIv, data: &mut [u8]) {
    let mut nonce = [0u8; 12];
    nonce[..8].copy_from_slice(&iv.0);

    let mut cipher = ChaCha8::new(
        chacha20::Key::from_slice(&key.0),
        chacha20::Nonce::from_slice(&nonce),
    );
    cipher.apply_keystream(data);
}

/// Encrypt a buffer, returning the ciphertext.
pub fn encrypt(key: &ChachaKey, iv: &ChachaIv, plaintext: &[u8]) -> Vec<u8> {
    let mut data = plaintext.to_vec();
    chacha8(key, iv, &mut data);

    data
}

/// Decrypt a buffer, returning the plaintext.
pub fn decrypt(key: &ChachaKey, iv: &ChachaIv, ciphertext: &[u8]) -> Vec<u8> {
    let mut data = ciphertext.to_vec();
    chacha8(key, iv, &mut data);

    data
}

/// Generate a random initialization vector
pub fn generate_iv() -> ChachaIv {
    let mut iv = [0u8; 8];
    OsRng.fill_bytes(&mut iv);

    ChachaIv(iv)
}

/// Generate a random starting value for an IV counter sequence
pub fn generate_iv_counter() -> u64 {
    OsRng.next_u64()
}
