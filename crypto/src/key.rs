//! Ed25519 key types and the one-time ("stealth") output key math.
//!
//! The derivation scheme follows the CryptoNote construction: a shared
//! secret is produced from a transaction key and a view key, and per-output
//! one-time keys are derived from it by output index. `underive_public_key`
//! inverts the derivation so a scanner can recover the spend key a given
//! output was addressed to.

use curve25519_dalek::{
    edwards::{CompressedEdwardsY, EdwardsPoint},
    scalar::Scalar,
};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::hash::calculate_keccak256;

/// Error that can be raised by key operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Bytes do not decode to a curve point
    #[error("invalid point encoding")]
    InvalidPoint,
    /// A secret key is the null sentinel where a real key is required
    #[error("null secret key")]
    NullSecretKey,
}

/// Result type for key operations
pub type Result<T> = std::result::Result<T, Error>;

/// Compressed Ed25519 point identifying a wallet key or one-time output key
#[derive(
    Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PublicKey(pub [u8; 32]);

/// Ed25519 secret scalar. Zeroized on drop, never printed.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
pub struct SecretKey(pub [u8; 32]);

/// Deterministic fingerprint of a spent key-output
#[derive(
    Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct KeyImage(pub [u8; 32]);

/// Shared secret between a transaction key and a view key
#[derive(Debug, Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyDerivation(pub [u8; 32]);

impl PublicKey {
    /// The all-zero sentinel used where no key is present
    pub fn is_null(&self) -> bool {
        self.0 == [0; 32]
    }
}

impl SecretKey {
    /// The all-zero sentinel used by tracking wallets without a spend secret
    pub fn is_null(&self) -> bool {
        self.0 == [0; 32]
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(_)")
    }
}

impl std::fmt::Debug for KeyImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyImage({})", hex::encode(self.0))
    }
}

impl std::fmt::Display for KeyImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

fn decompress(key: &PublicKey) -> Result<EdwardsPoint> {
    CompressedEdwardsY(key.0)
        .decompress()
        .ok_or(Error::InvalidPoint)
}

fn scalar(key: &SecretKey) -> Scalar {
    Scalar::from_bytes_mod_order(key.0)
}

fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Reduce the Keccak-256 hash of `data` into a scalar
pub fn hash_to_scalar(data: &[u8]) -> Scalar {
    Scalar::from_bytes_mod_order(calculate_keccak256(data).0)
}

fn hash_to_point(key: &PublicKey) -> EdwardsPoint {
    EdwardsPoint::mul_base(&hash_to_scalar(&key.0))
}

/// Generate a fresh random keypair
pub fn generate_keys() -> (PublicKey, SecretKey) {
    let mut wide = [0u8; 64];
    OsRng.fill_bytes(&mut wide);
    let secret = Scalar::from_bytes_mod_order_wide(&wide);
    let public = EdwardsPoint::mul_base(&secret).compress().to_bytes();

    (PublicKey(public), SecretKey(secret.to_bytes()))
}

/// Compute the public key of a secret key
pub fn secret_key_to_public_key(secret_key: &SecretKey) -> Result<PublicKey> {
    if secret_key.is_null() {
        return Err(Error::NullSecretKey);
    }

    let point = EdwardsPoint::mul_base(&scalar(secret_key));

    Ok(PublicKey(point.compress().to_bytes()))
}

/// Check that a public key decodes to a valid curve point
pub fn check_key(key: &PublicKey) -> bool {
    decompress(key).is_ok()
}

/// Compute the shared secret `8 * secret * public`
pub fn generate_key_derivation(
    public_key: &PublicKey,
    secret_key: &SecretKey,
) -> Result<KeyDerivation> {
    let point = decompress(public_key)?;
    let shared = (scalar(secret_key) * point).mul_by_cofactor();

    Ok(KeyDerivation(shared.compress().to_bytes()))
}

fn derivation_to_scalar(derivation: &KeyDerivation, output_index: u32) -> Scalar {
    let mut buf = Vec::with_capacity(32 + 10);
    buf.extend_from_slice(&derivation.0);
    write_varint(&mut buf, u64::from(output_index));

    hash_to_scalar(&buf)
}

/// Derive the one-time output key addressed to `base` at `output_index`
pub fn derive_public_key(
    derivation: &KeyDerivation,
    output_index: u32,
    base: &PublicKey,
) -> Result<PublicKey> {
    let point = decompress(base)?;
    let derived = point + EdwardsPoint::mul_base(&derivation_to_scalar(derivation, output_index));

    Ok(PublicKey(derived.compress().to_bytes()))
}

/// Invert `derive_public_key`: recover the spend key a one-time output key
/// was derived from
pub fn underive_public_key(
    derivation: &KeyDerivation,
    output_index: u32,
    derived_key: &PublicKey,
) -> Result<PublicKey> {
    let point = decompress(derived_key)?;
    let base = point - EdwardsPoint::mul_base(&derivation_to_scalar(derivation, output_index));

    Ok(PublicKey(base.compress().to_bytes()))
}

/// Derive the one-time secret key matching `derive_public_key`
pub fn derive_secret_key(
    derivation: &KeyDerivation,
    output_index: u32,
    base: &SecretKey,
) -> SecretKey {
    let derived = scalar(base) + derivation_to_scalar(derivation, output_index);

    SecretKey(derived.to_bytes())
}

/// Compute the key image of a one-time keypair
pub fn generate_key_image(public_key: &PublicKey, secret_key: &SecretKey) -> KeyImage {
    let image = scalar(secret_key) * hash_to_point(public_key);

    KeyImage(image.compress().to_bytes())
}
