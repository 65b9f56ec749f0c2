//! Core chain value types shared by the wallet components.

use serde::{Deserialize, Serialize};

pub use umbra_crypto::key::{KeyImage, PublicKey, SecretKey};

use crate::error::Error;
use umbra_crypto::hash::calculate_keccak256;

/// Opaque 32-byte content identifier of a block or transaction
#[derive(
    Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// Hash the given bytes with the chain content hash (Keccak-256)
    pub fn digest(bytes: &[u8]) -> Hash {
        Hash(calculate_keccak256(bytes).0)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl std::fmt::Debug for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash({})", hex::encode(self.0))
    }
}

/// Anything with a canonical content hash
pub trait Hashable {
    /// Compute the content hash of the canonical binary encoding
    fn hash(&self) -> Hash;
}

impl<T> Hashable for T
where
    T: Serialize,
{
    fn hash(&self) -> Hash {
        let bytes =
            bincode::serialize(self).expect("serialization of chain types cannot fail");

        Hash::digest(&bytes)
    }
}

/// Public half of an account: the pair of keys payments are addressed to
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct AccountPublicAddress {
    /// Spend public key
    pub spend_public_key: PublicKey,
    /// View public key
    pub view_public_key: PublicKey,
}

/// Full key material of an account.
///
/// Tracking wallets carry the null sentinel as `spend_secret_key`; such
/// accounts can detect incoming outputs but cannot compute key images.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountKeys {
    /// Public address
    pub address: AccountPublicAddress,
    /// Spend secret key, null for tracking wallets
    pub spend_secret_key: SecretKey,
    /// View secret key, shared by every account of one wallet
    pub view_secret_key: SecretKey,
}

/// Block header as received from the node
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Major consensus version
    pub major_version: u8,
    /// Minor consensus version
    pub minor_version: u8,
    /// Mining timestamp, seconds since the Unix epoch
    pub timestamp: u64,
    /// Hash of the previous block
    pub previous_block_hash: Hash,
    /// Mining nonce
    pub nonce: u32,
}

/// Full block body
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Header
    pub header: BlockHeader,
    /// Coinbase transaction
    pub miner_transaction: crate::transaction::Transaction,
    /// Hashes of the other transactions included in the block
    pub transaction_hashes: Vec<Hash>,
}

impl Block {
    /// Decode a block from its binary encoding
    pub fn from_bytes(bytes: &[u8]) -> Result<Block, Error> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Encode the block into its binary encoding
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("serialization of chain types cannot fail")
    }
}
