//! Transaction structures as exchanged with the node.

use serde::{Deserialize, Serialize};

use crate::{
    chain::{Hash, PublicKey},
    error::Error,
    extra,
};
use umbra_crypto::key::KeyImage;

/// A single transaction input
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionInput {
    /// Coinbase input minting the block reward
    Coinbase {
        /// Height of the block the reward belongs to
        block_index: u32,
    },
    /// Input spending a key output through a ring signature
    Key {
        /// Amount being spent
        amount: u64,
        /// Relative global offsets of the ring members
        key_offsets: Vec<u32>,
        /// Key image of the spent output
        key_image: KeyImage,
    },
    /// Input spending a multisignature output
    Multisignature {
        /// Amount being spent
        amount: u64,
        /// Global index of the spent output
        output_index: u32,
        /// Number of signatures provided
        signature_count: u32,
    },
}

/// Destination of a transaction output
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionOutputTarget {
    /// One-time key output
    Key(PublicKey),
    /// Multisignature output
    Multisignature {
        /// Keys allowed to sign
        keys: Vec<PublicKey>,
        /// Signatures required to spend
        required_signature_count: u32,
    },
}

/// A single transaction output
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    /// Amount carried by the output
    pub amount: u64,
    /// Destination
    pub target: TransactionOutputTarget,
}

/// The signed part of a transaction
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionPrefix {
    /// Format version
    pub version: u8,
    /// Height or timestamp before which outputs cannot be spent
    pub unlock_time: u64,
    /// Inputs
    pub inputs: Vec<TransactionInput>,
    /// Outputs
    pub outputs: Vec<TransactionOutput>,
    /// Free-form tagged extra data
    pub extra: Vec<u8>,
}

/// A full transaction. Ring signatures are carried as opaque blobs, one per
/// input; the wallet core never verifies them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Signed prefix
    pub prefix: TransactionPrefix,
    /// Signature blobs, one per input
    pub signatures: Vec<Vec<u8>>,
}

impl Transaction {
    /// Decode a transaction from its binary encoding
    pub fn from_bytes(bytes: &[u8]) -> Result<Transaction, Error> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Encode the transaction into its binary encoding
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("serialization of chain types cannot fail")
    }

    /// The transaction public key carried in the extra field, if any
    pub fn transaction_public_key(&self) -> Option<PublicKey> {
        extra::transaction_public_key(&self.prefix.extra)
    }

    /// The payment id carried in the extra nonce, if any
    pub fn payment_id(&self) -> Option<Hash> {
        extra::payment_id(&self.prefix.extra)
    }

    /// Sum of all input amounts. Coinbase inputs carry no explicit amount.
    pub fn total_amount_in(&self) -> u64 {
        self.prefix
            .inputs
            .iter()
            .map(|input| match input {
                TransactionInput::Coinbase { .. } => 0,
                TransactionInput::Key { amount, .. } => *amount,
                TransactionInput::Multisignature { amount, .. } => *amount,
            })
            .fold(0u64, u64::saturating_add)
    }

    /// Sum of all output amounts
    pub fn total_amount_out(&self) -> u64 {
        self.prefix
            .outputs
            .iter()
            .map(|output| output.amount)
            .fold(0u64, u64::saturating_add)
    }
}
