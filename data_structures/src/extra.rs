//! Tagged fields inside the transaction `extra` blob.
//!
//! The blob is a sequence of tag bytes: `0x00` pads to the end with zeros,
//! `0x01` is followed by a 32-byte transaction public key, `0x02` by a
//! one-byte length and a free-form nonce. A nonce whose first byte is `0x00`
//! carries a 32-byte payment id.

use crate::{
    chain::{Hash, PublicKey},
    error::Error,
};

/// Padding tag
pub const TX_EXTRA_TAG_PADDING: u8 = 0x00;
/// Transaction public key tag
pub const TX_EXTRA_TAG_PUBKEY: u8 = 0x01;
/// Nonce tag
pub const TX_EXTRA_TAG_NONCE: u8 = 0x02;
/// Payment id marker inside a nonce
pub const TX_EXTRA_NONCE_PAYMENT_ID: u8 = 0x00;

/// A parsed extra field
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExtraField {
    /// Zero padding of the given size, including the tag byte
    Padding(usize),
    /// Transaction public key
    TransactionPublicKey(PublicKey),
    /// Free-form nonce
    Nonce(Vec<u8>),
}

/// Parse the extra blob into its fields
pub fn parse(extra: &[u8]) -> Result<Vec<ExtraField>, Error> {
    let mut fields = Vec::new();
    let mut pos = 0;

    while pos < extra.len() {
        match extra[pos] {
            TX_EXTRA_TAG_PADDING => {
                if extra[pos..].iter().any(|byte| *byte != 0) {
                    return Err(Error::MalformedExtra);
                }
                fields.push(ExtraField::Padding(extra.len() - pos));
                pos = extra.len();
            }
            TX_EXTRA_TAG_PUBKEY => {
                let key = extra
                    .get(pos + 1..pos + 33)
                    .ok_or(Error::MalformedExtra)?;
                let mut bytes = [0u8; 32];
                bytes.copy_from_slice(key);
                fields.push(ExtraField::TransactionPublicKey(PublicKey(bytes)));
                pos += 33;
            }
            TX_EXTRA_TAG_NONCE => {
                let size = *extra.get(pos + 1).ok_or(Error::MalformedExtra)? as usize;
                let nonce = extra
                    .get(pos + 2..pos + 2 + size)
                    .ok_or(Error::MalformedExtra)?;
                fields.push(ExtraField::Nonce(nonce.to_vec()));
                pos += 2 + size;
            }
            _ => return Err(Error::MalformedExtra),
        }
    }

    Ok(fields)
}

/// Serialize fields back into an extra blob
pub fn serialize(fields: &[ExtraField]) -> Vec<u8> {
    let mut extra = Vec::new();

    for field in fields {
        match field {
            ExtraField::Padding(size) => extra.extend(std::iter::repeat(0).take(*size)),
            ExtraField::TransactionPublicKey(key) => {
                extra.push(TX_EXTRA_TAG_PUBKEY);
                extra.extend_from_slice(&key.0);
            }
            ExtraField::Nonce(nonce) => {
                extra.push(TX_EXTRA_TAG_NONCE);
                extra.push(nonce.len() as u8);
                extra.extend_from_slice(nonce);
            }
        }
    }

    extra
}

/// Build a nonce field carrying a payment id
pub fn payment_id_nonce(payment_id: &Hash) -> ExtraField {
    let mut nonce = Vec::with_capacity(33);
    nonce.push(TX_EXTRA_NONCE_PAYMENT_ID);
    nonce.extend_from_slice(&payment_id.0);

    ExtraField::Nonce(nonce)
}

/// Extract the transaction public key, ignoring malformed blobs
pub fn transaction_public_key(extra: &[u8]) -> Option<PublicKey> {
    parse(extra).ok()?.into_iter().find_map(|field| match field {
        ExtraField::TransactionPublicKey(key) => Some(key),
        _ => None,
    })
}

/// Extract the payment id, ignoring malformed blobs
pub fn payment_id(extra: &[u8]) -> Option<Hash> {
    parse(extra).ok()?.into_iter().find_map(|field| match field {
        ExtraField::Nonce(nonce)
            if nonce.len() == 33 && nonce[0] == TX_EXTRA_NONCE_PAYMENT_ID =>
        {
            let mut bytes = [0u8; 32];
            bytes.copy_from_slice(&nonce[1..]);
            Some(Hash(bytes))
        }
        _ => None,
    })
}
