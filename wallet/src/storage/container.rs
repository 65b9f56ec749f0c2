//! The encrypted key container file.
//!
//! Layout, byte for byte:
//!
//! ```text
//! u8   version
//! u64  next_iv_counter (little endian)
//! EncryptedWalletRecord  view keys       (IV = next_iv_counter - 1)
//! EncryptedWalletRecord* spend records   (IVs drawn from the counter)
//! ```
//!
//! Every record is `{ iv: [u8; 8], ciphertext: [u8; 72] }` where the
//! plaintext is `public_key ∥ secret_key ∥ creation_timestamp`. The counter
//! stored in the prefix is the IV the *next* appended record will use, so
//! IVs are never reused under one key.

use std::io::{Read, Write};

use umbra_crypto::{
    cipher::{self, ChachaIv, ChachaKey},
    key::{check_key, secret_key_to_public_key, PublicKey, SecretKey},
};

use super::{Error, Result};
use crate::constants;

const RECORD_PLAINTEXT_SIZE: usize = 32 + 32 + 8;

/// Decrypted form of one stored record
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletRecord {
    /// Public key of the record
    pub public_key: PublicKey,
    /// Matching secret key, null for tracking records
    pub secret_key: SecretKey,
    /// Unix timestamp the key was created at
    pub creation_timestamp: u64,
}

/// One ChaCha8 envelope of the container file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedWalletRecord {
    /// Record IV
    pub iv: [u8; 8],
    /// Ciphertext of the packed record
    pub data: [u8; RECORD_PLAINTEXT_SIZE],
}

fn pack_record(record: &WalletRecord) -> [u8; RECORD_PLAINTEXT_SIZE] {
    let mut plain = [0u8; RECORD_PLAINTEXT_SIZE];
    plain[..32].copy_from_slice(&record.public_key.0);
    plain[32..64].copy_from_slice(&record.secret_key.0);
    plain[64..].copy_from_slice(&record.creation_timestamp.to_le_bytes());

    plain
}

fn unpack_record(plain: &[u8; RECORD_PLAINTEXT_SIZE]) -> WalletRecord {
    let mut public_key = [0u8; 32];
    let mut secret_key = [0u8; 32];
    let mut timestamp = [0u8; 8];
    public_key.copy_from_slice(&plain[..32]);
    secret_key.copy_from_slice(&plain[32..64]);
    timestamp.copy_from_slice(&plain[64..]);

    WalletRecord {
        public_key: PublicKey(public_key),
        secret_key: SecretKey(secret_key),
        creation_timestamp: u64::from_le_bytes(timestamp),
    }
}

fn encrypt_record(key: &ChachaKey, iv_counter: u64, record: &WalletRecord) -> EncryptedWalletRecord {
    let iv = ChachaIv::from(iv_counter);
    let mut data = pack_record(record);
    cipher::chacha8(key, &iv, &mut data);

    EncryptedWalletRecord { iv: iv.0, data }
}

fn decrypt_record(key: &ChachaKey, record: &EncryptedWalletRecord) -> WalletRecord {
    let mut plain = record.data;
    cipher::chacha8(key, &ChachaIv(record.iv), &mut plain);

    unpack_record(&plain)
}

/// The key container: the encrypted view keypair plus one encrypted record
/// per spend keypair.
pub struct ContainerStorage {
    version: u8,
    next_iv: u64,
    encrypted_view_keys: EncryptedWalletRecord,
    records: Vec<EncryptedWalletRecord>,
}

impl ContainerStorage {
    /// Fresh container holding only the view keys. The IV sequence starts
    /// at a random counter value.
    pub fn create(key: &ChachaKey, view_keys: &WalletRecord) -> Self {
        let counter = cipher::generate_iv_counter();

        ContainerStorage {
            version: constants::CONTAINER_STORAGE_VERSION,
            next_iv: counter.wrapping_add(1),
            encrypted_view_keys: encrypt_record(key, counter, view_keys),
            records: Vec::new(),
        }
    }

    /// Append a spend-key record, consuming one IV from the sequence.
    pub fn push(&mut self, key: &ChachaKey, record: &WalletRecord) {
        let encrypted = encrypt_record(key, self.next_iv, record);
        self.next_iv = self.next_iv.wrapping_add(1);
        self.records.push(encrypted);
    }

    /// Number of spend-key records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the container holds no spend-key records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Decrypt and verify the view keys. A key that does not derive to its
    /// stored public half means the password is wrong.
    pub fn decrypt_view_keys(&self, key: &ChachaKey) -> Result<WalletRecord> {
        let record = decrypt_record(key, &self.encrypted_view_keys);

        match secret_key_to_public_key(&record.secret_key) {
            Ok(derived) if derived == record.public_key => Ok(record),
            _ => Err(Error::WrongPassword),
        }
    }

    /// Decrypt and verify every spend-key record. Tracking records (null
    /// secret) only need a valid public key.
    pub fn decrypt_records(&self, key: &ChachaKey) -> Result<Vec<WalletRecord>> {
        let mut records = Vec::with_capacity(self.records.len());

        for encrypted in &self.records {
            let record = decrypt_record(key, encrypted);

            if record.secret_key.is_null() {
                if !check_key(&record.public_key) {
                    return Err(Error::KeyMismatch);
                }
            } else {
                match secret_key_to_public_key(&record.secret_key) {
                    Ok(derived) if derived == record.public_key => {}
                    _ => return Err(Error::KeyMismatch),
                }
            }

            records.push(record);
        }

        Ok(records)
    }

    /// Write the container in its bit-exact layout
    pub fn save<W: Write>(&self, destination: &mut W) -> Result<()> {
        destination.write_all(&[self.version])?;
        destination.write_all(&self.next_iv.to_le_bytes())?;
        destination.write_all(&self.encrypted_view_keys.iv)?;
        destination.write_all(&self.encrypted_view_keys.data)?;

        for record in &self.records {
            destination.write_all(&record.iv)?;
            destination.write_all(&record.data)?;
        }

        Ok(())
    }

    /// Read a container previously written by [`Self::save`]. The stream
    /// must end exactly after the last record.
    pub fn load<R: Read>(source: &mut R) -> Result<Self> {
        let mut version = [0u8; 1];
        source.read_exact(&mut version)?;
        if version[0] != constants::CONTAINER_STORAGE_VERSION {
            return Err(Error::UnsupportedVersion(u32::from(version[0])));
        }

        let mut next_iv = [0u8; 8];
        source.read_exact(&mut next_iv)?;

        let encrypted_view_keys = Self::read_record(source)?
            .ok_or_else(|| Error::Corrupt("missing view key record".into()))?;

        let mut records = Vec::new();
        while let Some(record) = Self::read_record(source)? {
            records.push(record);
        }

        Ok(ContainerStorage {
            version: version[0],
            next_iv: u64::from_le_bytes(next_iv),
            encrypted_view_keys,
            records,
        })
    }

    fn read_record<R: Read>(source: &mut R) -> Result<Option<EncryptedWalletRecord>> {
        let mut iv = [0u8; 8];
        let mut filled = 0;
        while filled < iv.len() {
            let read = source.read(&mut iv[filled..])?;
            if read == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(Error::Corrupt("truncated record iv".into()));
            }
            filled += read;
        }

        let mut data = [0u8; RECORD_PLAINTEXT_SIZE];
        source
            .read_exact(&mut data)
            .map_err(|_| Error::Corrupt("truncated record".into()))?;

        Ok(Some(EncryptedWalletRecord { iv, data }))
    }
}
