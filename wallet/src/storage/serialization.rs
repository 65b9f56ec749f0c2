//! The full wallet snapshot stream.
//!
//! Layout: a plain `u32` version and an 8-byte file IV, followed by one
//! ChaCha8 envelope per field, each a length-prefixed blob encrypted under
//! the password-derived key with an IV that increments per field:
//! view public key, view secret key, the details and cache flags, the
//! wallet records, then the cache section (balances, transfers-synchronizer
//! blob, unlock jobs, uncommitted transactions) and the details section
//! (transaction and transfer history).
//!
//! Version 5 is current. Versions 1 through 4 load with migration: their
//! obsolete spent-output and change records are read and dropped, transfer
//! amounts reinterpret as unsigned, and the cache section is discarded so
//! callers rebuild it from the chain. Unknown future versions are rejected.

use std::io::{Read, Write};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use umbra_crypto::{
    cipher::{self, ChachaIv, ChachaKey},
    key::{check_key, secret_key_to_public_key, PublicKey, SecretKey},
};
use umbra_data_structures::chain::Hash;

use super::{Error, Result};
use crate::constants;

/// Outcome of a wallet transaction as shown to the user
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletTransactionState {
    /// Mined or expected to be mined
    Succeeded,
    /// Rejected by the network
    Failed,
    /// Cancelled before relay
    Cancelled,
    /// Created locally, not yet relayed
    Created,
    /// Timed out of the pool
    Deleted,
}

/// One spend keypair with its cached balances
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletRecordDto {
    /// Spend public key
    pub spend_public_key: PublicKey,
    /// Spend secret key, null for tracking wallets
    pub spend_secret_key: SecretKey,
    /// Cached pending balance, zero when the cache is not saved
    pub pending_balance: u64,
    /// Cached actual balance, zero when the cache is not saved
    pub actual_balance: u64,
    /// Unix timestamp the key was created at
    pub creation_timestamp: u64,
}

/// One user-facing transaction record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransactionDto {
    /// Lifecycle state
    pub state: WalletTransactionState,
    /// Block timestamp
    pub timestamp: u64,
    /// Block height
    pub block_height: u32,
    /// Transaction hash
    pub hash: Hash,
    /// Signed change of the wallet balance
    pub total_amount: i64,
    /// Fee paid
    pub fee: u64,
    /// Local creation time
    pub creation_time: u64,
    /// Unlock time of the outputs
    pub unlock_time: u64,
    /// User-visible extra payload
    pub extra: String,
}

/// One leg of a transaction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransferDto {
    /// Destination address
    pub address: String,
    /// Amount moved
    pub amount: u64,
    /// Leg kind (user/change/donation), kept as a raw tag
    pub transfer_type: u8,
}

/// A pending unlock check for a mined transaction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockTransactionJobDto {
    /// Height at which to re-evaluate
    pub block_height: u32,
    /// Transaction to re-evaluate
    pub transaction_hash: Hash,
    /// Wallet record the job belongs to
    pub wallet_index: u64,
}

// Records of the v1..v4 streams that no longer exist in v5. They are read
// during migration and dropped.
#[derive(Serialize, Deserialize)]
struct ObsoleteSpentOutputDto {
    amount: u64,
    transaction_hash: Hash,
    output_in_transaction: u32,
    wallet_index: u64,
    spending_transaction_hash: Hash,
}

#[derive(Serialize, Deserialize)]
struct ObsoleteChangeDto {
    transaction_hash: Hash,
    amount: u64,
}

#[derive(Serialize, Deserialize)]
struct LegacyTransferDto {
    address: String,
    amount: i64,
}

/// Transaction and transfer history, present when details are saved
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WalletDetails {
    /// Transactions in creation order
    pub transactions: Vec<WalletTransactionDto>,
    /// Transfers as `(transaction id, leg)`
    pub transfers: Vec<(u64, WalletTransferDto)>,
}

/// Cached runtime state, present when the cache is saved
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WalletCache {
    /// Unlocked balance
    pub actual_balance: u64,
    /// Locked plus unconfirmed balance
    pub pending_balance: u64,
    /// Blob produced by `TransfersSynchronizer::save`
    pub synchronizer_state: Vec<u8>,
    /// Pending unlock checks
    pub unlock_transaction_jobs: Vec<UnlockTransactionJobDto>,
    /// Locally created, not yet relayed transactions as `(id, blob)`
    pub uncommitted_transactions: Vec<(u64, Vec<u8>)>,
}

/// Everything a wallet file carries
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletSnapshot {
    /// View public key
    pub view_public_key: PublicKey,
    /// View secret key
    pub view_secret_key: SecretKey,
    /// Spend keypairs
    pub wallets: Vec<WalletRecordDto>,
    /// History, when saved
    pub details: Option<WalletDetails>,
    /// Cache, when saved
    pub cache: Option<WalletCache>,
}

struct CryptoContext {
    key: ChachaKey,
    iv: ChachaIv,
}

impl CryptoContext {
    fn inc_iv(&mut self) {
        let counter = u64::from_le_bytes(self.iv.0);
        self.iv = ChachaIv::from(counter.wrapping_add(1));
    }
}

fn write_encrypted<T: Serialize + ?Sized, W: Write>(
    value: &T,
    context: &mut CryptoContext,
    destination: &mut W,
) -> Result<()> {
    let plain = bincode::serialize(value)?;
    let ciphertext = cipher::encrypt(&context.key, &context.iv, &plain);
    bincode::serialize_into(destination, &ciphertext)?;
    context.inc_iv();

    Ok(())
}

fn read_encrypted<T: DeserializeOwned, R: Read>(
    context: &mut CryptoContext,
    source: &mut R,
) -> Result<T> {
    let ciphertext: Vec<u8> = bincode::deserialize_from(source)?;
    let plain = cipher::decrypt(&context.key, &context.iv, &ciphertext);
    context.inc_iv();

    Ok(bincode::deserialize(&plain)?)
}

/// Reader and writer of the snapshot stream.
pub struct WalletSerializer;

impl WalletSerializer {
    /// Write `snapshot` encrypted under `password`. `save_details` and
    /// `save_cache` select the optional sections; cached balances are
    /// zeroed out when the cache is not saved.
    pub fn save<W: Write>(
        snapshot: &WalletSnapshot,
        password: &[u8],
        destination: &mut W,
        save_details: bool,
        save_cache: bool,
    ) -> Result<()> {
        let key = cipher::generate_chacha_key(password);
        let mut context = CryptoContext {
            key,
            iv: cipher::generate_iv(),
        };

        bincode::serialize_into(&mut *destination, &constants::WALLET_SERIALIZATION_VERSION)?;
        destination.write_all(&context.iv.0)?;

        let details = save_details && snapshot.details.is_some();
        let cache = save_cache && snapshot.cache.is_some();

        write_encrypted(&snapshot.view_public_key, &mut context, destination)?;
        write_encrypted(&snapshot.view_secret_key, &mut context, destination)?;
        write_encrypted(&details, &mut context, destination)?;
        write_encrypted(&cache, &mut context, destination)?;

        write_encrypted(&(snapshot.wallets.len() as u64), &mut context, destination)?;
        for wallet in &snapshot.wallets {
            let record = if cache {
                wallet.clone()
            } else {
                WalletRecordDto {
                    pending_balance: 0,
                    actual_balance: 0,
                    ..wallet.clone()
                }
            };
            write_encrypted(&record, &mut context, destination)?;
        }

        if cache {
            let state = snapshot.cache.as_ref().map(Clone::clone).unwrap_or_default();
            write_encrypted(&state.actual_balance, &mut context, destination)?;
            write_encrypted(&state.pending_balance, &mut context, destination)?;
            write_encrypted(&state.synchronizer_state, &mut context, destination)?;

            write_encrypted(
                &(state.unlock_transaction_jobs.len() as u64),
                &mut context,
                destination,
            )?;
            for job in &state.unlock_transaction_jobs {
                write_encrypted(job, &mut context, destination)?;
            }

            write_encrypted(&state.uncommitted_transactions, &mut context, destination)?;
        }

        if details {
            let history = snapshot.details.as_ref().map(Clone::clone).unwrap_or_default();
            write_encrypted(&(history.transactions.len() as u64), &mut context, destination)?;
            for transaction in &history.transactions {
                write_encrypted(transaction, &mut context, destination)?;
            }

            write_encrypted(&(history.transfers.len() as u64), &mut context, destination)?;
            for transfer in &history.transfers {
                write_encrypted(transfer, &mut context, destination)?;
            }
        }

        Ok(())
    }

    /// Read a snapshot, migrating older versions in memory.
    pub fn load<R: Read>(password: &[u8], source: &mut R) -> Result<WalletSnapshot> {
        let version: u32 = bincode::deserialize_from(&mut *source)?;

        match version {
            constants::WALLET_SERIALIZATION_VERSION => Self::load_current(password, source),
            1..=4 => {
                log::info!("migrating wallet file from version {}", version);
                Self::load_legacy(password, source, version)
            }
            unknown => Err(Error::UnsupportedVersion(unknown)),
        }
    }

    fn read_context<R: Read>(password: &[u8], source: &mut R) -> Result<CryptoContext> {
        let mut iv = [0u8; 8];
        source.read_exact(&mut iv)?;

        Ok(CryptoContext {
            key: cipher::generate_chacha_key(password),
            iv: ChachaIv(iv),
        })
    }

    fn read_keys<R: Read>(
        context: &mut CryptoContext,
        source: &mut R,
    ) -> Result<(PublicKey, SecretKey)> {
        let view_public_key: PublicKey = read_encrypted(context, source)?;
        let view_secret_key: SecretKey = read_encrypted(context, source)?;

        match secret_key_to_public_key(&view_secret_key) {
            Ok(derived) if derived == view_public_key => {}
            _ => return Err(Error::WrongPassword),
        }

        Ok((view_public_key, view_secret_key))
    }

    fn verify_wallet_record(record: &WalletRecordDto) -> Result<()> {
        if record.spend_secret_key.is_null() {
            if !check_key(&record.spend_public_key) {
                return Err(Error::KeyMismatch);
            }
        } else {
            match secret_key_to_public_key(&record.spend_secret_key) {
                Ok(derived) if derived == record.spend_public_key => {}
                _ => return Err(Error::KeyMismatch),
            }
        }

        Ok(())
    }

    fn load_current<R: Read>(password: &[u8], source: &mut R) -> Result<WalletSnapshot> {
        let mut context = Self::read_context(password, source)?;
        let (view_public_key, view_secret_key) = Self::read_keys(&mut context, source)?;

        let details_saved: bool = read_encrypted(&mut context, source)?;
        let cache_saved: bool = read_encrypted(&mut context, source)?;

        let wallets_count: u64 = read_encrypted(&mut context, source)?;
        let mut wallets = Vec::new();
        for _ in 0..wallets_count {
            let record: WalletRecordDto = read_encrypted(&mut context, source)?;
            Self::verify_wallet_record(&record)?;
            wallets.push(record);
        }

        let cache = if cache_saved {
            let actual_balance: u64 = read_encrypted(&mut context, source)?;
            let pending_balance: u64 = read_encrypted(&mut context, source)?;
            let synchronizer_state: Vec<u8> = read_encrypted(&mut context, source)?;

            let jobs_count: u64 = read_encrypted(&mut context, source)?;
            let mut unlock_transaction_jobs = Vec::new();
            for _ in 0..jobs_count {
                unlock_transaction_jobs.push(read_encrypted(&mut context, source)?);
            }

            let uncommitted_transactions: Vec<(u64, Vec<u8>)> =
                read_encrypted(&mut context, source)?;

            Some(WalletCache {
                actual_balance,
                pending_balance,
                synchronizer_state,
                unlock_transaction_jobs,
                uncommitted_transactions,
            })
        } else {
            None
        };

        let details = if details_saved {
            let transactions_count: u64 = read_encrypted(&mut context, source)?;
            let mut transactions = Vec::new();
            for _ in 0..transactions_count {
                transactions.push(read_encrypted(&mut context, source)?);
            }

            let transfers_count: u64 = read_encrypted(&mut context, source)?;
            let mut transfers = Vec::new();
            for _ in 0..transfers_count {
                transfers.push(read_encrypted(&mut context, source)?);
            }

            Some(WalletDetails {
                transactions,
                transfers,
            })
        } else {
            None
        };

        Ok(WalletSnapshot {
            view_public_key,
            view_secret_key,
            wallets,
            details,
            cache,
        })
    }

    /// Versions 1..=4. The stream still carries obsolete spent-output and
    /// change records and signed transfer amounts; everything cache-like is
    /// discarded so the caller rebuilds it.
    fn load_legacy<R: Read>(
        password: &[u8],
        source: &mut R,
        version: u32,
    ) -> Result<WalletSnapshot> {
        let mut context = Self::read_context(password, source)?;
        let (view_public_key, view_secret_key) = Self::read_keys(&mut context, source)?;

        let details_saved: bool = read_encrypted(&mut context, source)?;
        let cache_saved: bool = read_encrypted(&mut context, source)?;

        let wallets_count: u64 = read_encrypted(&mut context, source)?;
        let mut wallets = Vec::new();
        for _ in 0..wallets_count {
            let mut record: WalletRecordDto = read_encrypted(&mut context, source)?;
            Self::verify_wallet_record(&record)?;
            // The old cache is untrustworthy after migration.
            record.actual_balance = 0;
            record.pending_balance = 0;
            wallets.push(record);
        }

        if cache_saved {
            let _actual_balance: u64 = read_encrypted(&mut context, source)?;
            let _pending_balance: u64 = read_encrypted(&mut context, source)?;
            let _synchronizer_state: Vec<u8> = read_encrypted(&mut context, source)?;

            let spent_count: u64 = read_encrypted(&mut context, source)?;
            for _ in 0..spent_count {
                let _: ObsoleteSpentOutputDto = read_encrypted(&mut context, source)?;
            }

            let jobs_count: u64 = read_encrypted(&mut context, source)?;
            for _ in 0..jobs_count {
                let _: UnlockTransactionJobDto = read_encrypted(&mut context, source)?;
            }

            let change_count: u64 = read_encrypted(&mut context, source)?;
            for _ in 0..change_count {
                let _: ObsoleteChangeDto = read_encrypted(&mut context, source)?;
            }

            let _uncommitted: Vec<(u64, Vec<u8>)> = read_encrypted(&mut context, source)?;
        }

        let details = if details_saved {
            let transactions_count: u64 = read_encrypted(&mut context, source)?;
            let mut transactions = Vec::new();
            for _ in 0..transactions_count {
                transactions.push(read_encrypted(&mut context, source)?);
            }

            let transfers_count: u64 = read_encrypted(&mut context, source)?;
            let mut transfers = Vec::new();
            for _ in 0..transfers_count {
                if version > 2 {
                    transfers.push(read_encrypted(&mut context, source)?);
                } else {
                    let legacy: (u64, LegacyTransferDto) = read_encrypted(&mut context, source)?;
                    transfers.push((
                        legacy.0,
                        WalletTransferDto {
                            address: legacy.1.address,
                            amount: legacy.1.amount as u64,
                            transfer_type: 0,
                        },
                    ));
                }
            }

            Some(WalletDetails {
                transactions,
                transfers,
            })
        } else {
            None
        };

        Ok(WalletSnapshot {
            view_public_key,
            view_secret_key,
            wallets,
            details,
            // Force a cache rebuild after migration.
            cache: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_crypto::key::generate_keys;

    fn snapshot() -> WalletSnapshot {
        let (view_public_key, view_secret_key) = generate_keys();
        let (spend_public_key, spend_secret_key) = generate_keys();

        WalletSnapshot {
            view_public_key,
            view_secret_key,
            wallets: vec![WalletRecordDto {
                spend_public_key,
                spend_secret_key,
                pending_balance: 25,
                actual_balance: 100,
                creation_timestamp: 1_600_000_000,
            }],
            details: Some(WalletDetails {
                transactions: vec![WalletTransactionDto {
                    state: WalletTransactionState::Succeeded,
                    timestamp: 1_600_000_100,
                    block_height: 12,
                    hash: Hash([8; 32]),
                    total_amount: -50,
                    fee: 1,
                    creation_time: 1_600_000_050,
                    unlock_time: 0,
                    extra: "note".into(),
                }],
                transfers: vec![(
                    0,
                    WalletTransferDto {
                        address: "recipient".into(),
                        amount: 49,
                        transfer_type: 0,
                    },
                )],
            }),
            cache: Some(WalletCache {
                actual_balance: 100,
                pending_balance: 25,
                synchronizer_state: vec![1, 2, 3, 4],
                unlock_transaction_jobs: vec![UnlockTransactionJobDto {
                    block_height: 22,
                    transaction_hash: Hash([8; 32]),
                    wallet_index: 0,
                }],
                uncommitted_transactions: vec![(7, vec![9, 9, 9])],
            }),
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let original = snapshot();
        let mut stream = Vec::new();
        WalletSerializer::save(&original, b"password", &mut stream, true, true).unwrap();

        let loaded = WalletSerializer::load(b"password", &mut stream.as_slice()).unwrap();
        assert_eq!(original, loaded);
    }

    #[test]
    fn test_wrong_password_is_rejected() {
        let mut stream = Vec::new();
        WalletSerializer::save(&snapshot(), b"password", &mut stream, true, true).unwrap();

        assert!(matches!(
            WalletSerializer::load(b"other", &mut stream.as_slice()),
            Err(Error::WrongPassword)
        ));
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let mut stream = Vec::new();
        bincode::serialize_into(&mut stream, &99u32).unwrap();
        stream.extend_from_slice(&[0u8; 8]);

        assert!(matches!(
            WalletSerializer::load(b"password", &mut stream.as_slice()),
            Err(Error::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn test_skipping_optional_sections() {
        let original = snapshot();
        let mut stream = Vec::new();
        WalletSerializer::save(&original, b"password", &mut stream, false, false).unwrap();

        let loaded = WalletSerializer::load(b"password", &mut stream.as_slice()).unwrap();
        assert!(loaded.details.is_none());
        assert!(loaded.cache.is_none());
        // Cached balances are not persisted without the cache section.
        assert_eq!(0, loaded.wallets[0].actual_balance);
        assert_eq!(0, loaded.wallets[0].pending_balance);
    }

    /// Hand-writes a version 2 stream and checks the migration path: the
    /// obsolete records disappear, amounts turn unsigned, the cache is
    /// dropped.
    #[test]
    fn test_legacy_version_migrates() {
        let (view_public_key, view_secret_key) = generate_keys();
        let (spend_public_key, spend_secret_key) = generate_keys();

        let mut stream = Vec::new();
        bincode::serialize_into(&mut stream, &2u32).unwrap();
        let mut context = CryptoContext {
            key: cipher::generate_chacha_key(b"password"),
            iv: ChachaIv::from(77u64),
        };
        stream.extend_from_slice(&context.iv.0);

        write_encrypted(&view_public_key, &mut context, &mut stream).unwrap();
        write_encrypted(&view_secret_key, &mut context, &mut stream).unwrap();
        write_encrypted(&true, &mut context, &mut stream).unwrap();
        write_encrypted(&true, &mut context, &mut stream).unwrap();

        write_encrypted(&1u64, &mut context, &mut stream).unwrap();
        write_encrypted(
            &WalletRecordDto {
                spend_public_key,
                spend_secret_key,
                pending_balance: 11,
                actual_balance: 22,
                creation_timestamp: 5,
            },
            &mut context,
            &mut stream,
        )
        .unwrap();

        // Cache section with one of each obsolete record.
        write_encrypted(&22u64, &mut context, &mut stream).unwrap();
        write_encrypted(&11u64, &mut context, &mut stream).unwrap();
        write_encrypted(&vec![5u8, 5, 5], &mut context, &mut stream).unwrap();
        write_encrypted(&1u64, &mut context, &mut stream).unwrap();
        write_encrypted(
            &ObsoleteSpentOutputDto {
                amount: 10,
                transaction_hash: Hash([1; 32]),
                output_in_transaction: 0,
                wallet_index: 0,
                spending_transaction_hash: Hash([2; 32]),
            },
            &mut context,
            &mut stream,
        )
        .unwrap();
        write_encrypted(&0u64, &mut context, &mut stream).unwrap();
        write_encrypted(&1u64, &mut context, &mut stream).unwrap();
        write_encrypted(
            &ObsoleteChangeDto {
                transaction_hash: Hash([3; 32]),
                amount: 4,
            },
            &mut context,
            &mut stream,
        )
        .unwrap();
        write_encrypted::<Vec<(u64, Vec<u8>)>, _>(&vec![], &mut context, &mut stream).unwrap();

        // Details section with a signed transfer amount.
        write_encrypted(&0u64, &mut context, &mut stream).unwrap();
        write_encrypted(&1u64, &mut context, &mut stream).unwrap();
        write_encrypted(
            &(3u64, LegacyTransferDto {
                address: "legacy".into(),
                amount: 64,
            }),
            &mut context,
            &mut stream,
        )
        .unwrap();

        let loaded = WalletSerializer::load(b"password", &mut stream.as_slice()).unwrap();

        assert_eq!(view_public_key, loaded.view_public_key);
        assert!(loaded.cache.is_none());
        assert_eq!(0, loaded.wallets[0].actual_balance);
        let details = loaded.details.unwrap();
        assert!(details.transactions.is_empty());
        assert_eq!(
            (3u64, WalletTransferDto {
                address: "legacy".into(),
                amount: 64,
                transfer_type: 0,
            }),
            details.transfers[0]
        );
    }
}
