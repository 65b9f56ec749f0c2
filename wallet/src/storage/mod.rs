//! Persistent encrypted wallet state.
//!
//! Two layers live here: the key container
//! ([`container::ContainerStorage`]), a compact append-only file of
//! per-record ChaCha8 envelopes holding the wallet keys, and the full
//! snapshot stream ([`serialization::WalletSerializer`]) that additionally
//! carries balances, transaction history and the transfers synchronizer
//! state.

pub mod container;
mod error;
pub mod serialization;

pub use error::{Error, Result};
