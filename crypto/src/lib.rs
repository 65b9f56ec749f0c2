//! crypto

#![deny(rust_2018_idioms)]
#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![deny(missing_docs)]

/// Stream cipher used for wallet files
pub mod cipher;

/// Hash functions
pub mod hash;

/// Ed25519 key types and one-time key math
pub mod key;
