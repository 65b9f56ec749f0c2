//! chain data structures

#![deny(rust_2018_idioms)]
#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]

/// Blocks, hashes and account types
pub mod chain;

/// Errors raised when decoding chain payloads
pub mod error;

/// Transaction extra field parsing
pub mod extra;

/// Transactions and their inputs/outputs
pub mod transaction;
