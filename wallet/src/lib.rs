//! Wallet core.
//!
//! For one view key and a set of spend keys this crate keeps a consistent
//! picture of the chain segments that matter to them: which outputs the
//! wallet owns, where each output is in its lifecycle, which pool
//! transactions touch the wallet, and an encrypted persistent form of all of
//! it. Chain content is pulled from a node through the [`node::NodeClient`]
//! interface; the node is trusted for chain data while this crate remains
//! the only authority on output ownership.

#![deny(rust_2018_idioms)]
#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]

pub mod constants;
pub mod history;
pub mod node;
pub mod observers;
pub mod params;
pub mod storage;
pub mod sync;
pub mod transfers;
pub mod types;
pub mod unconfirmed;

pub use params::Params;
