//! Tracking of owned transfers.
//!
//! A [`container::TransfersContainer`] stores the outputs of one address
//! through their lifecycle, a [`subscription::TransfersSubscription`] wraps
//! a container with its observer surface, a
//! [`consumer::TransfersConsumer`] scans chain and pool content for every
//! subscription sharing a view key, and the
//! [`synchronizer::TransfersSynchronizer`] multiplexes consumers over the
//! blockchain synchronizer.

pub mod consumer;
pub mod container;
mod error;
pub mod subscription;
pub mod synchronizer;

#[cfg(test)]
mod tests;

pub use error::{Error, Result};
