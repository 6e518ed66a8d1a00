//! Energi gateway core
//!
//! Gas price oracle, stateless transaction polling, same-nonce cancellation
//! and a per-network connector registry for Energi EVM networks.

pub mod api;
pub mod chain;
pub mod config;
pub mod connector;
pub mod error;
pub mod metrics;
pub mod tx;
pub mod wallet;
