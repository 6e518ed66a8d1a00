//! Transaction tracking, gas pricing, nonce bookkeeping and cancellation

mod cancel;
mod gas;
mod nonce;
mod tracker;

pub use cancel::{CancelledTransaction, TransactionCanceller, CANCEL_FEE_MULTIPLIER};
pub use gas::{FeeEstimate, FeeSource, GasPriceOracle};
pub use nonce::{NonceManager, NonceSource};
pub use tracker::{FailureKind, PollResult, TransactionTracker, TxStatus};

#[cfg(test)]
pub(crate) use tracker::fixtures;
