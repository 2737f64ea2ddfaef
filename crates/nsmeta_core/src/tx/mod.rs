//! Optimistic transactions and the retrying executor.
//!
//! - [`TransactionManager`]: hands out snapshots, detects write-write
//!   conflicts and reports which versions tables may prune
//! - [`TransactionAware`]: the contract for resources enlisted in a
//!   transaction
//! - [`RetryingExecutor`]: runs a closure in a transaction and retries it
//!   according to a [`RetryPolicy`]

mod aware;
mod executor;
mod interrupt;
mod manager;
mod retry;
mod state;

pub use aware::TransactionAware;
pub use executor::{Bound, RetryingExecutor, TransactionExecutorFactory};
pub use interrupt::{Interrupt, InterruptWatch};
pub use manager::{ChangeId, PruneHorizon, TransactionManager, TransactionStats};
pub use retry::{ExponentialBackoff, NoRetry, RetryConfig, RetryPolicy};
pub use state::{Transaction, TransactionState};
