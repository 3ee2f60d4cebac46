//! Credit subsystem: the ledger, the canonical reward rule table, the
//! asynchronous worker pool, and the listener that turns domain events
//! into queued rewards.

pub mod ledger;
pub mod rewards;
pub mod rules;
pub mod worker;

pub use ledger::CreditLedger;
pub use rewards::RewardListener;
pub use worker::CreditWorkerPool;
