//! openpenpal-core — pure domain layer for the OpenPenPal operational backbone.
//!
//! Holds the value objects (OP-Codes, barcodes), the entity rows
//! (users, couriers, letters, tasks, credit), the state-transition rules,
//! the error taxonomy, and the storage port traits. No persistence
//! dependencies live here; adapters implement `ports` elsewhere.

// Status enums intentionally use `from_str() -> Option<Self>` instead of
// `FromStr` because they return None for unknown values rather than an
// error.
#![allow(clippy::should_implement_trait)]

pub mod clock;
pub mod courier;
pub mod credit;
pub mod error;
pub mod events;
pub mod identity;
pub mod letter;
pub mod opcode;
pub mod ports;
pub mod ratelimit;
pub mod scan;
pub mod task;
pub mod user;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::CoreError;
pub use opcode::{OpCode, Prefix};
