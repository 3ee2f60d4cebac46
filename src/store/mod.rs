//! Storage assembly. The engines take individual port traits;
//! `Stores` (defined next to the ports) bundles one trait object per
//! port so wiring stays in one place.

pub mod memory;

pub use openpenpal_core::ports::Stores;
