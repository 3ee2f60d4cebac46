//! Postgres implementations of all openpenpal-core port traits.
//!
//! One newtype adapter per port, each wrapping the shared `PgPool`. All
//! SQL is runtime-checked (`sqlx::query`, not `sqlx::query!`) so builds
//! never need a live database. Status enums are stored as text and
//! round-tripped through the core `as_str`/`from_str` pairs.

pub mod sqlx_types;

mod barcodes;
mod couriers;
mod credit;
mod credit_tasks;
mod letters;
mod tasks;
mod users;

pub use barcodes::PgBarcodeStore;
pub use couriers::PgCourierStore;
pub use credit::PgCreditStore;
pub use credit_tasks::PgCreditTaskStore;
pub use letters::PgLetterStore;
pub use tasks::PgTaskStore;
pub use users::PgUserStore;

use std::sync::Arc;

use openpenpal_core::error::CoreError;
use openpenpal_core::ports::Stores;
use sqlx::PgPool;

/// All adapters over one pool.
pub struct PgStores {
    pool: PgPool,
}

impl PgStores {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn into_stores(self) -> Stores {
        Stores {
            users: Arc::new(PgUserStore::new(self.pool.clone())),
            couriers: Arc::new(PgCourierStore::new(self.pool.clone())),
            letters: Arc::new(PgLetterStore::new(self.pool.clone())),
            barcodes: Arc::new(PgBarcodeStore::new(self.pool.clone())),
            tasks: Arc::new(PgTaskStore::new(self.pool.clone())),
            credit: Arc::new(PgCreditStore::new(self.pool.clone())),
            credit_tasks: Arc::new(PgCreditTaskStore::new(self.pool)),
        }
    }
}

/// Shared sqlx → core error mapping. Unique violations surface as
/// conflicts so callers can branch on them; everything else is internal.
pub(crate) fn db_err(e: sqlx::Error) -> CoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some("23505") {
            return CoreError::Conflict(format!("unique violation: {db}"));
        }
    }
    CoreError::Internal(anyhow::anyhow!(e))
}
