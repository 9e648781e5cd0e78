//! MySQL store for the Klaxon incident notification engine.
//!
//! The database owns all durable state. Every operation here is a single
//! short-lived statement (or one batched UPDATE) on a shared pool;
//! transactions never span a suspension onto another queue, and the
//! escalation passes are written to be idempotent so a crashed tick can
//! simply run again.

pub mod changelog;
pub mod config;
pub mod contacts;
pub mod error;
pub mod escalation;
pub mod messages;
pub mod migrations;
pub mod refdata;

use sqlx::MySqlPool;
use sqlx::mysql::MySqlPoolOptions;

pub use config::DbConfig;
pub use contacts::ContactRow;
pub use error::DbError;
pub use escalation::{EscalationCandidateRow, NewIncidentRow};
pub use messages::UnsentMessageRow;
pub use refdata::{
    ApplicationRow, IncidentApplicationRow, PlanNotificationRow, PlanRow, ReprioritizationRow,
    RoleRow, TargetRow, TemplateContentRow,
};

/// Handle to the MySQL store.
///
/// Cheap to clone; all clones share one pool.
#[derive(Clone, Debug)]
pub struct Db {
    pool: MySqlPool,
}

impl Db {
    /// Connect and optionally create missing tables.
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.pool_size)
            .connect(&config.url)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        if config.run_migrations {
            migrations::run_migrations(&pool).await?;
        }

        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests share one pool across stores).
    #[must_use]
    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}
