use std::time::Duration;

use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::MigratorTrait;

pub mod entities;
pub mod events;
pub mod models;
pub mod types;

pub use sea_orm::{DatabaseConnection, DbErr, TransactionTrait};

pub type DbPool = DatabaseConnection;

#[derive(Clone)]
pub struct DBService {
    pub pool: DbPool,
}

impl DBService {
    /// Connects to `database_url` and brings the schema up to date.
    pub async fn new(database_url: &str) -> Result<DBService, DbErr> {
        let mut options = ConnectOptions::new(database_url.to_owned());
        // Pool size is left to the driver so in-memory SQLite stays on a
        // single connection.
        options
            .acquire_timeout(Duration::from_secs(30))
            .sqlx_logging(false);

        let pool = Database::connect(options).await?;
        db_migration::Migrator::up(&pool, None).await?;
        tracing::debug!(database_url, "database ready");
        Ok(DBService { pool })
    }

    pub fn from_pool(pool: DbPool) -> Self {
        Self { pool }
    }
}
