use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Transaction};

use crate::{
    config,
    error::{Error, Result},
};

pub mod table;

/// PostgreSQL 連線池。
///
/// 由組合根建構一次後傳遞，不做全域單例；測試可以自建。
pub struct PostgresSQL {
    pool: PgPool,
}

impl PostgresSQL {
    pub fn new(settings: &config::App) -> Result<PostgresSQL> {
        let database_url = format!(
            "postgres://{}:{}@{}:{}/{}?application_name=mops_crawler",
            settings.postgresql.user,
            settings.postgresql.password,
            settings.postgresql.host,
            settings.postgresql.port,
            settings.postgresql.db
        );

        let pool = PgPoolOptions::new()
            .max_lifetime(None)
            .max_connections(settings.postgresql.pool_size)
            .connect_lazy(&database_url)
            .map_err(|why| Error::Storage(format!("wrong database URL: {}", why)))?;

        Ok(PostgresSQL { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn tx(&self) -> Result<Transaction<'_, Postgres>> {
        Ok(self.pool.begin().await?)
    }
}
