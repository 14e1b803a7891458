//! Postgres-backed repository implementations.
//!
//! One `PostgresRepositories` value implements every repository trait over a
//! shared pool; callers hand it out as `Arc<dyn …Repo>`.

mod contacts;
mod locations;
mod products;
mod refresh;
mod tenants;
mod util;

pub use util::map_sqlx_error;

use std::{sync::Arc, time::Duration};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::infra::error::InfraError;

const SOURCE: &str = "marketplace::infra::db";
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct PostgresRepositories {
    pool: Arc<PgPool>,
}

impl PostgresRepositories {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool and bring the schema up to date.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, InfraError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!(target = SOURCE, max_connections, "database ready");
        Ok(Self::new(pool))
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}
