use std::sync::Arc;

use anyhow::Result;
use diesel::{
    Connection, PgConnection,
    connection::{CacheSize, SimpleConnection},
    r2d2::{ConnectionManager, CustomizeConnection, Error as R2d2Error, Pool},
};

/// Per-connection session settings applied on checkout from the pool.
#[derive(Debug)]
struct SessionSettings {
    statement_timeout_ms: u64,
}

impl CustomizeConnection<PgConnection, R2d2Error> for SessionSettings {
    fn on_acquire(&self, conn: &mut PgConnection) -> std::result::Result<(), R2d2Error> {
        conn.set_prepared_statement_cache_size(CacheSize::Disabled);
        // A statement cut off by the deadline rolls back its transaction, so
        // no conditional update is ever left half-applied.
        conn.batch_execute(&format!(
            "SET statement_timeout = {}",
            self.statement_timeout_ms
        ))
        .map_err(R2d2Error::QueryError)?;
        Ok(())
    }
}

pub type PgPoolSquad = Pool<ConnectionManager<PgConnection>>;

pub fn establish_connection(database_url: &str, statement_timeout_ms: u64) -> Result<PgPoolSquad> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = Pool::builder()
        .connection_customizer(Box::new(SessionSettings {
            statement_timeout_ms,
        }))
        .build(manager)?;
    Ok(pool)
}

/// Runs blocking Diesel work on a pooled connection off the async executor.
pub async fn with_connection<F, T>(db_pool: &Arc<PgPoolSquad>, f: F) -> Result<T>
where
    F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db_pool = Arc::clone(db_pool);
    tokio::task::spawn_blocking(move || {
        let mut conn = db_pool.get()?;
        f(&mut *conn)
    })
    .await?
}
